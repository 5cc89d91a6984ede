//! Tags are the trailing parenthesised groups of a filename:
//! `Dune (retail) (v5).epub` is tagged `retail` and `v5`.

use std::path::Path;

/// Splits trailing `(tag)` groups off a title.
///
/// Groups are peeled from the end for as long as the title keeps ending in a
/// closing parenthesis, and returned in their original order. A group is never
/// peeled if doing so would leave the title empty.
///
/// ```
/// use tome_extract::split_title_and_tags;
///
/// let (title, tags) = split_title_and_tags("Wizard's First Rule (retail) (epub)");
/// assert_eq!(title, "Wizard's First Rule");
/// assert_eq!(tags, ["retail", "epub"]);
/// ```
pub fn split_title_and_tags(s: &str) -> (String, Vec<String>) {
    let mut title = s.trim();
    let mut tags = Vec::new();
    while let Some(inner) = title.strip_suffix(')')
        && let Some(open) = inner.rfind('(')
    {
        let remaining = inner[..open].trim_end();
        let tag = inner[open + 1..].trim();
        if remaining.is_empty() || tag.contains(')') {
            break;
        }
        if !tag.is_empty() {
            tags.push(tag.to_string());
        }
        title = remaining;
    }
    tags.reverse();
    (title.to_string(), tags)
}

/// Tags of the filename stem of `path`.
pub fn tags_from_filename(path: impl AsRef<Path>) -> Vec<String> {
    path.as_ref().file_stem().map(|stem| split_title_and_tags(&stem.to_string_lossy()).1).unwrap_or_default()
}
