use crate::error::{ErrorKind, Result};
use crate::models::ParsedBook;
use crate::parser::MetadataParser;
use crate::tags::split_title_and_tags;
use exn::ResultExt;
use regex::Regex;
use std::path::PathBuf;

/// Parses metadata out of filenames with user-configured regular expressions.
///
/// Patterns are matched against the base filename (extension included) using
/// the named groups:
///
/// | Group    | Meaning                                          |
/// |----------|--------------------------------------------------|
/// | `author` | One or more authors separated by ` & `           |
/// | `title`  | Title; trailing `(tag)` groups are stripped      |
/// | `series` | Optional series name                             |
///
/// Patterns are tried in order and the first pattern to match *any* of the
/// candidate files wins.
#[derive(Debug, Clone)]
pub struct RegexpParser {
    patterns: Vec<(String, Regex)>,
}
impl RegexpParser {
    pub const NAME: &'static str = "regexp";

    /// Compiles `(name, pattern)` pairs, keeping their order.
    pub fn new(patterns: impl IntoIterator<Item = (impl Into<String>, impl AsRef<str>)>) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|(name, pattern)| -> Result<(String, Regex)> {
                let name = name.into();
                let regex = Regex::new(pattern.as_ref()).or_raise(|| ErrorKind::InvalidRegexp(name.clone()))?;
                Ok((name, regex))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    fn parse_filename(regex: &Regex, filename: &str) -> Option<ParsedBook> {
        let captures = regex.captures(filename)?;
        let group = |name: &str| captures.name(name).map(|m| m.as_str().trim()).unwrap_or_default();
        let authors = group("author")
            .split(" & ")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let (title, _) = split_title_and_tags(group("title"));
        if authors.is_empty() || title.is_empty() {
            return None;
        }
        Some(ParsedBook { authors, title, series: group("series").to_string() })
    }
}
impl MetadataParser for RegexpParser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parse(&self, files: &[PathBuf]) -> Option<ParsedBook> {
        self.patterns.iter().find_map(|(name, regex)| {
            files.iter().find_map(|file| {
                let filename = file.file_name()?.to_str()?;
                let book = Self::parse_filename(regex, filename)?;
                tracing::debug!(file = %file.display(), regexp = %name, "Parsed metadata from filename");
                Some(book)
            })
        })
    }
}
