//! Canonical filenames for book files.
//!
//! Renders a [`Book`] and one of its [`BookFile`]s into a path relative to the
//! library root using a user-configured [upon] template. The template syntax
//! follows upon's conventions (`{{ variable }}`, `{{ value|filter }}`),
//! extended with a few filename-oriented helpers:
//!
//! - **`escape`**: replaces `\ / : * ? " < > |` with `_`, so a title can never
//!   introduce a directory or an invalid character.
//! - **`slug`**: URL-safe slug, quotation marks stripped first.
//! - **`truncate`**: cuts a string to a maximum byte length at a character
//!   boundary, as `truncate(value, n)` or `{{ value|truncate: n }}`.
//! - **`upper`**: upper-cases a string.
//! - **`join`**: joins a list with a separator, `{{ authors|join: ", " }}`.
//!
//! # Template Variables
//!
//! | Variable        | Type       | Description                                        |
//! |-----------------|------------|----------------------------------------------------|
//! | `id`            | `i64`      | Book ID                                            |
//! | `title`         | `String`   | Book title                                         |
//! | `series`        | `String`   | Series name, empty if none                         |
//! | `authors`       | `[String]` | Every author, in display order                     |
//! | `authors_short` | `String`   | `A`, `A & B`, `A & B & Others`, or `Unknown`       |
//! | `ext`           | `String`   | File extension without the dot                     |
//! | `tags`          | `[String]` | Tags of this file                                  |
//! | `hash`          | `String`   | Content hash of this file                          |
//! | `source`        | `String`   | Name of the parser that recognised this file       |
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use tome_catalog::PathGenerator;
//! use tome_extract::{Book, BookFile};
//! # use time::OffsetDateTime;
//!
//! let book = Book::new("Good Omens", ["Terry Pratchett", "Neil Gaiman"], "");
//! let file = BookFile::new("/incoming/good-omens.epub", "abc", 0, OffsetDateTime::UNIX_EPOCH);
//!
//! let generator: PathGenerator = "{{ authors_short|escape }}/{{ title|escape }}.{{ ext }}".parse().unwrap();
//! let path = generator.generate(&book, &file).unwrap();
//! assert_eq!(path, Path::new("Terry Pratchett & Neil Gaiman/Good Omens.epub"));
//! ```

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use tome_extract::{Book, BookFile};
use tome_storage::validate_path;
use upon::{Engine, Template, Value};

/// Generates canonical file paths from book metadata and a user-defined
/// template string.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time.
///
/// Generated paths are normalized (segments trimmed, empty segments dropped)
/// and validated by [`tome_storage::validate_path`] so they can never leave
/// the library root.
pub struct PathGenerator {
    engine: Engine<'static>,
    template: Template<'static>,
    source: String,
}
impl Debug for PathGenerator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("PathGenerator").field(&self.source).finish()
    }
}
impl FromStr for PathGenerator {
    type Err = Error;

    /// Returns [`ErrorKind::Template`] if the template syntax is invalid.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template, source: s.to_string() })
    }
}
impl PathGenerator {
    /// Renders the canonical path of `file` as part of `book`, relative to
    /// the library root. The result is not truncated; see
    /// [`tome_storage::truncate_filename`].
    pub fn generate(&self, book: &Book, file: &BookFile) -> Result<PathBuf> {
        let path = self
            .template
            .render(&self.engine, Self::parameters(book, file))
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        Self::normalize(&path)
    }

    fn normalize(s: &str) -> Result<PathBuf> {
        let path = s.trim().split('/').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
        validate_path(&path).or_raise(|| ErrorKind::Template)
    }

    fn parameters(book: &Book, file: &BookFile) -> Value {
        let list = |items: &[String]| Value::List(items.iter().cloned().map(Value::String).collect());
        upon::value! {
            id: book.id,
            title: book.title.clone(),
            series: book.series.clone(),
            authors: list(&book.authors),
            authors_short: book.authors_short(),
            ext: file.extension.clone(),
            tags: list(&file.tags),
            hash: file.hash.clone(),
            source: file.source.clone(),
        }
    }
}

/// Custom [`upon`] extensions for path-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Characters that are either path separators or rejected by common filesystems.
    const RESERVED: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                // Various quotation marks: '"''""„"`«»
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(super) fn escape(s: &str) -> String {
        s.chars().map(|c| if RESERVED.contains(&c) { '_' } else { c }).collect()
    }

    fn upper(s: &str) -> String {
        s.to_uppercase()
    }

    fn join(list: &Value, separator: &str) -> String {
        match list {
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                })
                .collect::<Vec<_>>()
                .join(separator),
            Value::String(s) => s.clone(),
            _ => String::new(),
        }
    }

    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_function("escape", escape);
        engine.add_function("upper", upper);
        engine.add_function("join", join);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;
    use time::OffsetDateTime;

    fn book(title: &str, authors: &[&str], series: &str) -> (Book, BookFile) {
        let file = BookFile::new("/incoming/Some File (retail).epub", "c0ffee", 10, OffsetDateTime::UNIX_EPOCH)
            .with_source("regexp");
        (Book { id: 42, ..Book::new(title, authors.iter().copied(), series) }, file)
    }

    fn render(template: &str, title: &str, authors: &[&str], series: &str) -> PathBuf {
        let (book, file) = book(title, authors, series);
        template.parse::<PathGenerator>().unwrap().generate(&book, &file).unwrap()
    }

    #[rstest]
    #[case(&[], "Unknown/Dune.epub")]
    #[case(&["Frank Herbert"], "Frank Herbert/Dune.epub")]
    #[case(&["Frank Herbert", "Brian Herbert"], "Frank Herbert & Brian Herbert/Dune.epub")]
    #[case(&["A", "B", "C"], "A & B & Others/Dune.epub")]
    fn test_authors_short(#[case] authors: &[&str], #[case] expected: &str) {
        let path = render("{{ authors_short }}/{{ title }}.{{ ext }}", "Dune", authors, "");
        assert_eq!(path, Path::new(expected));
    }

    #[test]
    fn test_escape_keeps_titles_in_one_segment() {
        let path = render("{{ authors_short|escape }}/{{ title|escape }}.{{ ext }}", "AC/DC: Live?", &["A"], "");
        assert_eq!(path, Path::new("A/AC_DC_ Live_.epub"));
    }

    #[test]
    fn test_unescaped_separators_create_directories() {
        let path = render("{{ title }}.{{ ext }}", "Part/One", &["A"], "");
        assert_eq!(path, Path::new("Part/One.epub"));
    }

    #[test]
    fn test_file_fields() {
        let path = render("{{ id }}-{{ hash }}-{{ source }}-{{ tags|join: \",\" }}.{{ ext|upper }}", "T", &["A"], "");
        assert_eq!(path, Path::new("42-c0ffee-regexp-retail.EPUB"));
    }

    #[test]
    fn test_join_authors() {
        let path = render("{{ authors|join: \", \" }}.{{ ext }}", "T", &["Terry Pratchett", "Neil Gaiman"], "");
        assert_eq!(path, Path::new("Terry Pratchett, Neil Gaiman.epub"));
    }

    #[test]
    fn test_slug_and_truncate() {
        let path = render("{{ title|truncate: 10|slug }}.{{ ext }}", "\"A Very\" Long Title", &["A"], "");
        // Cut after `"A Very" L`, then the quotes are stripped.
        assert_eq!(path, Path::new("a-very-l.epub"));
    }

    #[test]
    fn test_normalizes_segments() {
        let path = render("  {{ authors_short }} /  / {{ title }}.{{ ext }} ", "Dune", &["F"], "");
        assert_eq!(path, Path::new("F/Dune.epub"));
    }

    #[test]
    fn test_rejects_traversal() {
        let (book, file) = book("..", &["A"], "");
        let generator: PathGenerator = "../{{ title }}".parse().unwrap();
        let err = generator.generate(&book, &file).unwrap_err();
        assert_eq!(*err, ErrorKind::Template);
    }

    #[test]
    fn test_invalid_template() {
        let err = "{{ title ".parse::<PathGenerator>().unwrap_err();
        assert_eq!(*err, ErrorKind::Template);
    }

    #[test]
    fn test_escape() {
        assert_eq!(addons::escape(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
    }
}
