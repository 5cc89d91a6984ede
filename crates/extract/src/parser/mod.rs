//! Pluggable metadata parsers.
//!
//! A parser looks at the candidate files of a single book and either
//! recognises them, producing a [`ParsedBook`], or doesn't. Parsers never fail
//! loudly: an unreadable container is logged and treated as "not matched" so
//! the next parser in line gets its chance.

mod epub;
mod mobi;
mod regexp;

pub use self::epub::EpubParser;
pub use self::mobi::MobiParser;
pub use self::regexp::RegexpParser;
use crate::error::{ErrorKind, Result};
use crate::models::ParsedBook;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Recovers book-level metadata from a set of candidate files.
pub trait MetadataParser: Send + Sync {
    /// Stable name, recorded as the source of every file it recognises.
    fn name(&self) -> &str;

    /// Returns `None` when the parser does not recognise any of `files`.
    fn parse(&self, files: &[PathBuf]) -> Option<ParsedBook>;
}

/// The result of a successful [`ParserRegistry::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    /// Name of the parser that matched.
    pub parser: String,
    pub book: ParsedBook,
}

/// Case-insensitive extension check for format-specific parsers.
fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Parsers in priority order. Built once (usually from configuration) and
/// handed to whatever needs to parse; cheap to clone.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn MetadataParser>>,
}
impl Debug for ParserRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_list().entries(self.parsers.iter().map(|p| p.name())).finish()
    }
}
impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parser with the lowest priority so far.
    pub fn with(mut self, parser: impl MetadataParser + 'static) -> Self {
        self.parsers.push(Arc::new(parser));
        self
    }

    /// Builds a registry from parser names (`regexp`, `epub`, `mobi`) in
    /// priority order. The regexp parser is only constructed once, even if
    /// named twice.
    pub fn from_names(names: &[impl AsRef<str>], regexp: RegexpParser) -> Result<Self> {
        let regexp = Arc::new(regexp);
        let mut registry = Self::new();
        for name in names {
            let parser: Arc<dyn MetadataParser> = match name.as_ref() {
                RegexpParser::NAME => regexp.clone(),
                EpubParser::NAME => Arc::new(EpubParser),
                MobiParser::NAME => Arc::new(MobiParser),
                unknown => exn::bail!(ErrorKind::UnknownParser(unknown.to_string())),
            };
            registry.parsers.push(parser);
        }
        Ok(registry)
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Tries every parser in order; the first one to recognise the files wins.
    pub fn parse(&self, files: &[PathBuf]) -> Option<Parsed> {
        self.parsers.iter().find_map(|parser| {
            let book = parser.parse(files)?;
            tracing::debug!(parser = parser.name(), title = %book.title, "Metadata parsed");
            Some(Parsed { parser: parser.name().to_string(), book })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Option<&'static str>);
    impl MetadataParser for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn parse(&self, _: &[PathBuf]) -> Option<ParsedBook> {
            self.1.map(|title| ParsedBook { title: title.to_string(), authors: vec!["A".to_string()], ..Default::default() })
        }
    }

    #[test]
    fn test_first_match_wins() {
        let registry = ParserRegistry::new()
            .with(Fixed("never", None))
            .with(Fixed("first", Some("One")))
            .with(Fixed("second", Some("Two")));
        let parsed = registry.parse(&[PathBuf::from("x.epub")]).unwrap();
        assert_eq!(parsed.parser, "first");
        assert_eq!(parsed.book.title, "One");
    }

    #[test]
    fn test_no_match() {
        let registry = ParserRegistry::new().with(Fixed("never", None));
        assert!(registry.parse(&[PathBuf::from("x.epub")]).is_none());
        assert!(ParserRegistry::new().parse(&[]).is_none());
    }

    #[test]
    fn test_from_names() {
        let regexp = RegexpParser::new([("default", r"^(?P<author>.+) - (?P<title>.+)\.epub$")]).unwrap();
        let registry = ParserRegistry::from_names(&["epub", "regexp", "mobi"], regexp.clone()).unwrap();
        assert_eq!(format!("{registry:?}"), r#"["epub", "regexp", "mobi"]"#);

        let err = ParserRegistry::from_names(&["pdf"], regexp).unwrap_err();
        assert_eq!(*err, ErrorKind::UnknownParser("pdf".to_string()));
    }
}
