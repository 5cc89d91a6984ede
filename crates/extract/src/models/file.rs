use crate::tags::tags_from_filename;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// One physical file (format, edition, rip...) belonging to exactly one [`Book`](super::Book).
///
/// The content hash is the deduplication key: no two files in a catalog share
/// one. The `filename` is where the file lives *now*: relative to the library
/// root once stored, but the absolute source path for a file that has not been
/// imported yet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BookFile {
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: i64,
    /// Owning book.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub book_id: i64,
    /// Without the leading dot.
    pub extension: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub tags: Vec<String>,
    pub hash: String,
    pub original_filename: PathBuf,
    pub filename: PathBuf,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub mtime: OffsetDateTime,
    pub size: u64,
    /// Provenance label, usually the name of the parser that recognised the file.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub source: String,
}
impl BookFile {
    /// Describes a file about to be imported from `original`.
    ///
    /// Extension and tags are derived from the filename; the current filename
    /// starts out as the source path itself.
    pub fn new(original: impl Into<PathBuf>, hash: impl Into<String>, size: u64, mtime: OffsetDateTime) -> Self {
        let original = original.into();
        Self {
            id: 0,
            book_id: 0,
            extension: extension_of(&original),
            tags: tags_from_filename(&original),
            hash: hash.into(),
            filename: original.clone(),
            original_filename: original,
            mtime,
            size,
            source: String::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item: Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// File extension without the leading dot, or an empty string.
pub fn extension_of(path: impl AsRef<Path>) -> String {
    path.as_ref().extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default()
}
