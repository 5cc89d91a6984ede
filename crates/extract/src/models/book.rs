use super::{BookFile, eq_ignore_case};

/// A logical work: one title by one or more authors, available as one or
/// more [`BookFile`]s.
///
/// Two books are the *same work* when their titles match case-insensitively
/// and their author lists match case-insensitively in the same order, see
/// [`Book::is_same_work`]. Series plays no part in identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Book {
    /// Catalog ID, zero until the book has been stored.
    #[cfg_attr(feature = "serde", serde(default))]
    pub id: i64,
    /// Display order is significant, identity comparison is not case-sensitive.
    #[cfg_attr(feature = "serde", serde(default))]
    pub authors: Vec<String>,
    pub title: String,
    /// Empty when the book isn't part of a series.
    #[cfg_attr(feature = "serde", serde(default))]
    pub series: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub files: Vec<BookFile>,
}
impl Book {
    pub fn new(
        title: impl Into<String>,
        authors: impl IntoIterator<Item: Into<String>>,
        series: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            authors: authors.into_iter().map(Into::into).collect(),
            title: title.into(),
            series: series.into(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: BookFile) -> Self {
        self.files.push(file);
        self
    }

    /// Whether this book and the given title/authors describe the same work.
    ///
    /// ```
    /// use tome_extract::Book;
    ///
    /// let book = Book::new("Dune", ["Frank Herbert"], "");
    /// assert!(book.is_same_work("DUNE", &["frank herbert"]));
    /// assert!(!book.is_same_work("Dune", &["Frank Herbert", "Brian Herbert"]));
    /// ```
    pub fn is_same_work(&self, title: &str, authors: &[impl AsRef<str>]) -> bool {
        eq_ignore_case(&self.title, title)
            && self.authors.len() == authors.len()
            && self.authors.iter().zip(authors).all(|(a, b)| eq_ignore_case(a, b.as_ref()))
    }

    /// Short author credit used when naming files.
    ///
    /// One author is credited by name, two are joined with `&`, anything
    /// beyond that is collapsed into "Others". A book without authors is
    /// credited to "Unknown".
    pub fn authors_short(&self) -> String {
        match self.authors.as_slice() {
            [] => "Unknown".to_string(),
            [only] => only.clone(),
            [first, second] => format!("{first} & {second}"),
            [first, second, ..] => format!("{first} & {second} & Others"),
        }
    }
}
impl From<ParsedBook> for Book {
    fn from(parsed: ParsedBook) -> Self {
        Self::new(parsed.title, parsed.authors, parsed.series)
    }
}

/// The book-level fields a [`MetadataParser`](crate::MetadataParser) is able
/// to recover from a set of candidate files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBook {
    pub authors: Vec<String>,
    pub title: String,
    pub series: String,
}
