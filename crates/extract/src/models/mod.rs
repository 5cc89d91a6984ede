mod book;
mod file;

pub use self::book::{Book, ParsedBook};
pub use self::file::{BookFile, extension_of};

/// Case-insensitive equality that also folds non-ASCII letters.
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}
