//! SQLite catalog of a personal book library.
//!
//! Books are logical works identified by title and author list; each is
//! available as one or more files living under the library root at a path
//! rendered by a [`PathGenerator`]. A full-text index over authors, series,
//! title, extensions, tags and sources backs [`Catalog::search`].

mod db;
pub mod error;
mod filename;
mod models;
mod repo;

pub use crate::db::{Database, Durability};
pub use crate::filename::PathGenerator;
pub use crate::models::{Relocation, SearchPage};
pub use crate::repo::Catalog;
