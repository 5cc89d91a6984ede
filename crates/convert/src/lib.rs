//! Converts catalogued book files to EPUB with an external program, on a
//! fixed pool of background workers.

mod converter;
pub mod error;
mod pipeline;

pub use crate::converter::Converter;
pub use crate::pipeline::{Conversion, Pipeline, State};
