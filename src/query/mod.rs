//! Query composition
//!
//! Builds the single read-only statement an export runs.
//!
//! # Architecture
//!
//! - `catalog`: entities, their columns and the external field mapping
//! - `lexer`: filter predicate tokenizer
//! - `params`: literal extraction into positional parameters
//! - `fragment`: statement tree and its renderer
//! - `resolver`: secondary join relevance and fragment shapes
//! - `composer`: per-entity strategies and the registry dispatching to them
//! - `request`: the export request model
//! - `tests`: end-to-end composition cases

pub mod catalog;
pub mod composer;
pub mod fragment;
pub mod lexer;
pub mod params;
pub mod request;
pub mod resolver;

#[cfg(test)]
mod tests;

pub use catalog::Entity;
pub use composer::{ComposedQuery, CompositionStrategy, QueryComposer};
pub use params::QueryArg;
pub use request::{ColumnSelection, ExportRequest};
