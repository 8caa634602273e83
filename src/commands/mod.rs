//! Conversion of raw tool items into deduplicatable command messages.

pub mod extractor;

pub use extractor::{ArgumentCache, CommandExtractor, Diagnostic, REJECTION_MARKER};
