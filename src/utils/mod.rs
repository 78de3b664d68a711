//! Shared utility functions.
//!
//! - Content hashing for fingerprints and evidence references
//! - Keyword tokenization and UTF-8 safe truncation
//! - Set and vector similarity measures
//! - Atomic file replacement

mod fs;
mod hash;
mod similarity;
mod text;

pub use fs::write_atomic;
pub use hash::{content_hash, hash_parts};
pub use similarity::{cosine_similarity, jaccard, term_frequencies};
pub use text::{extract_keywords, is_function_word, truncate_chars};
