//! Core types for PartsFlow.
//!
//! This module provides type-safe wrappers for the workshop domain concepts.

pub mod document_number;
pub mod id;
pub mod status;

pub use document_number::{
    DocumentKind, DocumentNumber, DocumentNumberError, SequenceBook, SequenceScope,
    next_from_existing,
};
pub use id::*;
pub use status::*;
