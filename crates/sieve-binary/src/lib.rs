//! Binary container primitives for compiled filter programs.
//!
//! This crate owns the byte-level layer: bounds-checked cursor reads, the
//! varint/string encodings, and the multi-block container with its extension
//! table and debug block. Everything above it (operand classes, operations,
//! the interpreter) is defined in the `sieve` crate in terms of these
//! primitives.
//!
//! Decode is bit-exact with encode: every read consumes exactly the bytes a
//! matching write produced, and any mismatch is a hard [`CorruptError`].

pub mod block;
pub mod container;

mod error;

pub use block::Block;
pub use container::{Container, ExtensionEntry};
pub use error::CorruptError;
