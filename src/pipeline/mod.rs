//! Pipeline stages that turn one uploaded document into a
//! [`crate::schema::CanonicalDocument`].
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the inference backend can be swapped without touching the
//! deterministic parsers.
//!
//! ## Data Flow
//!
//! ```text
//!                   ┌── text layer ──▶ normalize ──▶ text ──────┐
//! input ──▶ route ──┤                                           ├──▶ CanonicalDocument
//!                   └── scanned ────▶ llm ──▶ normalize ──▶ fallback ┘
//! ```
//!
//! 1. [`input`]     — load text files and JSON manifests into [`input::DocumentInput`]
//! 2. [`normalize`] — whitespace cleanup, garbage detection, JSON span recovery
//! 3. [`text`]      — deterministic label/box parser for text-layer documents
//! 4. [`llm`]       — fallback inference with timeout and retry/backoff; the
//!    only stage with network I/O
//! 5. [`fallback`]  — validates the inferred JSON reply field by field
//! 6. [`extract`]   — the single entry point that routes between 3 and 5

pub mod extract;
pub mod fallback;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod text;
