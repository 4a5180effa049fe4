//! Pipeline stages for schematic extraction.
//!
//! Each submodule implements exactly one transformation step; the
//! [`crate::orchestrator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ classify ──▶ extract ──▶ postprocess
//! (bytes)   (pages)   (indices)    (JSON)      (icons, backfill)
//! ```
//!
//! 1. [`input`]    — resolve a path or URL, detect PDF vs. single image
//! 2. [`render`]   — rasterise up to the page cap; `spawn_blocking` for pdfium
//! 3. [`encode`]   — base64 PNG for rendered pages, passthrough for images
//! 4. [`classify`] — batched triage; failed batches are skipped
//! 5. [`extract`]  — one structured call per selected page; failures are fatal
//! 6. [`postprocess`] — pure rules: icon table, fence stripping, box clamping

pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod postprocess;
pub mod render;
