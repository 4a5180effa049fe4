//! # edgequake-schematic
//!
//! Turn scanned or exported electronics documents into structured circuit
//! descriptions using Vision Language Models (VLMs).
//!
//! A PDF manual or a photo of a schematic goes in; a [`Project`] comes out
//! with one [`SchematicAnalysis`] per page that actually contains a
//! schematic: title, overview, components with icons, functional blocks,
//! connectivity narrative, netlist and potential issues.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise up to the page cap via pdfium (spawn_blocking)
//!  ├─ 3. Classify  batched VLM triage: which pages are schematics?
//!  ├─ 4. Extract   one structured VLM call per selected page, in order
//!  ├─ 5. Store     auto-save the finished project
//!  └─ 6. Export    camelCase JSON document, chat about any page
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_schematic::{resolve_input, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let pipeline = Pipeline::new(config)?;
//!     let document = resolve_input("amp-manual.pdf", 120).await?;
//!     let project = pipeline.run(document).await?;
//!     for page in &project.pages {
//!         println!("page {}: {}", page.page_number, page.analysis.title);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `schem2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-schematic = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod chat;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    resolve_backend, ChatRole, ChatTurn, LlmBackend, RequestKind, VisionBackend, VisionRequest,
    VisionResponse, DEFAULT_MODEL,
};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::SchematicError;
pub use export::{export_json, write_export};
pub use model::{
    BoundingBox, Component, ComponentIcon, ComponentPatch, FunctionalBlock, Net, PageImage,
    PageIndexSet, PageResult, Project, SchematicAnalysis,
};
pub use orchestrator::{Pipeline, PipelineStatus, Stage};
pub use pipeline::input::{resolve_input, Document, MediaKind};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use store::{JsonFileStore, MemoryStore, ProjectStore};
