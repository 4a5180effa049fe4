//! Error types for the edgequake-schematic library.
//!
//! A single fatal error type, [`SchematicError`], covers every stage of the
//! pipeline. Where an error ends up depends on the stage that raised it:
//!
//! * **Input errors** (missing file, unsupported document) are returned
//!   before a run starts.
//! * **Classification batch errors** never leave
//!   [`crate::pipeline::classify`]: the batch is logged and skipped.
//! * [`SchematicError::NoSchematicsFound`] is a designed terminal outcome,
//!   with a message that reads differently from a technical failure.
//! * **Extraction errors** abort the run; the orchestrator maps them to the
//!   `error` state.
//! * **Store errors** are returned by the [`crate::store`] API but only
//!   logged when raised by the pipeline's background save.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-schematic library.
#[derive(Debug, Error)]
pub enum SchematicError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes are neither a PDF nor a recognised raster image.
    #[error("Unsupported document '{name}': {detail}\nSupported: PDF, PNG, JPEG, GIF, WebP, BMP, TIFF.")]
    UnsupportedDocument { name: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password; encrypted manuals are not supported.
    #[error("PDF '{name}' is encrypted and cannot be rasterised.")]
    PasswordRequired { name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH to the\n\
directory containing an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The inference backend returned an error or could not be reached.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The backend answered, but the body is not the JSON we asked for.
    #[error("Malformed {what} response: {detail}")]
    MalformedResponse { what: &'static str, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// A required field was absent from an extraction response.
    #[error("Extraction response is missing required field '{field}'")]
    MissingField { field: &'static str },

    /// Extraction of one page failed; fatal to the whole run.
    #[error("Failed to analyze page {page}: {detail}")]
    ExtractionFailed { page: usize, detail: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Classification found no page worth analysing.
    #[error("No schematics detected in '{document}'. Try a page that contains a circuit diagram.")]
    NoSchematicsFound { document: String },

    /// A reset or a newer run replaced this run before it finished.
    #[error("Run {generation} was superseded; its results were discarded")]
    Superseded { generation: u64 },

    /// An edit was requested but no project is active.
    #[error("No active project")]
    NoActiveProject,

    /// The active project has no page with this 1-based number.
    #[error("Page {page} is not part of the active project")]
    PageNotFound { page: usize },

    /// No component with this designator exists on the page.
    #[error("Component '{designator}' not found on page {page}")]
    ComponentNotFound { page: usize, designator: String },

    /// A component with this designator already exists on the page.
    #[error("Component '{designator}' already exists on page {page}")]
    DuplicateDesignator { page: usize, designator: String },

    /// No project is stored under this id.
    #[error("Project '{id}' not found")]
    ProjectNotFound { id: String },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Reading or writing a stored project failed.
    #[error("Project store I/O error at '{path}': {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored project could not be (de)serialised.
    #[error("Project store serialisation error: {0}")]
    StoreSerde(#[from] serde_json::Error),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchematicError {
    /// True for errors raised before a run could start (bad or unreadable input).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SchematicError::FileNotFound { .. }
                | SchematicError::PermissionDenied { .. }
                | SchematicError::InvalidInput { .. }
                | SchematicError::DownloadFailed { .. }
                | SchematicError::DownloadTimeout { .. }
                | SchematicError::UnsupportedDocument { .. }
        )
    }
}
