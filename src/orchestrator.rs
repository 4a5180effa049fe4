//! Pipeline orchestration: rasterise → classify → extract, as one run.
//!
//! ## State machine
//!
//! ```text
//! idle ──▶ rendering ──▶ filtering ──▶ analyzing ──▶ complete
//!              │             │             │
//!              └─────────────┴─────────────┴──────▶ error
//! complete / error ──reset──▶ idle
//! ```
//!
//! [`Pipeline`] owns the only mutable state: the current status and the
//! active [`Project`]. Both change only at stage boundaries, under one lock
//! that is never held across an `.await`.
//!
//! ## Stale runs
//!
//! Every run takes a generation number. [`Pipeline::reset`], a newer run, or
//! loading a stored project bumps the generation. In-flight backend calls
//! are not cancelled; when they resolve, the stage sees the generation
//! moved on, drops its result and returns [`SchematicError::Superseded`]
//! without touching state.
//!
//! ## Ordering
//!
//! Extraction is strictly sequential in ascending page order: one backend
//! call at a time, so the request rate stays flat and progress reflects
//! real completion order.

use crate::backend::{resolve_backend, ChatTurn, VisionBackend};
use crate::chat;
use crate::config::PipelineConfig;
use crate::error::SchematicError;
use crate::model::{Component, ComponentPatch, PageResult, Project, SchematicAnalysis};
use crate::pipeline::classify::PageClassifier;
use crate::pipeline::extract::SchematicExtractor;
use crate::pipeline::input::Document;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::store::{JsonFileStore, ProjectStore};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// Coarse pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Rendering,
    Filtering,
    Analyzing,
    Complete,
    Error,
}

/// Current pipeline status, including progress detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Rendering,
    /// Classifying `pages` page images.
    Filtering { pages: usize },
    /// Extracting `page_number` (1-based), the `position`-th of `total` selected pages.
    Analyzing {
        page_number: usize,
        position: usize,
        total: usize,
    },
    Complete { pages: usize },
    Error { message: String },
}

impl PipelineStatus {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineStatus::Idle => Stage::Idle,
            PipelineStatus::Rendering => Stage::Rendering,
            PipelineStatus::Filtering { .. } => Stage::Filtering,
            PipelineStatus::Analyzing { .. } => Stage::Analyzing,
            PipelineStatus::Complete { .. } => Stage::Complete,
            PipelineStatus::Error { .. } => Stage::Error,
        }
    }

    /// True once the run has ended, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self.stage(), Stage::Complete | Stage::Error)
    }

    /// Human-readable progress line.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Idle => write!(f, "Ready"),
            PipelineStatus::Rendering => write!(f, "Rendering document"),
            PipelineStatus::Filtering { pages } => {
                write!(f, "Scanning {pages} page(s) for schematics")
            }
            PipelineStatus::Analyzing {
                page_number,
                position,
                total,
            } => write!(f, "Analyzing page {page_number} ({position}/{total})"),
            PipelineStatus::Complete { pages } => write!(f, "Analysis complete: {pages} page(s)"),
            PipelineStatus::Error { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    generation: u64,
    project: Option<Project>,
}

/// Owns one session: the active project and the status of the current run.
pub struct Pipeline {
    config: PipelineConfig,
    backend: Arc<dyn VisionBackend>,
    rasterizer: Arc<dyn Rasterizer>,
    store: Option<Arc<dyn ProjectStore>>,
    session: Mutex<Session>,
    status: watch::Sender<PipelineStatus>,
    /// Serialises store writes so they land in session order.
    save_order: AsyncMutex<()>,
}

impl Pipeline {
    /// Build a pipeline from config: resolves the LLM backend, uses pdfium
    /// for rendering and a [`JsonFileStore`] when `store_dir` is set.
    pub fn new(config: PipelineConfig) -> Result<Self, SchematicError> {
        let backend = resolve_backend(&config)?;
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(PdfiumRasterizer::from_config(&config));
        let store: Option<Arc<dyn ProjectStore>> = config
            .store_dir
            .as_ref()
            .map(|dir| Arc::new(JsonFileStore::new(dir)) as Arc<dyn ProjectStore>);
        Ok(Self::with_parts(config, backend, rasterizer, store))
    }

    /// Build a pipeline from explicit collaborators.
    pub fn with_parts(
        config: PipelineConfig,
        backend: Arc<dyn VisionBackend>,
        rasterizer: Arc<dyn Rasterizer>,
        store: Option<Arc<dyn ProjectStore>>,
    ) -> Self {
        let (status, _) = watch::channel(PipelineStatus::Idle);
        Self {
            config,
            backend,
            rasterizer,
            store,
            session: Mutex::new(Session::default()),
            status,
            save_order: AsyncMutex::new(()),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes. The receiver always holds the latest status.
    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn active_project(&self) -> Option<Project> {
        self.session().project.clone()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Run ──────────────────────────────────────────────────────────────

    /// Run the full pipeline on a document.
    ///
    /// Clears the active project first; a fresh run is always a new project.
    /// On success the new project is active, the status is `Complete`, and
    /// the project has been handed to the store (a failed save is only
    /// logged; a project reset away before its save is not written). On failure the status is `Error` and nothing is kept,
    /// unless the run was superseded, in which case state is left alone.
    pub async fn run(&self, document: Document) -> Result<Project, SchematicError> {
        let generation = self.begin_run();
        let start = Instant::now();
        info!("Run {}: starting on '{}'", generation, document.name);

        match self.execute(generation, &document).await {
            Ok(project) => {
                info!(
                    "Run {}: complete, {} page(s) in {}ms",
                    generation,
                    project.pages.len(),
                    start.elapsed().as_millis()
                );
                self.persist(&project.id).await;
                Ok(project)
            }
            Err(e @ SchematicError::Superseded { .. }) => {
                debug!("Run {}: result dropped", generation);
                Err(e)
            }
            Err(e) => {
                warn!("Run {}: failed: {}", generation, e);
                self.fail(generation, &e);
                Err(e)
            }
        }
    }

    async fn execute(&self, generation: u64, document: &Document) -> Result<Project, SchematicError> {
        let cb = self.config.progress_callback.as_ref();

        // ── Stage 1: Rasterise ───────────────────────────────────────────
        let images = self
            .rasterizer
            .rasterize(document, self.config.page_cap)
            .await?;
        self.advance(generation, PipelineStatus::Filtering { pages: images.len() })?;
        info!("Rendered {} page(s)", images.len());
        if let Some(cb) = cb {
            cb.on_run_start(images.len());
        }

        // ── Stage 2: Classify ────────────────────────────────────────────
        let classifier = PageClassifier::new(Arc::clone(&self.backend), self.config.classify_batch_size)
            .with_max_tokens(self.config.classify_max_tokens);
        let selected = classifier.classify(&images).await;
        self.check(generation)?;

        if selected.is_empty() {
            return Err(SchematicError::NoSchematicsFound {
                document: document.name.clone(),
            });
        }
        if let Some(cb) = cb {
            let numbers: Vec<usize> = selected.iter().map(|i| i + 1).collect();
            cb.on_classified(&numbers, images.len());
        }

        // ── Stage 3: Extract, one page at a time ─────────────────────────
        let extractor = SchematicExtractor::new(Arc::clone(&self.backend), &self.config);
        let total = selected.len();
        let mut pages = Vec::with_capacity(total);

        for (i, index) in selected.iter().enumerate() {
            let image = images.get(index).ok_or_else(|| {
                SchematicError::Internal(format!("Selected page index {index} is out of range"))
            })?;
            let page_number = image.page_number();
            let position = i + 1;

            self.advance(
                generation,
                PipelineStatus::Analyzing {
                    page_number,
                    position,
                    total,
                },
            )?;
            if let Some(cb) = cb {
                cb.on_page_start(page_number, position, total);
            }

            let analysis = extractor.extract(image).await;
            self.check(generation)?;
            let analysis = analysis.map_err(|e| SchematicError::ExtractionFailed {
                page: page_number,
                detail: e.to_string(),
            })?;

            if let Some(cb) = cb {
                cb.on_page_complete(page_number, position, total, analysis.components.len());
            }
            pages.push(PageResult::new(image.clone(), analysis));
        }

        // ── Stage 4: Commit ──────────────────────────────────────────────
        let project = Project::new(document.stem(), pages);
        {
            let mut session = self.session();
            if session.generation != generation {
                return Err(SchematicError::Superseded { generation });
            }
            session.project = Some(project.clone());
            self.status.send_replace(PipelineStatus::Complete { pages: total });
        }
        if let Some(cb) = cb {
            cb.on_run_complete(total);
        }
        Ok(project)
    }

    /// Start a new generation: clear the project, move to `Rendering`.
    fn begin_run(&self) -> u64 {
        let mut session = self.session();
        session.generation += 1;
        session.project = None;
        self.status.send_replace(PipelineStatus::Rendering);
        session.generation
    }

    fn check(&self, generation: u64) -> Result<(), SchematicError> {
        if self.session().generation == generation {
            Ok(())
        } else {
            Err(SchematicError::Superseded { generation })
        }
    }

    /// Move to `status` if this run is still current.
    fn advance(&self, generation: u64, status: PipelineStatus) -> Result<(), SchematicError> {
        let session = self.session();
        if session.generation != generation {
            return Err(SchematicError::Superseded { generation });
        }
        debug!("Run {}: {}", generation, status);
        self.status.send_replace(status);
        Ok(())
    }

    fn fail(&self, generation: u64, e: &SchematicError) {
        let message = e.to_string();
        {
            let mut session = self.session();
            if session.generation != generation {
                return;
            }
            session.project = None;
            self.status.send_replace(PipelineStatus::Error {
                message: message.clone(),
            });
        }
        if let Some(cb) = &self.config.progress_callback {
            cb.on_run_error(&message);
        }
    }

    /// Discard all in-memory state and return to `Idle`.
    ///
    /// An in-flight run is not cancelled; its result is dropped when it
    /// arrives.
    pub fn reset(&self) {
        let mut session = self.session();
        session.generation += 1;
        session.project = None;
        self.status.send_replace(PipelineStatus::Idle);
        info!("Session reset (generation {})", session.generation);
    }

    // ── Persistence ──────────────────────────────────────────────────────

    /// Save the active project if it is still `id`.
    ///
    /// The project is read from the session only after the save lock is
    /// held, so overlapping edits always leave the newest version in the
    /// store. A project that stopped being active (reset, deleted, replaced)
    /// is not written.
    async fn persist(&self, id: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let _order = self.save_order.lock().await;
        let latest = self
            .session()
            .project
            .as_ref()
            .filter(|p| p.id == id)
            .cloned();
        let Some(project) = latest else {
            debug!("Project {} is no longer active; not saved", id);
            return;
        };
        match store.save(&project).await {
            Ok(()) => debug!("Persisted project {}", project.id),
            Err(e) => error!("Failed to save project {}: {}", project.id, e),
        }
    }

    fn store(&self) -> Result<&Arc<dyn ProjectStore>, SchematicError> {
        self.store
            .as_ref()
            .ok_or_else(|| SchematicError::InvalidConfig("No project store configured".into()))
    }

    /// Make a stored project the active one, replacing whatever was active.
    pub async fn load_project(&self, id: &str) -> Result<Project, SchematicError> {
        let project = self
            .store()?
            .get(id)
            .await?
            .ok_or_else(|| SchematicError::ProjectNotFound { id: id.to_string() })?;

        let mut session = self.session();
        session.generation += 1;
        session.project = Some(project.clone());
        self.status.send_replace(PipelineStatus::Complete {
            pages: project.pages.len(),
        });
        info!("Loaded project {} ('{}')", project.id, project.name);
        Ok(project)
    }

    /// Stored projects, most recently modified first.
    pub async fn list_projects(&self) -> Result<Vec<Project>, SchematicError> {
        self.store()?.list_all().await
    }

    /// Delete a stored project. Deleting the active project also resets the session.
    pub async fn delete_project(&self, id: &str) -> Result<(), SchematicError> {
        let store = self.store()?;
        let _order = self.save_order.lock().await;
        store.delete(id).await?;
        let is_active = self
            .session()
            .project
            .as_ref()
            .is_some_and(|p| p.id == id);
        if is_active {
            self.reset();
        }
        Ok(())
    }

    // ── Edits ────────────────────────────────────────────────────────────

    /// Apply `change` to the active project, bump its timestamp, re-persist.
    ///
    /// Last write wins; there is no versioning.
    async fn edit<F>(&self, change: F) -> Result<Project, SchematicError>
    where
        F: FnOnce(&mut Project) -> Result<(), SchematicError>,
    {
        let updated = {
            let mut session = self.session();
            let project = session
                .project
                .as_mut()
                .ok_or(SchematicError::NoActiveProject)?;
            change(project)?;
            project.touch();
            project.clone()
        };
        self.persist(&updated.id).await;
        Ok(updated)
    }

    /// Replace one page's analysis wholesale.
    pub async fn update_analysis(
        &self,
        page_number: usize,
        analysis: SchematicAnalysis,
    ) -> Result<Project, SchematicError> {
        self.edit(|project| {
            let page = project
                .page_mut(page_number)
                .ok_or(SchematicError::PageNotFound { page: page_number })?;
            page.analysis = analysis;
            Ok(())
        })
        .await
    }

    /// Patch one component; every other field and component is untouched.
    pub async fn edit_component(
        &self,
        page_number: usize,
        designator: &str,
        patch: ComponentPatch,
    ) -> Result<Project, SchematicError> {
        self.edit(|project| {
            let page = project
                .page_mut(page_number)
                .ok_or(SchematicError::PageNotFound { page: page_number })?;
            if let Some(ref renamed) = patch.designator {
                if renamed != designator && page.analysis.component(renamed).is_some() {
                    return Err(SchematicError::DuplicateDesignator {
                        page: page_number,
                        designator: renamed.clone(),
                    });
                }
            }
            page.analysis
                .edit_component(designator, &patch)
                .ok_or_else(|| SchematicError::ComponentNotFound {
                    page: page_number,
                    designator: designator.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    pub async fn add_component(
        &self,
        page_number: usize,
        component: Component,
    ) -> Result<Project, SchematicError> {
        self.edit(|project| {
            let page = project
                .page_mut(page_number)
                .ok_or(SchematicError::PageNotFound { page: page_number })?;
            let designator = component.designator.clone();
            if !page.analysis.add_component(component) {
                return Err(SchematicError::DuplicateDesignator {
                    page: page_number,
                    designator,
                });
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_component(
        &self,
        page_number: usize,
        designator: &str,
    ) -> Result<Project, SchematicError> {
        self.edit(|project| {
            let page = project
                .page_mut(page_number)
                .ok_or(SchematicError::PageNotFound { page: page_number })?;
            page.analysis
                .remove_component(designator)
                .ok_or_else(|| SchematicError::ComponentNotFound {
                    page: page_number,
                    designator: designator.to_string(),
                })?;
            Ok(())
        })
        .await
    }

    pub async fn rename_project(&self, name: impl Into<String>) -> Result<Project, SchematicError> {
        let name = name.into();
        self.edit(|project| {
            project.name = name;
            Ok(())
        })
        .await
    }

    // ── Follow-up chat ───────────────────────────────────────────────────

    /// Ask a question about one page of the active project.
    pub async fn ask(
        &self,
        page_number: usize,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, SchematicError> {
        let analysis = {
            let session = self.session();
            let project = session.project.as_ref().ok_or(SchematicError::NoActiveProject)?;
            project
                .page(page_number)
                .ok_or(SchematicError::PageNotFound { page: page_number })?
                .analysis
                .clone()
        };
        chat::ask(self.backend.as_ref(), history, message, &analysis).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzing_message_format() {
        let s = PipelineStatus::Analyzing {
            page_number: 5,
            position: 2,
            total: 2,
        };
        assert_eq!(s.message(), "Analyzing page 5 (2/2)");
        assert_eq!(s.stage(), Stage::Analyzing);
        assert!(!s.is_terminal());
    }

    #[test]
    fn terminal_stages() {
        assert!(PipelineStatus::Complete { pages: 1 }.is_terminal());
        assert!(PipelineStatus::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(!PipelineStatus::Idle.is_terminal());
    }
}
