pub mod backend;
pub mod batch;
pub mod intake;
pub mod mutate;
pub mod point;
pub mod refine;
pub mod runner;
pub mod unit;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use tagsmith_contracts::config::{ConfigHandle, GenerationConfig};
use tagsmith_contracts::events::EventWriter;
use tagsmith_contracts::metadata::{Metadata, SeoVariants};

pub use backend::{
    default_backend_registry, snap_aspect_ratio, BackendRegistry, DryrunBackend, GeminiBackend,
    MetadataBackend,
};
pub use batch::{BatchState, UnitPatch};
pub use intake::{
    normalize_files, IntakeReport, PageRenderer, SourceFile, UnavailableRenderer, MAX_PDF_PAGES,
};
pub use mutate::MetadataField;
pub use refine::RefineOutcome;
pub use runner::{AdmitReport, RunReport, UnitOutcome};
pub use unit::{create_units, Asset, MediaType, Unit, UnitStatus};

/// The batch orchestration engine: owns the queue, the shared
/// generation config, the backend, and the session event log. All unit
/// mutation flows through [`BatchState::update_unit`]; collaborators
/// address units by id only, never by held reference.
pub struct BatchEngine {
    state: BatchState,
    config: ConfigHandle,
    backend: Box<dyn MetadataBackend>,
    events: EventWriter,
    refining: bool,
}

impl BatchEngine {
    pub fn new(
        backend: Box<dyn MetadataBackend>,
        config: GenerationConfig,
        events_path: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        let events = EventWriter::new(events_path, session_id);
        events.emit(
            "session_started",
            map_object(json!({"backend": backend.name()})),
        )?;
        Ok(Self {
            state: BatchState::new(),
            config: ConfigHandle::new(config),
            backend,
            events,
            refining: false,
        })
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    /// Clonable handle to the single shared config; every generation
    /// call snapshots it at dispatch time.
    pub fn config(&self) -> ConfigHandle {
        self.config.clone()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn select_unit(&mut self, id: &str) -> bool {
        self.state.select_unit(id)
    }

    /// Batch reset. In-flight calls are not cancelled; their late
    /// updates miss the queue and are inert.
    pub fn clear(&mut self) {
        self.state.clear();
    }

    /// Ephemeral prompt preview. Failure surfaces to the caller and
    /// touches no unit state.
    pub fn preview(&self, prompt: &str, aspect_ratio_hint: &str) -> Result<Option<Vec<u8>>> {
        let snapped = snap_aspect_ratio(aspect_ratio_hint);
        let rendered = self.backend.preview_render(prompt, snapped)?;
        self.events.emit(
            "preview_rendered",
            map_object(json!({
                "aspect_ratio": snapped,
                "rendered": rendered.is_some(),
            })),
        )?;
        Ok(rendered)
    }

    /// SEO title/description alternatives for a completed unit.
    pub fn seo_variants(&self, unit_id: &str) -> Result<SeoVariants> {
        let result = self.completed_result(unit_id)?;
        self.backend.seo_variants(&result)
    }

    /// Clone of a completed unit's result; anything else is a caller error.
    pub(crate) fn completed_result(&self, unit_id: &str) -> Result<Metadata> {
        let unit = self
            .state
            .unit(unit_id)
            .with_context(|| format!("no unit with id {unit_id}"))?;
        if unit.status != UnitStatus::Completed {
            bail!(
                "unit {unit_id} is {}, expected completed",
                unit.status.as_str()
            );
        }
        unit.result
            .clone()
            .with_context(|| format!("unit {unit_id} is completed but carries no result"))
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Flattens an error chain into one line, deduplicating repeated causes.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}
