use anyhow::Result;
use serde_json::json;

use crate::batch::UnitPatch;
use crate::intake::{normalize_files, PageRenderer, SourceFile};
use crate::unit::{create_units, UnitStatus};
use crate::{error_chain_text, map_object, BatchEngine};

/// Outcome of one admission: unit ids in admission order plus the names
/// of files rejected up front.
#[derive(Debug, Clone)]
pub struct AdmitReport {
    pub admitted: Vec<String>,
    pub skipped: Vec<String>,
}

impl AdmitReport {
    pub fn skip_notice(&self) -> Option<String> {
        crate::intake::skip_notice(&self.skipped)
    }
}

/// Tally of one full drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    pub failed: usize,
}

/// Terminal state of one processed unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub status: UnitStatus,
}

impl BatchEngine {
    /// Normalizes a file selection and appends the resulting units to
    /// the queue as `pending`. Processing does not start here; call
    /// [`BatchEngine::run`] to drain.
    pub fn admit(
        &mut self,
        files: Vec<SourceFile>,
        renderer: &dyn PageRenderer,
    ) -> Result<AdmitReport> {
        let intake = normalize_files(files, renderer);
        let skipped = intake.skipped;
        let admitted = self.state.append(create_units(intake.assets));
        self.events.emit(
            "batch_admitted",
            map_object(json!({
                "admitted": admitted.len(),
                "skipped": skipped,
            })),
        )?;
        Ok(AdmitReport { admitted, skipped })
    }

    /// Drains every pending unit strictly sequentially, in admission
    /// order. `is_processing` is true from before the first unit starts
    /// until after the last one reaches a terminal state. One unit's
    /// failure never stops its successors and never touches its
    /// predecessors.
    pub fn run(&mut self) -> RunReport {
        self.state.set_processing(true);
        let mut report = RunReport::default();
        while let Some(outcome) = self.process_next() {
            if outcome.status == UnitStatus::Error {
                report.failed += 1;
            } else {
                report.completed += 1;
            }
        }
        self.state.set_processing(false);
        let _ = self.events.emit(
            "batch_finished",
            map_object(json!({
                "completed": report.completed,
                "failed": report.failed,
            })),
        );
        report
    }

    /// Processes exactly the first pending unit, if any. Step driver for
    /// callers that interleave config changes between units; plain batch
    /// flows should call [`BatchEngine::run`], which also maintains the
    /// `is_processing` flag.
    pub fn process_next(&mut self) -> Option<UnitOutcome> {
        let (id, asset) = self
            .state
            .units()
            .iter()
            .find(|unit| unit.status == UnitStatus::Pending)
            .map(|unit| (unit.id.clone(), unit.asset.clone()))?;

        self.state.update_unit(&id, UnitPatch::Processing);
        // The shared config is read at dispatch time, not admission time.
        let config = self.config.snapshot();
        // Log writes are best-effort once the drain has started; a full
        // disk must not strand units in `processing`.
        let _ = self.events.emit(
            "unit_started",
            map_object(json!({
                "unit_id": id,
                "file": asset.file_name,
                "fingerprint": asset.fingerprint(),
                "model": config.target_model.as_str(),
            })),
        );

        match self.backend.generate(&asset, &config) {
            Ok(mut metadata) => {
                metadata.generated_for_model = config.target_model.as_str().to_string();
                self.state.update_unit(&id, UnitPatch::Completed(metadata));
                let _ = self
                    .events
                    .emit("unit_completed", map_object(json!({"unit_id": id})));
                Some(UnitOutcome {
                    unit_id: id,
                    status: UnitStatus::Completed,
                })
            }
            Err(err) => {
                let message = error_chain_text(&err, 2048);
                self.state
                    .update_unit(&id, UnitPatch::Failed(message.clone()));
                let _ = self.events.emit(
                    "unit_failed",
                    map_object(json!({"unit_id": id, "error": message})),
                );
                Some(UnitOutcome {
                    unit_id: id,
                    status: UnitStatus::Error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;
    use tagsmith_contracts::config::{ConfigHandle, GenerationConfig, TargetModel};
    use tagsmith_contracts::metadata::{Metadata, SeoVariant, SeoVariants};

    use crate::intake::UnavailableRenderer;
    use crate::unit::Asset;
    use crate::MetadataBackend;

    use super::*;

    /// Backend stub with per-file failure scripting and a call journal.
    struct ScriptedBackend {
        fail_files: Vec<String>,
        fail_message: String,
        calls: Mutex<Vec<String>>,
        /// When set, flips the shared target model during the named
        /// file's generation call (mid-batch config change).
        flip_config_on: Option<(String, ConfigHandle, TargetModel)>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                fail_files: Vec::new(),
                fail_message: "backend rejected the image".to_string(),
                calls: Mutex::new(Vec::new()),
                flip_config_on: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn metadata(file_name: &str, config: &GenerationConfig) -> Metadata {
            Metadata {
                title: format!("Title for {file_name}"),
                description: "scripted".to_string(),
                prompt: "scripted prompt".to_string(),
                keywords: vec!["scripted".to_string()],
                category: "Test".to_string(),
                technical_settings: None,
                generated_for_model: config.target_model.as_str().to_string(),
            }
        }
    }

    impl MetadataBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, asset: &Asset, config: &GenerationConfig) -> Result<Metadata> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(asset.file_name.clone());
            }
            if let Some((trigger, handle, model)) = &self.flip_config_on {
                if &asset.file_name == trigger {
                    handle.update(|config| config.target_model = *model);
                }
            }
            if self.fail_files.contains(&asset.file_name) {
                bail!("{}", self.fail_message);
            }
            Ok(Self::metadata(&asset.file_name, config))
        }

        fn refine(
            &self,
            current: &Metadata,
            _instruction: &str,
            _config: &GenerationConfig,
        ) -> Result<Metadata> {
            Ok(current.clone())
        }

        fn point_analyze(&self, _asset: &Asset, _x: u8, _y: u8) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn preview_render(&self, _prompt: &str, _hint: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn seo_variants(&self, metadata: &Metadata) -> Result<SeoVariants> {
            let variant = SeoVariant {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
            };
            Ok(SeoVariants {
                descriptive: variant.clone(),
                conceptual: variant.clone(),
                commercial: variant,
            })
        }
    }

    fn jpegs(names: &[&str]) -> Vec<SourceFile> {
        names
            .iter()
            .map(|name| SourceFile {
                file_name: (*name).to_string(),
                bytes: name.as_bytes().to_vec(),
            })
            .collect()
    }

    fn engine_with(backend: ScriptedBackend) -> Result<(tempfile::TempDir, BatchEngine)> {
        let temp = tempfile::tempdir()?;
        let engine = BatchEngine::new(
            Box::new(backend),
            GenerationConfig::default(),
            temp.path().join("events.jsonl"),
            "test-session",
        )?;
        Ok((temp, engine))
    }

    #[test]
    fn three_jpegs_complete_in_admission_order() -> Result<()> {
        let (_temp, mut engine) = engine_with(ScriptedBackend::new())?;
        let report = engine.admit(jpegs(&["a.jpg", "b.jpg", "c.jpg"]), &UnavailableRenderer)?;
        assert_eq!(report.admitted.len(), 3);
        assert!(!engine.state().is_processing());
        for unit in engine.state().units() {
            assert_eq!(unit.status, UnitStatus::Pending);
        }

        let run = engine.run();
        assert_eq!(run, RunReport { completed: 3, failed: 0 });
        assert!(!engine.state().is_processing());

        let log = std::fs::read_to_string(engine.events().path())?;
        let started: Vec<String> = log
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|event| event["type"] == "unit_started")
            .filter_map(|event| event["file"].as_str().map(str::to_string))
            .collect();
        assert_eq!(started, vec!["a.jpg", "b.jpg", "c.jpg"]);
        Ok(())
    }

    #[test]
    fn next_unit_stays_pending_until_previous_is_terminal() -> Result<()> {
        let (_temp, mut engine) = engine_with(ScriptedBackend::new())?;
        engine.admit(jpegs(&["a.jpg", "b.jpg"]), &UnavailableRenderer)?;

        let first = engine.process_next().expect("first outcome");
        assert_eq!(first.status, UnitStatus::Completed);
        assert_eq!(engine.state().units()[0].status, UnitStatus::Completed);
        assert_eq!(engine.state().units()[1].status, UnitStatus::Pending);

        engine.process_next();
        assert_eq!(engine.state().units()[1].status, UnitStatus::Completed);
        assert!(engine.process_next().is_none());
        Ok(())
    }

    #[test]
    fn failure_on_middle_unit_is_isolated() -> Result<()> {
        let mut backend = ScriptedBackend::new();
        backend.fail_files = vec!["b.jpg".to_string()];
        let (_temp, mut engine) = engine_with(backend)?;
        engine.admit(jpegs(&["a.jpg", "b.jpg", "c.jpg"]), &UnavailableRenderer)?;

        let run = engine.run();
        assert_eq!(run, RunReport { completed: 2, failed: 1 });

        let units = engine.state().units();
        assert_eq!(units[0].status, UnitStatus::Completed);
        assert_eq!(units[1].status, UnitStatus::Error);
        assert_eq!(
            units[1].error_message.as_deref(),
            Some("backend rejected the image")
        );
        assert!(units[1].result.is_none());
        assert_eq!(units[2].status, UnitStatus::Completed);
        Ok(())
    }

    #[test]
    fn every_unit_is_attempted_even_when_all_fail() -> Result<()> {
        let mut backend = ScriptedBackend::new();
        backend.fail_files = vec!["a.jpg".to_string(), "b.jpg".to_string()];
        let (_temp, mut engine) = engine_with(backend)?;
        engine.admit(jpegs(&["a.jpg", "b.jpg"]), &UnavailableRenderer)?;

        let run = engine.run();
        assert_eq!(run, RunReport { completed: 0, failed: 2 });
        Ok(())
    }

    #[test]
    fn config_change_mid_batch_affects_only_later_units() -> Result<()> {
        let temp = tempfile::tempdir()?;
        // Build the engine first so the stub can hold its config handle.
        let mut engine = BatchEngine::new(
            Box::new(ScriptedBackend::new()),
            GenerationConfig::default(),
            temp.path().join("events.jsonl"),
            "test-session",
        )?;
        let mut backend = ScriptedBackend::new();
        backend.flip_config_on =
            Some(("a.jpg".to_string(), engine.config(), TargetModel::Dalle));
        engine.backend = Box::new(backend);

        engine.admit(jpegs(&["a.jpg", "b.jpg"]), &UnavailableRenderer)?;
        engine.run();

        let units = engine.state().units();
        // Unit a snapshotted the config before its own call.
        assert_eq!(
            units[0].result.as_ref().map(|m| m.generated_for_model.as_str()),
            Some("midjourney")
        );
        assert_eq!(
            units[1].result.as_ref().map(|m| m.generated_for_model.as_str()),
            Some("dalle")
        );
        Ok(())
    }

    #[test]
    fn unwritable_event_log_does_not_stop_the_drain() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut engine = BatchEngine::new(
            Box::new(ScriptedBackend::new()),
            GenerationConfig::default(),
            &events_path,
            "test-session",
        )?;
        engine.admit(jpegs(&["a.jpg", "b.jpg"]), &UnavailableRenderer)?;

        // Break the log mid-session: a directory at the log path makes
        // every append fail.
        std::fs::remove_file(&events_path)?;
        std::fs::create_dir(&events_path)?;

        let run = engine.run();
        assert_eq!(run, RunReport { completed: 2, failed: 0 });
        assert!(!engine.state().is_processing());
        for unit in engine.state().units() {
            assert_eq!(unit.status, UnitStatus::Completed);
        }
        Ok(())
    }

    #[test]
    fn run_on_empty_queue_is_a_quiet_noop() -> Result<()> {
        let (_temp, mut engine) = engine_with(ScriptedBackend::new())?;
        let run = engine.run();
        assert_eq!(run, RunReport::default());
        assert!(!engine.state().is_processing());
        Ok(())
    }

    #[test]
    fn admit_reports_skipped_files_without_creating_units() -> Result<()> {
        let (_temp, mut engine) = engine_with(ScriptedBackend::new())?;
        let report = engine.admit(
            jpegs(&["notes.txt", "a.jpg", "b.jpg"]),
            &UnavailableRenderer,
        )?;
        assert_eq!(report.admitted.len(), 2);
        assert_eq!(report.skipped, vec!["notes.txt"]);
        let notice = report.skip_notice().expect("notice");
        assert!(notice.contains("notes.txt"));
        assert_eq!(engine.state().units().len(), 2);
        Ok(())
    }

    #[test]
    fn scripted_backend_sees_units_in_admission_order() -> Result<()> {
        let (_temp, mut engine) = engine_with(ScriptedBackend::new())?;
        engine.admit(jpegs(&["z.jpg", "a.jpg", "m.jpg"]), &UnavailableRenderer)?;
        engine.run();

        // The journal lives in the boxed backend; recover it via events
        // instead of downcasting.
        let log = std::fs::read_to_string(engine.events().path())?;
        let completed = log.matches("\"unit_completed\"").count();
        assert_eq!(completed, 3);
        let started: Vec<String> = log
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(|event| event["type"] == "unit_started")
            .filter_map(|event| event["file"].as_str().map(str::to_string))
            .collect();
        assert_eq!(started, vec!["z.jpg", "a.jpg", "m.jpg"]);
        Ok(())
    }
}
