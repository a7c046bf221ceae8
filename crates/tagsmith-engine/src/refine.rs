use anyhow::{bail, Result};
use serde_json::json;

use crate::batch::UnitPatch;
use crate::{error_chain_text, map_object, BatchEngine};

/// What a refine call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineOutcome {
    /// The backend was called and the unit's result was replaced.
    Applied,
    /// Blank instruction; nothing was called, nothing changed.
    Skipped,
}

impl BatchEngine {
    pub fn is_refining(&self) -> bool {
        self.refining
    }

    /// Regenerates a completed unit's metadata under a natural-language
    /// instruction. On success the result is replaced wholesale and the
    /// shared aspect ratio becomes `new_aspect_ratio` for every later
    /// generation. On failure the prior result stays untouched and the
    /// error surfaces to the caller. One refinement in flight at a time.
    pub fn refine_unit(
        &mut self,
        unit_id: &str,
        instruction: &str,
        new_aspect_ratio: &str,
    ) -> Result<RefineOutcome> {
        // A blank instruction is a no-op regardless of unit state.
        if instruction.trim().is_empty() {
            return Ok(RefineOutcome::Skipped);
        }
        let current = self.completed_result(unit_id)?;
        if self.refining {
            bail!("a refinement is already in progress");
        }

        self.refining = true;
        // The requested ratio applies to this call before it becomes the
        // shared default.
        let mut config = self.config.snapshot();
        config.aspect_ratio = new_aspect_ratio.to_string();

        let outcome = self.backend.refine(&current, instruction, &config);
        self.refining = false;

        match outcome {
            Ok(mut metadata) => {
                metadata.generated_for_model = config.target_model.as_str().to_string();
                self.state
                    .update_unit(unit_id, UnitPatch::ReplaceResult(metadata));
                self.config.set_aspect_ratio(new_aspect_ratio);
                self.events.emit(
                    "refine_applied",
                    map_object(json!({
                        "unit_id": unit_id,
                        "aspect_ratio": new_aspect_ratio,
                    })),
                )?;
                Ok(RefineOutcome::Applied)
            }
            Err(err) => {
                let message = error_chain_text(&err, 2048);
                self.events.emit(
                    "refine_failed",
                    map_object(json!({
                        "unit_id": unit_id,
                        "error": message,
                    })),
                )?;
                Err(err)
            }
        }
    }
}
