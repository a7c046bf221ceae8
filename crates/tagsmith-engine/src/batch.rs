use tagsmith_contracts::metadata::Metadata;

use crate::unit::{Unit, UnitStatus};

const GENERIC_FAILURE_MESSAGE: &str = "Generation failed for an unknown reason.";

/// The closed set of legal unit mutations. Every component — queue
/// runner, unit mutator, refinement controller — routes through
/// [`BatchState::update_unit`] with one of these; there is no other
/// write path into a unit.
#[derive(Debug, Clone)]
pub enum UnitPatch {
    /// pending -> processing, at dispatch time.
    Processing,
    /// processing -> completed with a generated result.
    Completed(Metadata),
    /// processing -> error with a human-readable message.
    Failed(String),
    /// Replaces the result of an already-completed unit without touching
    /// its status (mutator edits, refinement).
    ReplaceResult(Metadata),
}

/// Process-wide batch aggregate: the ordered unit queue, the detail-view
/// selection pointer, and the queue runner's busy flag. State is
/// ephemeral; nothing here survives the session.
#[derive(Debug, Default)]
pub struct BatchState {
    units: Vec<Unit>,
    active_unit_id: Option<String>,
    is_processing: bool,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.id == id)
    }

    pub fn active_unit_id(&self) -> Option<&str> {
        self.active_unit_id.as_deref()
    }

    pub fn active_unit(&self) -> Option<&Unit> {
        self.active_unit_id
            .as_deref()
            .and_then(|id| self.unit(id))
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn set_processing(&mut self, value: bool) {
        self.is_processing = value;
    }

    /// Appends new units at the end, preserving their relative order,
    /// and returns their ids in admission order. If nothing is selected
    /// yet, the first new unit becomes the active one.
    pub fn append(&mut self, new_units: Vec<Unit>) -> Vec<String> {
        self.active_unit_id = default_active_id(self.active_unit_id.as_deref(), &new_units);
        let ids = new_units.iter().map(|unit| unit.id.clone()).collect();
        self.units.extend(new_units);
        ids
    }

    /// Moves the detail-view pointer. Selecting an unknown id is a
    /// caller error and leaves the pointer unchanged.
    pub fn select_unit(&mut self, id: &str) -> bool {
        if self.unit(id).is_none() {
            return false;
        }
        self.active_unit_id = Some(id.to_string());
        true
    }

    /// Full batch reset. In-flight generation calls are not cancelled;
    /// their eventual `update_unit` finds no matching id and is inert.
    pub fn clear(&mut self) {
        self.units.clear();
        self.active_unit_id = None;
        self.is_processing = false;
    }

    /// The single choke point for unit mutation. Returns false — and
    /// changes nothing — when the id is absent (cleared queue) or the
    /// patch is not legal for the unit's current status.
    pub fn update_unit(&mut self, id: &str, patch: UnitPatch) -> bool {
        let Some(unit) = self.units.iter_mut().find(|unit| unit.id == id) else {
            return false;
        };
        match patch {
            UnitPatch::Processing => {
                unit.status = UnitStatus::Processing;
                unit.result = None;
                unit.error_message = None;
            }
            UnitPatch::Completed(metadata) => {
                unit.status = UnitStatus::Completed;
                unit.result = Some(metadata);
                unit.error_message = None;
            }
            UnitPatch::Failed(message) => {
                let message = message.trim().to_string();
                unit.status = UnitStatus::Error;
                unit.result = None;
                unit.error_message = Some(if message.is_empty() {
                    GENERIC_FAILURE_MESSAGE.to_string()
                } else {
                    message
                });
            }
            UnitPatch::ReplaceResult(metadata) => {
                if unit.status != UnitStatus::Completed {
                    return false;
                }
                unit.result = Some(metadata);
            }
        }
        true
    }
}

/// Default-selection policy, kept as a pure function of the current
/// pointer and the incoming batch.
pub fn default_active_id(current: Option<&str>, new_units: &[Unit]) -> Option<String> {
    match current {
        Some(id) => Some(id.to_string()),
        None => new_units.first().map(|unit| unit.id.clone()),
    }
}
