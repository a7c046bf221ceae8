use serde_json::json;

use crate::unit::UnitStatus;
use crate::{map_object, BatchEngine};

impl BatchEngine {
    /// Keyword suggestions for a clicked region of a completed unit's
    /// image. Coordinates are percentages of the image dimensions,
    /// clamped to 0-100. Suggestions are advisory; the caller merges the
    /// ones it wants via [`BatchEngine::add_keyword`]. Any failure here
    /// degrades to an empty set rather than a batch error.
    pub fn tag_point(&self, unit_id: &str, x_percent: u8, y_percent: u8) -> Vec<String> {
        let x = x_percent.min(100);
        let y = y_percent.min(100);

        let Some(unit) = self.state.unit(unit_id) else {
            return Vec::new();
        };
        if unit.status != UnitStatus::Completed || !unit.asset.media_type.is_image() {
            return Vec::new();
        }

        let suggestions = match self.backend.point_analyze(&unit.asset, x, y) {
            Ok(suggestions) => suggestions,
            Err(_) => return Vec::new(),
        };
        // Logging failure is not worth losing the suggestions over.
        let _ = self.events.emit(
            "point_tagged",
            map_object(json!({
                "unit_id": unit_id,
                "x": x,
                "y": y,
                "suggestions": suggestions.len(),
            })),
        );
        suggestions
    }
}
