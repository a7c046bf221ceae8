use anyhow::Result;
use serde_json::json;
use tagsmith_contracts::metadata::KeywordSort;

use crate::batch::UnitPatch;
use crate::{map_object, BatchEngine};

/// Text fields addressable by the field editor. Keywords have their own
/// operations because they are positional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Title,
    Description,
    Prompt,
    Category,
    TechnicalSettings,
}

impl MetadataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Description => "description",
            MetadataField::Prompt => "prompt",
            MetadataField::Category => "category",
            MetadataField::TechnicalSettings => "technical_settings",
        }
    }
}

/// Post-generation edits. Every operation reads the completed result,
/// rewrites the copy, and swaps it back wholesale through
/// [`crate::batch::BatchState::update_unit`]. Status never changes and
/// no other unit is touched.
impl BatchEngine {
    pub fn edit_field(&mut self, unit_id: &str, field: MetadataField, value: &str) -> Result<()> {
        let mut metadata = self.completed_result(unit_id)?;
        match field {
            MetadataField::Title => metadata.title = value.to_string(),
            MetadataField::Description => metadata.description = value.to_string(),
            MetadataField::Prompt => metadata.prompt = value.to_string(),
            MetadataField::Category => metadata.category = value.to_string(),
            MetadataField::TechnicalSettings => {
                let trimmed = value.trim();
                metadata.technical_settings = if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                };
            }
        }
        self.replace_result(unit_id, metadata, "field_edited", json!({"field": field.as_str()}))
    }

    /// Returns true when the keyword was new; duplicates and blanks are
    /// accepted silently and change nothing.
    pub fn add_keyword(&mut self, unit_id: &str, raw: &str) -> Result<bool> {
        let mut metadata = self.completed_result(unit_id)?;
        if !metadata.add_keyword(raw) {
            return Ok(false);
        }
        self.replace_result(unit_id, metadata, "keyword_added", json!({"keyword": raw.trim()}))?;
        Ok(true)
    }

    /// Removes the keyword at `index`; out of range is a quiet no-op.
    pub fn remove_keyword(&mut self, unit_id: &str, index: usize) -> Result<bool> {
        let mut metadata = self.completed_result(unit_id)?;
        if !metadata.remove_keyword(index) {
            return Ok(false);
        }
        self.replace_result(unit_id, metadata, "keyword_removed", json!({"index": index}))?;
        Ok(true)
    }

    pub fn sort_keywords(&mut self, unit_id: &str, order: KeywordSort) -> Result<()> {
        let mut metadata = self.completed_result(unit_id)?;
        metadata.sort_keywords(order);
        let order_name = match order {
            KeywordSort::Alphabetical => "alphabetical",
            KeywordSort::Length => "length",
        };
        self.replace_result(unit_id, metadata, "keywords_sorted", json!({"order": order_name}))
    }

    fn replace_result(
        &mut self,
        unit_id: &str,
        metadata: tagsmith_contracts::metadata::Metadata,
        event_type: &str,
        detail: serde_json::Value,
    ) -> Result<()> {
        self.state
            .update_unit(unit_id, UnitPatch::ReplaceResult(metadata));
        let mut payload = map_object(detail);
        payload.insert("unit_id".to_string(), json!(unit_id));
        self.events.emit(event_type, payload)?;
        Ok(())
    }
}
