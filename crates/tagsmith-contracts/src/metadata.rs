use serde::{Deserialize, Serialize};

/// Generated stock-marketplace metadata for one unit.
///
/// Mutable after generation: field edits and keyword operations replace
/// the stored value wholesale through the batch state, never in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub keywords: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub technical_settings: Option<String>,
    pub generated_for_model: String,
}

/// Keyword reordering applied by the unit mutator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordSort {
    Alphabetical,
    Length,
}

impl Metadata {
    /// Appends a keyword unless it already exists verbatim after trimming.
    ///
    /// Returns true when the keyword was actually added. Insertion order
    /// is meaningful (it drives display and CSV/TXT export order).
    pub fn add_keyword(&mut self, raw: &str) -> bool {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return false;
        }
        if self.keywords.iter().any(|existing| existing == trimmed) {
            return false;
        }
        self.keywords.push(trimmed.to_string());
        true
    }

    /// Removes the keyword at `index`; out of range is a no-op.
    pub fn remove_keyword(&mut self, index: usize) -> bool {
        if index >= self.keywords.len() {
            return false;
        }
        self.keywords.remove(index);
        true
    }

    /// Stable reorder of the full keyword sequence. Never deduplicates.
    pub fn sort_keywords(&mut self, order: KeywordSort) {
        match order {
            KeywordSort::Alphabetical => self.keywords.sort_by(|a, b| a.cmp(b)),
            KeywordSort::Length => self.keywords.sort_by(|a, b| a.len().cmp(&b.len())),
        }
    }
}

/// One SEO title/description alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoVariant {
    pub title: String,
    pub description: String,
}

/// The three SEO angles returned by the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeoVariants {
    pub descriptive: SeoVariant,
    pub conceptual: SeoVariant,
    pub commercial: SeoVariant,
}
