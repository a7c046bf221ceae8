use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Target model profile a generation result is shaped for.
///
/// Closed enumeration so prompt shaping can branch exhaustively; the
/// wire/export label is the snake_case string from `as_str`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetModel {
    Midjourney,
    StableDiffusion,
    Firefly,
    Dalle,
}

impl TargetModel {
    pub const ALL: [TargetModel; 4] = [
        TargetModel::Midjourney,
        TargetModel::StableDiffusion,
        TargetModel::Firefly,
        TargetModel::Dalle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetModel::Midjourney => "midjourney",
            TargetModel::StableDiffusion => "stable_diffusion",
            TargetModel::Firefly => "firefly",
            TargetModel::Dalle => "dalle",
        }
    }
}

impl fmt::Display for TargetModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetModel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "midjourney" => Ok(TargetModel::Midjourney),
            "stable_diffusion" | "sd" => Ok(TargetModel::StableDiffusion),
            "firefly" => Ok(TargetModel::Firefly),
            "dalle" | "dall_e" => Ok(TargetModel::Dalle),
            other => Err(format!("unknown target model '{other}'")),
        }
    }
}

/// How many keywords a generation should aim for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordDensity {
    Low,
    Standard,
    High,
}

impl KeywordDensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordDensity::Low => "low",
            KeywordDensity::Standard => "standard",
            KeywordDensity::High => "high",
        }
    }

    /// Inclusive keyword-count range handed to prompt shaping.
    pub fn keyword_range(&self) -> (usize, usize) {
        match self {
            KeywordDensity::Low => (10, 20),
            KeywordDensity::Standard => (25, 35),
            KeywordDensity::High => (40, 50),
        }
    }
}

impl fmt::Display for KeywordDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeywordDensity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(KeywordDensity::Low),
            "standard" | "medium" => Ok(KeywordDensity::Standard),
            "high" => Ok(KeywordDensity::High),
            other => Err(format!("unknown keyword density '{other}'")),
        }
    }
}

/// Shared settings every generation call reads at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub target_model: TargetModel,
    pub aspect_ratio: String,
    pub include_technical: bool,
    pub keyword_density: KeywordDensity,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            target_model: TargetModel::Midjourney,
            aspect_ratio: "1:1".to_string(),
            include_technical: true,
            keyword_density: KeywordDensity::Standard,
        }
    }
}

/// Clonable handle to the single shared, mutable [`GenerationConfig`].
///
/// The queue runner snapshots it per unit at dispatch time, so a config
/// change mid-batch only affects units that have not started yet.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<Mutex<GenerationConfig>>,
}

impl ConfigHandle {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(config)),
        }
    }

    pub fn snapshot(&self) -> GenerationConfig {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut GenerationConfig)) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
    }

    pub fn set_aspect_ratio(&self, ratio: &str) {
        self.update(|config| config.aspect_ratio = ratio.to_string());
    }
}
