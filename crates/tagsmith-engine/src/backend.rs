use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use indexmap::IndexMap;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tagsmith_contracts::config::{GenerationConfig, TargetModel};
use tagsmith_contracts::metadata::{Metadata, SeoVariant, SeoVariants};

use crate::truncate_text;
use crate::unit::Asset;

/// The generation capability boundary. Request/response shaping and
/// JSON-schema enforcement live behind it; the orchestration core only
/// sees typed results.
pub trait MetadataBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, asset: &Asset, config: &GenerationConfig) -> Result<Metadata>;
    fn refine(
        &self,
        current: &Metadata,
        instruction: &str,
        config: &GenerationConfig,
    ) -> Result<Metadata>;
    fn point_analyze(&self, asset: &Asset, x_percent: u8, y_percent: u8) -> Result<Vec<String>>;
    fn preview_render(&self, prompt: &str, aspect_ratio_hint: &str) -> Result<Option<Vec<u8>>>;
    fn seo_variants(&self, metadata: &Metadata) -> Result<SeoVariants>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn MetadataBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: MetadataBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Box::new(backend));
    }

    pub fn take(&mut self, name: &str) -> Option<Box<dyn MetadataBackend>> {
        self.backends.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(DryrunBackend);
    registry.register(GeminiBackend::new());
    registry
}

/// Prompt-shaping traits of one target model.
#[derive(Debug, Clone, Copy)]
pub struct ModelProfile {
    pub label: &'static str,
    pub prompt_style: &'static str,
    /// Whether prompts for this model carry an `--ar` suffix.
    pub uses_aspect_suffix: bool,
}

pub fn profile_for(model: TargetModel) -> ModelProfile {
    match model {
        TargetModel::Midjourney => ModelProfile {
            label: "Midjourney",
            prompt_style:
                "comma-separated stylistic phrases ending with an --ar aspect parameter",
            uses_aspect_suffix: true,
        },
        TargetModel::StableDiffusion => ModelProfile {
            label: "Stable Diffusion",
            prompt_style: "dense descriptors with quality tags, no parameter flags",
            uses_aspect_suffix: false,
        },
        TargetModel::Firefly => ModelProfile {
            label: "Adobe Firefly",
            prompt_style: "a natural-language scene description",
            uses_aspect_suffix: false,
        },
        TargetModel::Dalle => ModelProfile {
            label: "DALL-E",
            prompt_style: "a single fluent descriptive sentence",
            uses_aspect_suffix: false,
        },
    }
}

/// Profiles in declaration order, for listing UIs.
pub fn model_profiles() -> IndexMap<TargetModel, ModelProfile> {
    TargetModel::ALL
        .iter()
        .map(|model| (*model, profile_for(*model)))
        .collect()
}

/// Aspect ratios the preview renderer supports; anything else snaps to
/// the nearest, unparseable input degrades to 1:1.
pub const PREVIEW_RATIOS: [&str; 5] = ["1:1", "16:9", "9:16", "4:3", "3:4"];

pub fn snap_aspect_ratio(raw: &str) -> &'static str {
    const CANDIDATES: [(&str, f64); 5] = [
        ("1:1", 1.0),
        ("16:9", 16.0 / 9.0),
        ("9:16", 9.0 / 16.0),
        ("4:3", 4.0 / 3.0),
        ("3:4", 3.0 / 4.0),
    ];
    let value = raw.trim().replace('/', ":");
    let Some((left_raw, right_raw)) = value.split_once(':') else {
        return "1:1";
    };
    let left = left_raw.trim().parse::<f64>().unwrap_or(0.0);
    let right = right_raw.trim().parse::<f64>().unwrap_or(0.0);
    if left <= 0.0 || right <= 0.0 {
        return "1:1";
    }
    let target = left / right;
    let mut best = "1:1";
    let mut best_delta = f64::MAX;
    for (name, ratio) in CANDIDATES {
        let delta = (ratio - target).abs();
        if delta < best_delta {
            best = name;
            best_delta = delta;
        }
    }
    best
}

/// Instruction text for a fresh generation, branched over the target
/// model profile and keyword density.
pub fn shape_generate_instruction(config: &GenerationConfig) -> String {
    let profile = profile_for(config.target_model);
    let (min_keywords, max_keywords) = config.keyword_density.keyword_range();
    let technical = if config.include_technical {
        "Include a technical_settings string with plausible camera settings."
    } else {
        "Set technical_settings to null."
    };
    let aspect = if profile.uses_aspect_suffix {
        format!(
            "End the prompt with '--ar {}'.",
            config.aspect_ratio.trim()
        )
    } else {
        format!("Compose for a {} aspect ratio.", config.aspect_ratio.trim())
    };
    format!(
        "Analyze the attached image and return stock-marketplace metadata as a single strict \
         JSON object with keys title, description, prompt, keywords, category, \
         technical_settings. The prompt field must target {} and read as {}. {} \
         Provide between {} and {} keywords ordered by relevance. {}",
        profile.label, profile.prompt_style, aspect, min_keywords, max_keywords, technical
    )
}

/// Instruction text for refining an existing result in place.
pub fn shape_refine_instruction(
    current: &Metadata,
    instruction: &str,
    config: &GenerationConfig,
) -> String {
    let context = serde_json::to_string(current).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Here is existing stock metadata as JSON: {} \
         Revise it according to this instruction: {}. \
         {} Return the full revised metadata as a single strict JSON object with the same keys.",
        context,
        instruction.trim(),
        shape_generate_instruction(config)
    )
}

/// Strict parse of a backend JSON body into [`Metadata`]. Missing or
/// mistyped fields are generation errors, not defaults.
pub fn parse_metadata(raw: &str, config: &GenerationConfig) -> Result<Metadata> {
    let cleaned = strip_code_fence(raw);
    let value: Value =
        serde_json::from_str(cleaned).context("generation response is not valid JSON")?;
    let Some(obj) = value.as_object() else {
        bail!("generation response is not a JSON object");
    };

    let keywords_raw = obj
        .get("keywords")
        .and_then(Value::as_array)
        .context("generation response missing 'keywords' array")?;
    let mut metadata = Metadata {
        title: required_string(obj, "title")?,
        description: required_string(obj, "description")?,
        prompt: required_string(obj, "prompt")?,
        keywords: Vec::new(),
        category: required_string(obj, "category")?,
        technical_settings: obj
            .get("technical_settings")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        generated_for_model: config.target_model.as_str().to_string(),
    };
    for keyword in keywords_raw {
        if let Some(text) = keyword.as_str() {
            metadata.add_keyword(text);
        }
    }
    if metadata.keywords.is_empty() {
        bail!("generation response carried no usable keywords");
    }
    if !config.include_technical {
        metadata.technical_settings = None;
    }
    Ok(metadata)
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Result<String> {
    let text = obj
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .with_context(|| format!("generation response missing '{key}'"))?;
    Ok(text.to_string())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

const KEYWORD_POOL: [&str; 48] = [
    "abstract", "backdrop", "background", "banner", "bright", "business", "closeup", "color",
    "colorful", "composition", "concept", "contemporary", "copy space", "creative", "decorative",
    "design", "detail", "editorial", "elegant", "fresh", "graphic", "horizontal", "illustration",
    "isolated", "landscape", "light", "lifestyle", "minimal", "modern", "natural", "nature",
    "nobody", "outdoor", "pattern", "photo", "portrait", "professional", "scene", "seasonal",
    "simple", "studio", "style", "texture", "tranquil", "vertical", "vibrant", "view", "wallpaper",
];

const CATEGORY_POOL: [&str; 8] = [
    "Abstract",
    "Business",
    "Lifestyle",
    "Nature",
    "Objects",
    "Technology",
    "Travel",
    "Urban",
];

/// Deterministic offline backend: metadata is derived from the asset's
/// content fingerprint, so repeated runs over the same file agree.
pub struct DryrunBackend;

impl DryrunBackend {
    fn digest(bytes: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().to_vec()
    }

    fn subject(digest: &[u8]) -> String {
        let first = KEYWORD_POOL[digest[0] as usize % KEYWORD_POOL.len()];
        let second = KEYWORD_POOL[digest[1] as usize % KEYWORD_POOL.len()];
        if first == second {
            first.to_string()
        } else {
            format!("{first} {second}")
        }
    }

    fn prompt_for(subject: &str, config: &GenerationConfig) -> String {
        match config.target_model {
            TargetModel::Midjourney => format!(
                "{subject}, polished stock imagery, soft studio light --ar {}",
                config.aspect_ratio.trim()
            ),
            TargetModel::StableDiffusion => {
                format!("{subject}, highly detailed, sharp focus, professional stock photo, 8k")
            }
            TargetModel::Firefly => {
                format!("A clean, well-lit stock photograph of {subject} with room for copy")
            }
            TargetModel::Dalle => {
                format!("A high quality stock image showing {subject} in natural light.")
            }
        }
    }
}

impl MetadataBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, asset: &Asset, config: &GenerationConfig) -> Result<Metadata> {
        let digest = Self::digest(&asset.bytes);
        let subject = Self::subject(&digest);
        let (keyword_count, _) = config.keyword_density.keyword_range();

        let mut metadata = Metadata {
            title: format!("Study of {subject} ({})", asset.fingerprint()),
            description: format!(
                "Stock-ready capture of {subject}, derived from {}.",
                asset.file_name
            ),
            prompt: Self::prompt_for(&subject, config),
            keywords: Vec::new(),
            category: CATEGORY_POOL[digest[2] as usize % CATEGORY_POOL.len()].to_string(),
            technical_settings: config
                .include_technical
                .then(|| "f/5.6, ISO 200, 1/250s, 50mm".to_string()),
            generated_for_model: config.target_model.as_str().to_string(),
        };
        let start = digest[3] as usize;
        for offset in 0..KEYWORD_POOL.len() {
            if metadata.keywords.len() >= keyword_count {
                break;
            }
            metadata.add_keyword(KEYWORD_POOL[(start + offset) % KEYWORD_POOL.len()]);
        }
        Ok(metadata)
    }

    fn refine(
        &self,
        current: &Metadata,
        instruction: &str,
        config: &GenerationConfig,
    ) -> Result<Metadata> {
        let mut next = current.clone();
        next.description = format!("{} Refined: {}.", current.description, instruction.trim());
        if profile_for(config.target_model).uses_aspect_suffix {
            next.prompt = match next.prompt.split_once("--ar") {
                Some((base, _)) => format!("{}--ar {}", base, config.aspect_ratio.trim()),
                None => format!("{} --ar {}", next.prompt, config.aspect_ratio.trim()),
            };
        }
        next.generated_for_model = config.target_model.as_str().to_string();
        Ok(next)
    }

    fn point_analyze(&self, asset: &Asset, x_percent: u8, y_percent: u8) -> Result<Vec<String>> {
        let digest = Self::digest(&asset.bytes);
        let horizontal = match x_percent {
            0..=33 => "left",
            34..=66 => "center",
            _ => "right",
        };
        let vertical = match y_percent {
            0..=33 => "upper",
            34..=66 => "middle",
            _ => "lower",
        };
        let index = digest[4] as usize + x_percent as usize + y_percent as usize;
        Ok(vec![
            format!("{vertical} {horizontal} detail"),
            KEYWORD_POOL[index % KEYWORD_POOL.len()].to_string(),
            "focal point".to_string(),
        ])
    }

    fn preview_render(&self, prompt: &str, aspect_ratio_hint: &str) -> Result<Option<Vec<u8>>> {
        let (width, height) = match snap_aspect_ratio(aspect_ratio_hint) {
            "16:9" => (512, 288),
            "9:16" => (288, 512),
            "4:3" => (512, 384),
            "3:4" => (384, 512),
            _ => (512, 512),
        };
        let digest = Self::digest(prompt.as_bytes());
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([digest[0], digest[1], digest[2]]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .context("preview encode failed")?;
        Ok(Some(bytes))
    }

    fn seo_variants(&self, metadata: &Metadata) -> Result<SeoVariants> {
        Ok(SeoVariants {
            descriptive: SeoVariant {
                title: metadata.title.clone(),
                description: metadata.description.clone(),
            },
            conceptual: SeoVariant {
                title: format!("Concept: {}", metadata.title),
                description: format!("Evokes {} as an idea.", metadata.category),
            },
            commercial: SeoVariant {
                title: format!("{} for campaigns", metadata.title),
                description: format!("{} Ready for commercial licensing.", metadata.description),
            },
        })
    }
}

/// Gemini-backed metadata generation over blocking HTTP.
pub struct GeminiBackend {
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: env::var("TAGSMITH_GEMINI_MODEL")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn call(&self, parts: Vec<Value>) -> Result<Value> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {"responseMimeType": "application/json"},
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }

    fn image_part(asset: &Asset) -> Value {
        json!({
            "inlineData": {
                "mimeType": asset.media_type.mime(),
                "data": BASE64.encode(&asset.bytes),
            }
        })
    }

    fn response_text(payload: &Value) -> Result<String> {
        let parts = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .context("Gemini response carried no candidates")?;
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("");
        if text.trim().is_empty() {
            bail!("Gemini response carried no text parts");
        }
        Ok(text)
    }
}

impl Default for GeminiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, asset: &Asset, config: &GenerationConfig) -> Result<Metadata> {
        let parts = vec![
            Self::image_part(asset),
            json!({"text": shape_generate_instruction(config)}),
        ];
        let payload = self.call(parts)?;
        parse_metadata(&Self::response_text(&payload)?, config)
    }

    fn refine(
        &self,
        current: &Metadata,
        instruction: &str,
        config: &GenerationConfig,
    ) -> Result<Metadata> {
        let parts = vec![json!({
            "text": shape_refine_instruction(current, instruction, config)
        })];
        let payload = self.call(parts)?;
        parse_metadata(&Self::response_text(&payload)?, config)
    }

    fn point_analyze(&self, asset: &Asset, x_percent: u8, y_percent: u8) -> Result<Vec<String>> {
        let parts = vec![
            Self::image_part(asset),
            json!({"text": format!(
                "Look at the element located at {x_percent}% from the left and {y_percent}% \
                 from the top of the attached image. Return a strict JSON array of 3 to 8 \
                 short stock keywords describing that element."
            )}),
        ];
        let payload = self.call(parts)?;
        let text = Self::response_text(&payload)?;
        let value: Value = serde_json::from_str(strip_code_fence(&text))
            .context("point analysis returned invalid JSON")?;
        let keywords = value
            .as_array()
            .context("point analysis did not return an array")?
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_string)
            .collect::<Vec<String>>();
        Ok(keywords)
    }

    fn preview_render(&self, _prompt: &str, _aspect_ratio_hint: &str) -> Result<Option<Vec<u8>>> {
        // Text-model transport; no image rendering capability here.
        Ok(None)
    }

    fn seo_variants(&self, metadata: &Metadata) -> Result<SeoVariants> {
        let context = serde_json::to_string(metadata)?;
        let parts = vec![json!({"text": format!(
            "Given this stock metadata JSON: {context} — return a strict JSON object with keys \
             descriptive, conceptual, commercial; each value an object with keys title and \
             description offering an SEO alternative from that angle."
        )})];
        let payload = self.call(parts)?;
        let text = Self::response_text(&payload)?;
        let variants: SeoVariants = serde_json::from_str(strip_code_fence(&text))
            .context("SEO variants response did not match the expected shape")?;
        Ok(variants)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn response_json_or_error(backend: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{backend} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{backend} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{backend} returned invalid JSON payload"))?;
    Ok(parsed)
}
