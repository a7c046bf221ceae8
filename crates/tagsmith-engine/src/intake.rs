use anyhow::{bail, Context, Result};

use crate::unit::{Asset, MediaType};

/// Hard cap on pages taken from one PDF; protects against unbounded
/// memory use on large documents.
pub const MAX_PDF_PAGES: usize = 10;

/// Upscaling factor applied when rasterizing a PDF page (2x page point
/// size keeps enough detail for downstream analysis).
pub const PDF_RENDER_SCALE: f32 = 2.0;

/// A user-selected file before normalization.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// External rasterization capability for PDF pages. Rendering internals
/// are out of scope here; implementations return JPEG-encoded bytes.
pub trait PageRenderer {
    fn page_count(&self, pdf: &[u8]) -> Result<usize>;
    fn render_page(&self, pdf: &[u8], page_index: usize, scale: f32) -> Result<Vec<u8>>;
}

/// Default capability for deployments without a rasterizer. Every call
/// fails, which downgrades PDF inputs to whole-file passthrough.
pub struct UnavailableRenderer;

impl PageRenderer for UnavailableRenderer {
    fn page_count(&self, _pdf: &[u8]) -> Result<usize> {
        bail!("no PDF rasterizer configured")
    }

    fn render_page(&self, _pdf: &[u8], _page_index: usize, _scale: f32) -> Result<Vec<u8>> {
        bail!("no PDF rasterizer configured")
    }
}

/// Outcome of normalizing one file selection: the flat asset list in
/// selection order, plus the names of files rejected up front.
#[derive(Debug, Default)]
pub struct IntakeReport {
    pub assets: Vec<Asset>,
    pub skipped: Vec<String>,
}

impl IntakeReport {
    /// Aggregate "some files skipped" notice, or None when nothing was.
    pub fn skip_notice(&self) -> Option<String> {
        skip_notice(&self.skipped)
    }
}

pub(crate) fn skip_notice(skipped: &[String]) -> Option<String> {
    if skipped.is_empty() {
        return None;
    }
    Some(format!(
        "{} file(s) skipped (unsupported type): {}",
        skipped.len(),
        skipped.join(", ")
    ))
}

/// Turns a heterogeneous file selection into a flat ordered sequence of
/// single-asset inputs. All file-count expansion happens here; one asset
/// equals one eventual unit.
pub fn normalize_files(files: Vec<SourceFile>, renderer: &dyn PageRenderer) -> IntakeReport {
    let mut report = IntakeReport::default();
    for file in files {
        let Some(media_type) = MediaType::from_file_name(&file.file_name) else {
            report.skipped.push(file.file_name);
            continue;
        };
        match media_type {
            MediaType::Pdf => match decompose_pdf(&file, renderer) {
                Ok(pages) => report.assets.extend(pages),
                // Corrupt, encrypted, or renderer unavailable: the file
                // still yields one unit, as the original PDF.
                Err(_) => report.assets.push(Asset {
                    file_name: file.file_name,
                    media_type: MediaType::Pdf,
                    bytes: file.bytes,
                }),
            },
            _ => report.assets.push(Asset {
                file_name: file.file_name,
                media_type,
                bytes: file.bytes,
            }),
        }
    }
    report
}

/// Renders up to [`MAX_PDF_PAGES`] pages as independent JPEG assets
/// named `<stem>_page_<n>.jpg`. The multi-page relationship is not
/// recorded; each page stands alone from here on.
fn decompose_pdf(file: &SourceFile, renderer: &dyn PageRenderer) -> Result<Vec<Asset>> {
    let page_count = renderer
        .page_count(&file.bytes)
        .with_context(|| format!("page count failed for {}", file.file_name))?;
    if page_count == 0 {
        bail!("{} contains no pages", file.file_name);
    }

    let stem = file_stem(&file.file_name);
    let mut pages = Vec::new();
    for index in 0..page_count.min(MAX_PDF_PAGES) {
        let bytes = renderer
            .render_page(&file.bytes, index, PDF_RENDER_SCALE)
            .with_context(|| format!("page {} render failed for {}", index + 1, file.file_name))?;
        pages.push(Asset {
            file_name: format!("{}_page_{}.jpg", stem, index + 1),
            media_type: MediaType::Jpeg,
            bytes,
        });
    }
    Ok(pages)
}

fn file_stem(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}
