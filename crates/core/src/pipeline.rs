//! Rasterize → OCR → export, run once per input PDF.

use image::RgbImage;
use pdfocr_ocr::{OcrError, PaddleOcrEngine, PageText};
use pdfocr_render::{PdfiumLocator, Rasterizer, RenderError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::assemble::assemble_document;
use crate::export::write_json;
use crate::PipelineError;

/// Produces one RGB image per PDF page, in document order.
pub trait PageRasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<Vec<RgbImage>, RenderError>;
}

/// Recognizes text on an ordered set of page images.
pub trait TextEngine {
    fn recognize_pages(&mut self, pages: &[RgbImage]) -> Result<Vec<PageText>, OcrError>;
}

impl PageRasterizer for Rasterizer {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<Vec<RgbImage>, RenderError> {
        Rasterizer::rasterize(self, path, dpi)
    }
}

/// Binds PDFium lazily, so a missing input never requires the library.
impl PageRasterizer for PdfiumLocator {
    fn rasterize(&self, path: &Path, dpi: u32) -> Result<Vec<RgbImage>, RenderError> {
        Rasterizer::new(self.bind()?).rasterize(path, dpi)
    }
}

impl TextEngine for PaddleOcrEngine {
    fn recognize_pages(&mut self, pages: &[RgbImage]) -> Result<Vec<PageText>, OcrError> {
        PaddleOcrEngine::recognize_pages(self, pages)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub dpi: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    InputNotFound(PathBuf),
    EmptyRender,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::InputNotFound(path) => {
                write!(f, "input PDF not found: {}", path.display())
            }
            AbortReason::EmptyRender => write!(f, "no pages were rendered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written { path: PathBuf, pages: usize },
    Aborted(AbortReason),
}

/// Run the whole conversion.
///
/// `load_engine` is only called once pages exist, so an empty or missing
/// document never loads the models. On `Aborted` or `Err` no output file is
/// created.
pub fn run<R, E, L>(
    config: &PipelineConfig,
    rasterizer: &R,
    load_engine: L,
) -> crate::Result<Outcome>
where
    R: PageRasterizer + ?Sized,
    E: TextEngine,
    L: FnOnce() -> Result<E, OcrError>,
{
    if !config.input.is_file() {
        log::warn!("[Pipeline] input not found: {}", config.input.display());
        return Ok(Outcome::Aborted(AbortReason::InputNotFound(
            config.input.clone(),
        )));
    }

    let start = Instant::now();
    let images = rasterizer.rasterize(&config.input, config.dpi)?;
    if images.is_empty() {
        log::warn!("[Pipeline] {} produced no pages", config.input.display());
        return Ok(Outcome::Aborted(AbortReason::EmptyRender));
    }
    log::info!(
        "[Pipeline] rendered {} page(s) in {} ms",
        images.len(),
        start.elapsed().as_millis()
    );

    let expected = images.len();
    let mut engine = load_engine()?;
    let pages = engine.recognize_pages(&images)?;
    drop(images);

    if pages.len() != expected {
        return Err(PipelineError::PageCountMismatch {
            expected,
            got: pages.len(),
        });
    }

    let document = assemble_document(&pages);
    log::info!(
        "[Pipeline] {} word(s) on {} page(s)",
        document.word_count(),
        document.pages.len()
    );
    write_json(&document, &config.output)?;

    Ok(Outcome::Written {
        path: config.output.clone(),
        pages: expected,
    })
}
