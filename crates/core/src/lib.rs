//! Core orchestration: turns rendered pages and OCR output into the JSON
//! export.

pub mod assemble;
pub mod document;
pub mod export;
pub mod pipeline;

pub use assemble::assemble_document;
pub use document::{Artefact, Block, Line, OcrDocument, Page, Prediction, Word};
pub use export::{to_json_bytes, write_json, ExportError};
pub use pipeline::{run, AbortReason, Outcome, PageRasterizer, PipelineConfig, TextEngine};

use pdfocr_ocr::OcrError;
use pdfocr_render::RenderError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("rasterization failed")]
    Render(#[from] RenderError),
    #[error("OCR failed")]
    Ocr(#[from] OcrError),
    #[error("export failed")]
    Export(#[from] ExportError),
    #[error("OCR returned {got} page result(s) for {expected} rendered page(s)")]
    PageCountMismatch { expected: usize, got: usize },
}
