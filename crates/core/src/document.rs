//! Canonical export structure of an OCR run.
//!
//! Mirrors the page → block → line → word hierarchy. Geometry is an
//! `N × 2` array of `[x, y]` points normalized to the page size.

use ndarray::Array2;
use serde::Serialize;

use crate::export::{finite, nested};

#[derive(Debug, Clone, Serialize)]
pub struct OcrDocument {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// Zero-based position of the page in the source PDF.
    pub page_idx: usize,
    /// Rendered size in pixels as `(height, width)`.
    pub dimensions: (u32, u32),
    pub orientation: Prediction,
    pub language: Prediction,
    pub blocks: Vec<Block>,
}

/// A page-level estimate the pipeline does not compute; exported as nulls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Prediction {
    pub value: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    #[serde(serialize_with = "nested")]
    pub geometry: Array2<f32>,
    #[serde(serialize_with = "finite")]
    pub objectness_score: f32,
    pub lines: Vec<Line>,
    pub artefacts: Vec<Artefact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Line {
    #[serde(serialize_with = "nested")]
    pub geometry: Array2<f32>,
    #[serde(serialize_with = "finite")]
    pub objectness_score: f32,
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Word {
    pub value: String,
    #[serde(serialize_with = "finite")]
    pub confidence: f32,
    #[serde(serialize_with = "nested")]
    pub geometry: Array2<f32>,
    #[serde(serialize_with = "finite")]
    pub objectness_score: f32,
}

/// Non-text element of a block (figures, stamps). Never detected here.
#[derive(Debug, Clone, Serialize)]
pub struct Artefact {
    #[serde(rename = "type")]
    pub artefact_type: String,
    #[serde(serialize_with = "finite")]
    pub confidence: f32,
    #[serde(serialize_with = "nested")]
    pub geometry: Array2<f32>,
}

impl OcrDocument {
    pub fn word_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| &p.blocks)
            .flat_map(|b| &b.lines)
            .map(|l| l.words.len())
            .sum()
    }
}
