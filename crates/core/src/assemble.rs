//! Build the export hierarchy from recognized lines.
//!
//! Every detected line becomes one `Line`. Words are whitespace-separated runs
//! of decoded characters, located by slicing the line quad between the first
//! character's start and the last character's end. There is no layout
//! analysis: all lines of a page go into a single block.

use imageproc::point::Point;
use ndarray::Array2;
use pdfocr_ocr::{order_points, CharSpan, PageText, TextLine};

use crate::document::{Block, Line, OcrDocument, Page, Prediction, Word};

type Quad = [[f32; 2]; 4];

pub fn assemble_document(pages: &[PageText]) -> OcrDocument {
    OcrDocument {
        pages: pages
            .iter()
            .enumerate()
            .map(|(page_idx, page)| assemble_page(page_idx, page))
            .collect(),
    }
}

fn assemble_page(page_idx: usize, page: &PageText) -> Page {
    let (kept, lines): (Vec<&TextLine>, Vec<Line>) = page
        .lines
        .iter()
        .filter_map(|line| Some((line, assemble_line(line, page.width, page.height)?)))
        .unzip();

    let blocks = if lines.is_empty() {
        Vec::new()
    } else {
        let geometry = block_quad(&kept)
            .map(|quad| normalize(&quad, page.width, page.height))
            .unwrap_or_else(|| Array2::zeros((4, 2)));
        vec![Block {
            geometry,
            objectness_score: mean(lines.iter().map(|l| l.objectness_score)),
            lines,
            artefacts: Vec::new(),
        }]
    };

    Page {
        page_idx,
        dimensions: (page.height, page.width),
        orientation: Prediction::default(),
        language: Prediction::default(),
        blocks,
    }
}

fn assemble_line(line: &TextLine, width: u32, height: u32) -> Option<Line> {
    let words: Vec<Word> = if line.chars.is_empty() {
        // no timing information: the whole line is one word
        let value = line.text.trim();
        if value.is_empty() {
            Vec::new()
        } else {
            vec![Word {
                value: value.to_string(),
                confidence: line.confidence.clamp(0.0, 1.0),
                geometry: normalize(&line.points, width, height),
                objectness_score: line.score,
            }]
        }
    } else {
        split_words(&line.chars)
            .into_iter()
            .map(|run| {
                let quad = slice_quad(&line.points, run.start, run.end, line.vertical);
                Word {
                    value: run.value,
                    confidence: run.confidence,
                    geometry: normalize(&quad, width, height),
                    objectness_score: line.score,
                }
            })
            .collect()
    };

    if words.is_empty() {
        return None;
    }

    Some(Line {
        geometry: normalize(&line.points, width, height),
        objectness_score: mean(words.iter().map(|w| w.objectness_score)),
        words,
    })
}

#[derive(Debug, Clone, PartialEq)]
struct WordRun {
    value: String,
    confidence: f32,
    start: f32,
    end: f32,
}

fn split_words(chars: &[CharSpan]) -> Vec<WordRun> {
    let mut runs = Vec::new();
    let mut current: Vec<&CharSpan> = Vec::new();

    for span in chars {
        if span.value.trim().is_empty() {
            runs.extend(finish_run(&current));
            current.clear();
        } else {
            current.push(span);
        }
    }
    runs.extend(finish_run(&current));
    runs
}

fn finish_run(chars: &[&CharSpan]) -> Option<WordRun> {
    let first = chars.first()?;
    let last = chars.last()?;
    let start = first.start.clamp(0.0, 1.0);
    let end = last.end.clamp(start, 1.0);
    Some(WordRun {
        value: chars.iter().map(|c| c.value.as_str()).collect(),
        confidence: mean(chars.iter().map(|c| c.confidence)).clamp(0.0, 1.0),
        start,
        end,
    })
}

/// Part of the line quad between fractions `a` and `b` of its reading axis.
///
/// Horizontal lines read along top-left -> top-right, vertical lines along
/// top-left -> bottom-left.
fn slice_quad(quad: &Quad, a: f32, b: f32, vertical: bool) -> Quad {
    let [p0, p1, p2, p3] = *quad;
    if vertical {
        [lerp(p0, p3, a), lerp(p1, p2, a), lerp(p1, p2, b), lerp(p0, p3, b)]
    } else {
        [lerp(p0, p1, a), lerp(p0, p1, b), lerp(p3, p2, b), lerp(p3, p2, a)]
    }
}

fn lerp(from: [f32; 2], to: [f32; 2], t: f32) -> [f32; 2] {
    [
        from[0] + (to[0] - from[0]) * t,
        from[1] + (to[1] - from[1]) * t,
    ]
}

/// Minimum-area rectangle around the given lines, in pixels.
fn block_quad(lines: &[&TextLine]) -> Option<Quad> {
    let points: Vec<Point<i32>> = lines
        .iter()
        .flat_map(|line| line.points.iter())
        .map(|p| Point::new(p[0].round() as i32, p[1].round() as i32))
        .collect();
    if points.is_empty() {
        return None;
    }

    let rect = imageproc::geometry::min_area_rect(&points);
    Some(order_points(rect.map(|p| [p.x as f32, p.y as f32])))
}

fn normalize(quad: &Quad, width: u32, height: u32) -> Array2<f32> {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    Array2::from_shape_fn((4, 2), |(i, axis)| {
        let scale = if axis == 0 { w } else { h };
        (quad[i][axis] / scale).clamp(0.0, 1.0)
    })
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}
