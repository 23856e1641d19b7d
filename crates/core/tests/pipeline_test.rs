use image::{Rgb, RgbImage};
use pdfocr_core::{
    run, AbortReason, Outcome, PageRasterizer, PipelineConfig, PipelineError, TextEngine,
};
use pdfocr_ocr::{CharSpan, OcrError, PageText, TextLine};
use pdfocr_render::RenderError;
use serde_json::Value;
use std::cell::Cell;
use std::path::{Path, PathBuf};

/// Returns `sizes.len()` blank pages, ignoring the file content.
struct FakeRasterizer {
    sizes: Vec<(u32, u32)>,
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(&self, _path: &Path, _dpi: u32) -> Result<Vec<RgbImage>, RenderError> {
        Ok(self
            .sizes
            .iter()
            .map(|&(w, h)| RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
            .collect())
    }
}

struct FailingRasterizer;

impl PageRasterizer for FailingRasterizer {
    fn rasterize(&self, path: &Path, _dpi: u32) -> Result<Vec<RgbImage>, RenderError> {
        Err(RenderError::Load {
            path: path.to_path_buf(),
            message: "not a PDF".to_string(),
        })
    }
}

/// Recognizes one line per page with the text configured for that page.
struct FakeEngine {
    texts: Vec<String>,
    drop_last_page: bool,
}

impl TextEngine for FakeEngine {
    fn recognize_pages(&mut self, pages: &[RgbImage]) -> Result<Vec<PageText>, OcrError> {
        let mut results: Vec<PageText> = pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                let text = self.texts.get(i).cloned().unwrap_or_default();
                PageText {
                    width: page.width(),
                    height: page.height(),
                    lines: if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![text_line(&text, page.width() as f32, page.height() as f32)]
                    },
                }
            })
            .collect();
        if self.drop_last_page {
            results.pop();
        }
        Ok(results)
    }
}

fn text_line(text: &str, width: f32, height: f32) -> TextLine {
    let n = text.chars().count() as f32;
    TextLine {
        points: [
            [width * 0.1, height * 0.1],
            [width * 0.9, height * 0.1],
            [width * 0.9, height * 0.2],
            [width * 0.1, height * 0.2],
        ],
        score: 0.95,
        text: text.to_string(),
        confidence: 0.9,
        chars: text
            .chars()
            .enumerate()
            .map(|(i, c)| CharSpan {
                value: c.to_string(),
                confidence: 0.9,
                start: i as f32 / n,
                end: (i + 1) as f32 / n,
            })
            .collect(),
        vertical: false,
    }
}

fn engine(texts: &[&str]) -> FakeEngine {
    FakeEngine {
        texts: texts.iter().map(|t| t.to_string()).collect(),
        drop_last_page: false,
    }
}

fn setup(dir: &Path) -> PipelineConfig {
    let input = dir.join("doc.pdf");
    std::fs::write(&input, b"%PDF-1.4").unwrap();
    PipelineConfig {
        input,
        output: dir.join("doc.json"),
        dpi: 400,
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn assert_points(geometry: &Value) {
    let points = geometry.as_array().unwrap();
    assert!(!points.is_empty());
    for point in points {
        let pair = point.as_array().unwrap();
        assert_eq!(pair.len(), 2);
        assert!(pair.iter().all(|v| v.is_number()));
    }
}

#[test]
fn test_pages_written_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(100, 200), (300, 400), (500, 600)],
    };

    let outcome = run(&config, &rasterizer, || Ok(engine(&["one", "two", "three"]))).unwrap();
    assert_eq!(
        outcome,
        Outcome::Written {
            path: config.output.clone(),
            pages: 3
        }
    );

    let json = read_json(&config.output);
    let pages = json["pages"].as_array().unwrap();
    assert_eq!(pages.len(), 3);
    for (i, (page, text)) in pages.iter().zip(["one", "two", "three"]).enumerate() {
        assert_eq!(page["page_idx"], i);
        let (w, h) = rasterizer.sizes[i];
        assert_eq!(page["dimensions"], serde_json::json!([h, w]));
        assert_eq!(page["blocks"][0]["lines"][0]["words"][0]["value"], text);
    }
}

#[test]
fn test_missing_input_aborts_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        input: dir.path().join("absent.pdf"),
        output: dir.path().join("absent.json"),
        dpi: 400,
    };
    let loaded = Cell::new(false);

    let outcome = run(&config, &FailingRasterizer, || {
        loaded.set(true);
        Ok(engine(&[]))
    })
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Aborted(AbortReason::InputNotFound(config.input.clone()))
    );
    assert!(!loaded.get());
    assert!(!config.output.exists());
}

#[test]
fn test_zero_pages_aborts_before_loading_models() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let loaded = Cell::new(false);

    let outcome = run(&config, &FakeRasterizer { sizes: Vec::new() }, || {
        loaded.set(true);
        Ok(engine(&[]))
    })
    .unwrap();

    assert_eq!(outcome, Outcome::Aborted(AbortReason::EmptyRender));
    assert!(!loaded.get());
    assert!(!config.output.exists());
}

#[test]
fn test_render_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());

    let err = run(&config, &FailingRasterizer, || Ok(engine(&[]))).unwrap_err();
    assert!(matches!(err, PipelineError::Render(_)));
    assert!(!config.output.exists());
}

#[test]
fn test_model_load_failure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(50, 50)],
    };

    let err = run(&config, &rasterizer, || -> Result<FakeEngine, OcrError> {
        Err(OcrError::ModelLoad("det.onnx missing".to_string()))
    })
    .unwrap_err();
    assert!(matches!(err, PipelineError::Ocr(OcrError::ModelLoad(_))));
    assert!(!config.output.exists());
}

#[test]
fn test_page_count_mismatch_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(50, 50), (50, 50)],
    };

    let err = run(&config, &rasterizer, || {
        Ok(FakeEngine {
            texts: Vec::new(),
            drop_last_page: true,
        })
    })
    .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::PageCountMismatch {
            expected: 2,
            got: 1
        }
    ));
    assert!(!config.output.exists());
}

#[test]
fn test_runs_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(120, 80), (80, 120)],
    };

    run(&config, &rasterizer, || Ok(engine(&["alpha beta", ""]))).unwrap();
    let first = std::fs::read(&config.output).unwrap();
    run(&config, &rasterizer, || Ok(engine(&["alpha beta", ""]))).unwrap();
    let second = std::fs::read(&config.output).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_non_ascii_text_is_literal() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(200, 100)],
    };

    run(&config, &rasterizer, || Ok(engine(&["Ünïcødé 文字"]))).unwrap();
    let raw = std::fs::read_to_string(&config.output).unwrap();
    assert!(raw.contains("Ünïcødé"));
    assert!(raw.contains("文字"));
    assert!(!raw.contains("\\u"));
}

#[test]
fn test_single_hello_page() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(400, 300)],
    };

    run(&config, &rasterizer, || Ok(engine(&["Hello"]))).unwrap();
    let json = read_json(&config.output);

    let page = &json["pages"][0];
    assert!(page["orientation"]["value"].is_null());
    assert!(page["language"]["confidence"].is_null());

    let block = &page["blocks"][0];
    assert_eq!(block["artefacts"], serde_json::json!([]));
    let words = block["lines"][0]["words"].as_array().unwrap();
    assert_eq!(words.len(), 1);
    assert_eq!(words[0]["value"], "Hello");
    let confidence = words[0]["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
}

#[test]
fn test_every_geometry_is_numeric_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path());
    let rasterizer = FakeRasterizer {
        sizes: vec![(300, 300), (300, 300)],
    };

    run(&config, &rasterizer, || Ok(engine(&["a b c", "d e"]))).unwrap();
    let json = read_json(&config.output);

    for page in json["pages"].as_array().unwrap() {
        for block in page["blocks"].as_array().unwrap() {
            assert_points(&block["geometry"]);
            for line in block["lines"].as_array().unwrap() {
                assert_points(&line["geometry"]);
                for word in line["words"].as_array().unwrap() {
                    assert_points(&word["geometry"]);
                    let points = word["geometry"].as_array().unwrap();
                    for coord in points.iter().flat_map(|p| p.as_array().unwrap()) {
                        let v = coord.as_f64().unwrap();
                        assert!((0.0..=1.0).contains(&v));
                    }
                }
            }
        }
    }
}

#[test]
fn test_output_in_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path());
    let out_dir: PathBuf = dir.path().join("out");
    std::fs::create_dir(&out_dir).unwrap();
    config.output = out_dir.join("result.json");

    run(&config, &FakeRasterizer { sizes: vec![(10, 10)] }, || Ok(engine(&[""]))).unwrap();
    let json = read_json(&config.output);
    assert_eq!(json["pages"][0]["blocks"], serde_json::json!([]));
}
