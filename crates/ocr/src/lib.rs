//! PP-OCR ONNX Runtime 集成
//!
//! 基于 ONNX Runtime 的 OCR 识别库：DBNet 检测任意角度文字行，
//! CTC 模型识别文字，并输出每个字符在行内的位置。

mod det;
mod error;
mod models;
mod preprocess;
mod rec;
mod threading;

pub use det::{order_points, TextBox, TextDetector};
pub use error::OcrError;
pub use models::{install_models, DownloadProgress, ModelManifest, ModelPaths, ModelSource};
pub use preprocess::DET_LIMIT_SIDE;
pub use rec::{CharSpan, RecognitionResult, TextRecognizer};
pub use threading::ThreadSettings;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// OCR 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// 检测模型路径
    pub det_model_path: PathBuf,
    /// 识别模型路径
    pub rec_model_path: PathBuf,
    /// 字典文件路径
    pub dict_path: PathBuf,
    /// 检测输入最长边
    pub det_limit_side: u32,
    pub intra_threads: Option<usize>,
    pub inter_threads: Option<usize>,
}

impl OcrConfig {
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            det_model_path: paths.det,
            rec_model_path: paths.rec,
            dict_path: paths.dict,
            det_limit_side: DET_LIMIT_SIDE,
            intra_threads: None,
            inter_threads: None,
        }
    }
}

/// 一行识别结果，points 为页面像素坐标（左上、右上、右下、左下）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub points: [[f32; 2]; 4],
    /// 检测置信度
    pub score: f32,
    pub text: String,
    /// 识别置信度
    pub confidence: f32,
    pub chars: Vec<CharSpan>,
    /// 竖排行：字符沿 左上 -> 左下 方向排列
    pub vertical: bool,
}

/// 单页识别结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub width: u32,
    pub height: u32,
    pub lines: Vec<TextLine>,
}

/// Paddle OCR 引擎 (PP-OCR ONNX)
pub struct PaddleOcrEngine {
    detector: TextDetector,
    recognizer: TextRecognizer,
}

/// 待识别的裁剪区域
struct LineCrop {
    page_idx: usize,
    text_box: TextBox,
    image: RgbImage,
    vertical: bool,
}

const DEFAULT_MAX_BATCH_SIZE: usize = 32;

impl PaddleOcrEngine {
    /// 创建 Paddle OCR 引擎
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let threads = ThreadSettings::resolve(config.intra_threads, config.inter_threads);

        log::info!(
            "[OCR] 加载检测模型: {}",
            config.det_model_path.display()
        );
        let detector = TextDetector::new(&config.det_model_path, config.det_limit_side, threads)?;

        log::info!(
            "[OCR] 加载识别模型: {}",
            config.rec_model_path.display()
        );
        let recognizer = TextRecognizer::new(&config.rec_model_path, &config.dict_path, threads)?;

        log::info!("[OCR] 引擎就绪");
        Ok(Self {
            detector,
            recognizer,
        })
    }

    /// 识别多页图像，结果顺序与输入一致
    pub fn recognize_pages(&mut self, pages: &[RgbImage]) -> Result<Vec<PageText>, OcrError> {
        let total = pages.len();

        // 1. 逐页检测（各页尺寸不同，无法拼批）
        let det_start = Instant::now();
        let mut crops: Vec<LineCrop> = Vec::new();
        for (page_idx, page) in pages.iter().enumerate() {
            let boxes = self.detector.detect(page)?;
            log::info!(
                "[OCR] 第 {}/{} 页: {} 个文字区域",
                page_idx + 1,
                total,
                boxes.len()
            );
            for text_box in boxes {
                let (image, vertical) = preprocess::crop_text_region(page, &text_box.points);
                crops.push(LineCrop {
                    page_idx,
                    text_box,
                    image,
                    vertical,
                });
            }
        }
        log::info!("[OCR] 检测耗时 {} ms", det_start.elapsed().as_millis());

        // 2. 全部文字行一起分批识别
        let rec_start = Instant::now();
        let rec_results = run_rec_batches(&mut self.recognizer, &crops, DEFAULT_MAX_BATCH_SIZE)?;
        log::info!(
            "[OCR] 识别 {} 行耗时 {} ms",
            crops.len(),
            rec_start.elapsed().as_millis()
        );

        let mut results: Vec<PageText> = pages
            .iter()
            .map(|p| PageText {
                width: p.width(),
                height: p.height(),
                lines: Vec::new(),
            })
            .collect();

        for (crop, rec) in crops.into_iter().zip(rec_results) {
            if rec.text.trim().is_empty() {
                continue;
            }
            log::debug!(
                "[OCR] 第 {} 页: \"{}\" (置信度 {:.2})",
                crop.page_idx + 1,
                rec.text,
                rec.confidence
            );
            results[crop.page_idx].lines.push(TextLine {
                points: crop.text_box.points,
                score: crop.text_box.score,
                text: rec.text,
                confidence: rec.confidence,
                chars: rec.chars,
                vertical: crop.vertical,
            });
        }

        Ok(results)
    }
}

/// 按宽高比排序后分批识别，返回与 crops 同序的结果
fn run_rec_batches(
    recognizer: &mut TextRecognizer,
    crops: &[LineCrop],
    batch_size: usize,
) -> Result<Vec<RecognitionResult>, OcrError> {
    let mut order: Vec<usize> = (0..crops.len()).collect();
    order.sort_by(|&a, &b| {
        aspect_ratio(&crops[a].image).total_cmp(&aspect_ratio(&crops[b].image))
    });

    let mut results = vec![RecognitionResult::default(); crops.len()];
    for chunk in order.chunks(batch_size.max(1)) {
        let images: Vec<&RgbImage> = chunk.iter().map(|&i| &crops[i].image).collect();
        let batch = preprocess::prepare_rec_batch(&images);
        let batch_results = recognizer.recognize_batch(batch.tensor, &batch.valid_ratios)?;
        for (&idx, result) in chunk.iter().zip(batch_results) {
            results[idx] = result;
        }
    }

    Ok(results)
}

fn aspect_ratio(img: &RgbImage) -> f32 {
    img.width() as f32 / img.height().max(1) as f32
}

/// 检查 OCR 模型是否已安装
pub fn is_models_installed(config: &OcrConfig) -> bool {
    [
        &config.det_model_path,
        &config.rec_model_path,
        &config.dict_path,
    ]
    .iter()
    .all(|p| Path::new(p).exists())
}
