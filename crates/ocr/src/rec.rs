//! 文字识别模块
//!
//! 使用 CTC 识别模型识别检测到的文字区域，并保留每个字符在行内的位置

use ndarray::{Array4, ArrayView2, ArrayViewD, Axis, Ix2};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::OcrError;
use crate::threading::{apply_session_threads, ThreadSettings};

/// CTC blank 类别
const BLANK_INDEX: usize = 0;

/// 文字识别器
pub struct TextRecognizer {
    session: Session,
    charset: Vec<String>,
}

/// 单个解码字符；start/end 为在文字行长度上的比例 (0-1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharSpan {
    pub value: String,
    pub confidence: f32,
    pub start: f32,
    pub end: f32,
}

/// 识别结果
#[derive(Debug, Clone, Default)]
pub struct RecognitionResult {
    pub text: String,
    pub confidence: f32,
    pub chars: Vec<CharSpan>,
}

impl TextRecognizer {
    /// 从 ONNX 模型文件和字典文件创建识别器
    pub fn new(
        model_path: &Path,
        dict_path: &Path,
        threads: ThreadSettings,
    ) -> Result<Self, OcrError> {
        let builder = Session::builder()
            .map_err(|e: ort::Error| OcrError::ModelLoad(e.to_string()))?;
        let builder = apply_session_threads(builder, threads)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;
        let session = builder.commit_from_file(model_path).map_err(|e| {
            OcrError::ModelLoad(format!(
                "识别模型 {}: {}",
                model_path.display(),
                e
            ))
        })?;

        let charset = load_charset(dict_path)?;
        log::info!("[OCR] 字典已加载: {} 个字符", charset.len());

        Ok(Self { session, charset })
    }

    /// 批量识别；valid_ratios 为每张图在批次宽度中的有效占比
    pub fn recognize_batch(
        &mut self,
        input: Array4<f32>,
        valid_ratios: &[f32],
    ) -> Result<Vec<RecognitionResult>, OcrError> {
        let batch_size = input.shape()[0];

        let input_tensor =
            Tensor::from_array(input).map_err(|e| OcrError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Inference(format!("识别: {}", e)))?;

        let output_view = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| OcrError::Inference(e.to_string()))?;
        let output_owned = output_view.to_owned();
        drop(outputs);

        decode_batch(&output_owned.view(), batch_size, valid_ratios, &self.charset)
    }
}

/// 解码 [batch, seq_len, num_classes] 的输出
fn decode_batch(
    output: &ArrayViewD<f32>,
    batch_size: usize,
    valid_ratios: &[f32],
    charset: &[String],
) -> Result<Vec<RecognitionResult>, OcrError> {
    let shape = output.shape();
    if shape.len() != 3 || shape[0] != batch_size {
        return Err(OcrError::Inference(format!(
            "识别输出形状异常: {:?} (批大小 {})",
            shape, batch_size
        )));
    }

    let mut results = Vec::with_capacity(batch_size);
    for b in 0..batch_size {
        let probs = output
            .index_axis(Axis(0), b)
            .into_dimensionality::<Ix2>()
            .map_err(|e| OcrError::Inference(e.to_string()))?;
        let valid_ratio = valid_ratios.get(b).copied().unwrap_or(1.0);
        results.push(decode_ctc(&probs, charset, valid_ratio));
    }
    Ok(results)
}

/// CTC 贪心解码
///
/// 连续相同类别合并为一个字符，字符的起止位置取其覆盖的时间步，
/// 再按有效宽度换算为行内比例。
pub fn decode_ctc(
    probs: &ArrayView2<f32>,
    charset: &[String],
    valid_ratio: f32,
) -> RecognitionResult {
    let (seq_len, _) = probs.dim();
    if seq_len == 0 {
        return RecognitionResult::default();
    }

    let valid_ratio = if valid_ratio > 0.0 { valid_ratio } else { 1.0 };
    let position = |t: usize| (t as f32 / seq_len as f32 / valid_ratio).clamp(0.0, 1.0);

    let mut chars: Vec<CharSpan> = Vec::new();
    let mut last_idx: Option<usize> = None;

    for (t, row) in probs.outer_iter().enumerate() {
        let (max_idx, max_prob) = row
            .iter()
            .enumerate()
            .fold((BLANK_INDEX, f32::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        if max_idx != BLANK_INDEX {
            if Some(max_idx) == last_idx {
                if let Some(current) = chars.last_mut() {
                    current.end = position(t + 1);
                }
            } else if let Some(symbol) = charset.get(max_idx - 1) {
                chars.push(CharSpan {
                    value: symbol.clone(),
                    confidence: max_prob.clamp(0.0, 1.0),
                    start: position(t),
                    end: position(t + 1),
                });
            }
        }
        last_idx = Some(max_idx);
    }

    let text: String = chars.iter().map(|c| c.value.as_str()).collect();
    let confidence = if chars.is_empty() {
        0.0
    } else {
        chars.iter().map(|c| c.confidence).sum::<f32>() / chars.len() as f32
    };

    RecognitionResult {
        text,
        confidence,
        chars,
    }
}

fn load_charset(path: &Path) -> Result<Vec<String>, OcrError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OcrError::ModelLoad(format!("字典 {}: {}", path.display(), e))
    })?;
    parse_charset(&content)
}

/// 字典每行一个字符，末尾追加空格类别（PP-OCR use_space_char）
fn parse_charset(content: &str) -> Result<Vec<String>, OcrError> {
    let mut charset: Vec<String> = content
        .lines()
        .map(|s| s.trim_end_matches('\r').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if charset.is_empty() {
        return Err(OcrError::ModelLoad("字典为空".to_string()));
    }
    charset.push(" ".to_string());
    Ok(charset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn charset() -> Vec<String> {
        parse_charset("H\ne\nl\no\n").unwrap()
    }

    /// 每个时间步给定类别的 one-hot 概率
    fn probs(steps: &[usize], num_classes: usize) -> Array2<f32> {
        let mut arr = Array2::<f32>::zeros((steps.len(), num_classes));
        for (t, &c) in steps.iter().enumerate() {
            arr[[t, c]] = 0.9;
        }
        arr
    }

    #[test]
    fn test_parse_charset_appends_space() {
        let cs = charset();
        assert_eq!(cs.len(), 5);
        assert_eq!(cs[4], " ");
    }

    #[test]
    fn test_parse_charset_rejects_empty() {
        assert!(parse_charset("\n\n").is_err());
    }

    #[test]
    fn test_decode_merges_repeats_and_skips_blank() {
        // 类别: 0 blank, 1 H, 2 e, 3 l, 4 o, 5 空格
        let p = probs(&[1, 1, 2, 0, 3, 0, 3, 4, 0, 0], 6);
        let result = decode_ctc(&p.view(), &charset(), 1.0);
        assert_eq!(result.text, "Hello");
        assert!((result.confidence - 0.9).abs() < 1e-6);
        assert_eq!(result.chars.len(), 5);
        assert!((result.chars[0].start - 0.0).abs() < 1e-6);
        assert!((result.chars[0].end - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_decode_positions_respect_valid_ratio() {
        let p = probs(&[1, 0, 0, 0], 6);
        let result = decode_ctc(&p.view(), &charset(), 0.5);
        assert!((result.chars[0].end - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_all_blank() {
        let p = probs(&[0, 0, 0], 6);
        let result = decode_ctc(&p.view(), &charset(), 1.0);
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_decode_batch_checks_shape() {
        let arr = ndarray::ArrayD::<f32>::zeros(vec![2, 4]);
        assert!(decode_batch(&arr.view(), 2, &[1.0, 1.0], &charset()).is_err());
    }
}
