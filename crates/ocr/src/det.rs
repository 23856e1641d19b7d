//! 文字检测模块
//!
//! 使用 DBNet (Differentiable Binarization) 模型检测文字区域，
//! 输出任意角度的四边形（最小外接矩形），不假设页面是水平的。

use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::min_area_rect;
use ndarray::{Array2, ArrayView2, Axis, Ix2};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::error::OcrError;
use crate::preprocess;
use crate::threading::{apply_session_threads, ThreadSettings};

/// 检测阈值
const THRESH: f32 = 0.3;
const BOX_THRESH: f32 = 0.6;
const MIN_SIZE: f32 = 3.0;
const UNCLIP_RATIO: f32 = 1.5;
const MAX_CANDIDATES: usize = 1000;
/// 同一行判定的纵向容差（像素）
const LINE_TOLERANCE: f32 = 10.0;

/// 文字检测器
pub struct TextDetector {
    session: Session,
    limit_side: u32,
}

/// 检测到的文字框，四个角点按 左上、右上、右下、左下 顺序
#[derive(Debug, Clone)]
pub struct TextBox {
    pub points: [[f32; 2]; 4],
    pub score: f32,
}

impl TextDetector {
    /// 从 ONNX 模型文件创建检测器
    pub fn new(
        model_path: &Path,
        limit_side: u32,
        threads: ThreadSettings,
    ) -> Result<Self, OcrError> {
        let builder = Session::builder()
            .map_err(|e: ort::Error| OcrError::ModelLoad(e.to_string()))?;
        let builder = apply_session_threads(builder, threads)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;
        let session = builder.commit_from_file(model_path).map_err(|e| {
            OcrError::ModelLoad(format!(
                "检测模型 {}: {}",
                model_path.display(),
                e
            ))
        })?;

        Ok(Self {
            session,
            limit_side: limit_side.max(preprocess::DET_LIMIT_MIN),
        })
    }

    /// 检测图像中的文字区域，坐标为原图像素坐标
    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<TextBox>, OcrError> {
        let (orig_w, orig_h) = img.dimensions();
        let input = preprocess::prepare_det_input(img, self.limit_side);

        let input_tensor =
            Tensor::from_array(input).map_err(|e| OcrError::Inference(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| OcrError::Inference(format!("检测: {}", e)))?;

        // 复制概率图以结束对 outputs 的借用
        let output_view = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| OcrError::Inference(e.to_string()))?;
        let prob_map = squeeze_prob_map(output_view.view())?;
        drop(outputs);

        Ok(boxes_from_prob_map(&prob_map.view(), orig_w, orig_h))
    }
}

/// 将 [1, 1, H, W] 或 [1, H, W] 的输出压缩为 [H, W]
fn squeeze_prob_map(output: ndarray::ArrayViewD<f32>) -> Result<Array2<f32>, OcrError> {
    let shape = output.shape().to_vec();
    if shape.len() < 2 {
        return Err(OcrError::Inference(format!(
            "检测输出形状异常: {:?}",
            shape
        )));
    }
    let mut view = output;
    while view.ndim() > 2 {
        view = view.index_axis_move(Axis(0), 0);
    }
    view.into_dimensionality::<Ix2>()
        .map(|v| v.to_owned())
        .map_err(|e| OcrError::Inference(format!("检测输出 {:?}: {}", shape, e)))
}

/// DB 后处理：二值化 -> 轮廓 -> 最小外接矩形 -> 打分 -> 外扩 -> 缩放回原图
pub fn boxes_from_prob_map(prob: &ArrayView2<f32>, orig_w: u32, orig_h: u32) -> Vec<TextBox> {
    let (h, w) = prob.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }

    let mut mask = GrayImage::new(w as u32, h as u32);
    for ((y, x), &val) in prob.indexed_iter() {
        if val > THRESH {
            mask.put_pixel(x as u32, y as u32, Luma([255]));
        }
    }

    let scale_x = orig_w as f32 / w as f32;
    let scale_y = orig_h as f32 / h as f32;
    let mut boxes = Vec::new();

    let contours = find_contours::<i32>(&mask);
    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .take(MAX_CANDIDATES)
    {
        if contour.points.len() < 4 {
            continue;
        }

        let rect = min_area_rect(&contour.points);
        let quad = order_points(rect.map(|p| [p.x as f32, p.y as f32]));
        if short_side(&quad) < MIN_SIZE {
            continue;
        }

        let score = box_score(prob, &quad);
        if score < BOX_THRESH {
            continue;
        }

        let expanded = unclip(&quad, UNCLIP_RATIO);
        if short_side(&expanded) < MIN_SIZE + 2.0 {
            continue;
        }

        let points = expanded.map(|[x, y]| {
            [
                (x * scale_x).clamp(0.0, orig_w as f32),
                (y * scale_y).clamp(0.0, orig_h as f32),
            ]
        });
        boxes.push(TextBox { points, score });
    }

    sort_reading_order(&mut boxes);
    boxes
}

/// 角点排序：左上、右上、右下、左下
pub fn order_points(points: [[f32; 2]; 4]) -> [[f32; 2]; 4] {
    let mut sorted = points;
    sorted.sort_by(|a, b| a[0].total_cmp(&b[0]));

    let (tl, bl) = if sorted[0][1] <= sorted[1][1] {
        (sorted[0], sorted[1])
    } else {
        (sorted[1], sorted[0])
    };
    let (tr, br) = if sorted[2][1] <= sorted[3][1] {
        (sorted[2], sorted[3])
    } else {
        (sorted[3], sorted[2])
    };

    [tl, tr, br, bl]
}

fn edge_len(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn short_side(quad: &[[f32; 2]; 4]) -> f32 {
    edge_len(quad[0], quad[1]).min(edge_len(quad[0], quad[3]))
}

/// 四边形内的平均概率
fn box_score(prob: &ArrayView2<f32>, quad: &[[f32; 2]; 4]) -> f32 {
    let (h, w) = prob.dim();
    let lo = |axis: usize| quad.iter().map(|p| p[axis]).fold(f32::INFINITY, f32::min);
    let hi = |axis: usize| quad.iter().map(|p| p[axis]).fold(f32::NEG_INFINITY, f32::max);
    let min_x = lo(0).floor().max(0.0) as usize;
    let max_x = (hi(0).ceil() as usize).min(w - 1);
    let min_y = lo(1).floor().max(0.0) as usize;
    let max_y = (hi(1).ceil() as usize).min(h - 1);

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if point_in_quad([x as f32, y as f32], quad) {
                sum += prob[[y, x]];
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// 凸四边形包含判定（含边界）
fn point_in_quad(p: [f32; 2], quad: &[[f32; 2]; 4]) -> bool {
    let mut sign = 0.0f32;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross.abs() < 1e-6 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// 按 area * ratio / perimeter 的距离向外扩展矩形
pub fn unclip(quad: &[[f32; 2]; 4], ratio: f32) -> [[f32; 2]; 4] {
    let [p0, p1, _, p3] = *quad;
    let w = edge_len(p0, p1);
    let h = edge_len(p0, p3);
    if w <= f32::EPSILON || h <= f32::EPSILON {
        return *quad;
    }

    let distance = w * h * ratio / (2.0 * (w + h));
    let u = [(p1[0] - p0[0]) / w, (p1[1] - p0[1]) / w];
    let v = [(p3[0] - p0[0]) / h, (p3[1] - p0[1]) / h];
    let center = [
        quad.iter().map(|p| p[0]).sum::<f32>() / 4.0,
        quad.iter().map(|p| p[1]).sum::<f32>() / 4.0,
    ];
    let half_w = w / 2.0 + distance;
    let half_h = h / 2.0 + distance;

    let corner = |su: f32, sv: f32| {
        [
            center[0] + su * half_w * u[0] + sv * half_h * v[0],
            center[1] + su * half_w * u[1] + sv * half_h * v[1],
        ]
    };

    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
    ]
}

/// 阅读顺序：从上到下，同一行内从左到右
fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        a.points[0][1]
            .total_cmp(&b.points[0][1])
            .then(a.points[0][0].total_cmp(&b.points[0][0]))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let same_line =
                (boxes[j + 1].points[0][1] - boxes[j].points[0][1]).abs() < LINE_TOLERANCE;
            if same_line && boxes[j + 1].points[0][0] < boxes[j].points[0][0] {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}
