//! 图像预处理模块
//!
//! PaddleOCR 模型需要特定的图像预处理

use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use ndarray::{s, Array4, ArrayViewMut3, Axis};

/// 检测模型的输入尺寸限制
pub const DET_LIMIT_SIDE: u32 = 960;
pub const DET_LIMIT_MIN: u32 = 32;

/// 识别模型的输入高度
pub const REC_IMAGE_HEIGHT: u32 = 48;
pub const REC_IMAGE_WIDTH: u32 = 320;
/// 批内最宽输入，防止异常长的文字行撑爆显存
pub const REC_MAX_WIDTH: u32 = 3200;

/// 竖排判定: 高宽比不小于该值时旋转 90°
const VERTICAL_RATIO: f32 = 1.5;

/// 检测归一化参数 (ImageNet)
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 识别归一化参数 (PaddleOCR 标准: (x/255 - 0.5) / 0.5)
const REC_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const REC_STD: [f32; 3] = [0.5, 0.5, 0.5];

/// 为检测模型准备输入
///
/// 1. 缩放图像到合适大小（最长边不超过 limit_side）
/// 2. 确保尺寸是 32 的倍数
/// 3. 归一化
pub fn prepare_det_input(img: &RgbImage, limit_side: u32) -> Array4<f32> {
    let (orig_w, orig_h) = img.dimensions();
    let (new_w, new_h) = det_input_size(orig_w, orig_h, limit_side);

    let resized = imageops::resize(img, new_w, new_h, imageops::FilterType::Triangle);

    let mut batch = Array4::<f32>::zeros((1, 3, new_h as usize, new_w as usize));
    write_normalized(
        &resized,
        batch.index_axis_mut(Axis(0), 0),
        &DET_MEAN,
        &DET_STD,
    );
    batch
}

/// 计算检测输入尺寸（32 的倍数）
pub fn det_input_size(w: u32, h: u32, limit_side: u32) -> (u32, u32) {
    let ratio = calculate_det_ratio(w, h, limit_side);
    let round32 = |v: u32| -> u32 {
        let scaled = (v as f32 * ratio / 32.0).round() as u32 * 32;
        scaled.max(DET_LIMIT_MIN)
    };
    (round32(w), round32(h))
}

/// 计算检测模型的缩放比例
fn calculate_det_ratio(w: u32, h: u32, limit_side: u32) -> f32 {
    let max_side = w.max(h) as f32;
    if max_side > limit_side as f32 {
        limit_side as f32 / max_side
    } else {
        1.0
    }
}

/// 一个识别批次: NCHW 张量 + 每张图有效宽度占比
pub struct RecBatch {
    pub tensor: Array4<f32>,
    pub valid_ratios: Vec<f32>,
}

/// 识别批次的统一宽度，由批内最大宽高比决定
pub fn rec_batch_width(images: &[&RgbImage]) -> u32 {
    let base_ratio = REC_IMAGE_WIDTH as f32 / REC_IMAGE_HEIGHT as f32;
    let max_ratio = images
        .iter()
        .map(|img| img.width() as f32 / img.height().max(1) as f32)
        .fold(base_ratio, f32::max);
    ((REC_IMAGE_HEIGHT as f32 * max_ratio).ceil() as u32).min(REC_MAX_WIDTH)
}

/// 批量准备识别输入
///
/// 按高度缩放到 REC_IMAGE_HEIGHT，右侧填充到批次宽度（归一化后填 0，即灰色）
pub fn prepare_rec_batch(images: &[&RgbImage]) -> RecBatch {
    let batch_w = rec_batch_width(images);
    let mut tensor = Array4::<f32>::zeros((
        images.len(),
        3,
        REC_IMAGE_HEIGHT as usize,
        batch_w as usize,
    ));
    let mut valid_ratios = Vec::with_capacity(images.len());

    for (i, img) in images.iter().enumerate() {
        let (w, h) = img.dimensions();
        let ratio = w as f32 / h.max(1) as f32;
        let resized_w = ((REC_IMAGE_HEIGHT as f32 * ratio).ceil() as u32).clamp(1, batch_w);

        let resized = imageops::resize(
            *img,
            resized_w,
            REC_IMAGE_HEIGHT,
            imageops::FilterType::Lanczos3,
        );

        let target = tensor.slice_mut(s![i, .., .., 0..resized_w as usize]);
        write_normalized(&resized, target, &REC_MEAN, &REC_STD);
        valid_ratios.push(resized_w as f32 / batch_w as f32);
    }

    RecBatch {
        tensor,
        valid_ratios,
    }
}

/// 将 RGB 图像归一化写入 CHW 张量 (BGR 顺序，PP-OCR 要求)
fn write_normalized(
    img: &RgbImage,
    mut out: ArrayViewMut3<f32>,
    mean: &[f32; 3],
    std: &[f32; 3],
) {
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        // RGB -> BGR: (pixel / 255 - mean) / std
        out[[0, y, x]] = (pixel[2] as f32 / 255.0 - mean[0]) / std[0];
        out[[1, y, x]] = (pixel[1] as f32 / 255.0 - mean[1]) / std[1];
        out[[2, y, x]] = (pixel[0] as f32 / 255.0 - mean[2]) / std[2];
    }
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// 裁剪检测到的（可能倾斜的）文本区域并透视校正为水平图像
///
/// 返回校正后的图像，以及是否被判定为竖排（已逆时针旋转 90°）
pub fn crop_text_region(img: &RgbImage, points: &[[f32; 2]; 4]) -> (RgbImage, bool) {
    let [p0, p1, p2, p3] = *points;
    let crop_w = distance(p0, p1).max(distance(p2, p3)).round().max(1.0) as u32;
    let crop_h = distance(p0, p3).max(distance(p1, p2)).round().max(1.0) as u32;

    let from = [
        (p0[0], p0[1]),
        (p1[0], p1[1]),
        (p2[0], p2[1]),
        (p3[0], p3[1]),
    ];
    let to = [
        (0.0, 0.0),
        (crop_w as f32, 0.0),
        (crop_w as f32, crop_h as f32),
        (0.0, crop_h as f32),
    ];

    let cropped = match Projection::from_control_points(from, to) {
        Some(projection) => {
            let mut out = RgbImage::new(crop_w, crop_h);
            warp_into(
                img,
                &projection,
                Interpolation::Bilinear,
                Rgb([255, 255, 255]),
                &mut out,
            );
            out
        }
        None => {
            log::debug!("[OCR] 四边形退化 {:?}，改用外接矩形裁剪", points);
            crop_bounding_box(img, points)
        }
    };

    if cropped.height() as f32 / cropped.width() as f32 >= VERTICAL_RATIO {
        (imageops::rotate270(&cropped), true)
    } else {
        (cropped, false)
    }
}

fn crop_bounding_box(img: &RgbImage, points: &[[f32; 2]; 4]) -> RgbImage {
    let min_x = points.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let min_y = points.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let max_x = points.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max) as u32;
    let max_y = points.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max) as u32;

    let x0 = min_x.min(img.width().saturating_sub(1));
    let y0 = min_y.min(img.height().saturating_sub(1));
    let w = max_x.saturating_sub(x0).max(1).min(img.width() - x0);
    let h = max_y.saturating_sub(y0).max(1).min(img.height() - y0);

    imageops::crop_imm(img, x0, y0, w, h).to_image()
}
