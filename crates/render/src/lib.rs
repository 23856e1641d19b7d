//! PDF rasterization for OCR.
//!
//! Pages are rendered with PDFium and flattened to RGB buffers in document
//! order.

use image::{DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};

/// Default rasterization resolution.
pub const DEFAULT_DPI: u32 = 400;

/// PDF user space unit: 72 points per inch.
const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("PDFium library unavailable: {0}")]
    LibraryUnavailable(String),
    #[error("failed to load PDF {path}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("failed to render page {page}: {message}")]
    Page { page: usize, message: String },
    #[error("invalid DPI: {0}")]
    InvalidDpi(u32),
}

/// Where to look for the PDFium shared library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumLocator {
    /// Directory checked before every built-in location.
    pub library_dir: Option<PathBuf>,
}

impl PdfiumLocator {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    /// Candidate directories, most specific first.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(dir) = &self.library_dir {
            paths.push(dir.clone());
        }

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                paths.push(exe_dir.join("libs"));
                paths.push(exe_dir.to_path_buf());

                // .app/Contents/MacOS/app -> .app/Contents/Resources/libs
                #[cfg(target_os = "macos")]
                {
                    if let Some(contents_dir) = exe_dir.parent() {
                        paths.push(contents_dir.join("Resources").join("libs"));
                        paths.push(contents_dir.join("Resources"));
                    }
                }

                #[cfg(target_os = "linux")]
                {
                    if let Ok(appdir) = std::env::var("APPDIR") {
                        let appdir_path = PathBuf::from(appdir);
                        paths.push(appdir_path.join("usr").join("lib").join("libs"));
                        paths.push(appdir_path.join("usr").join("lib"));
                    }
                }
            }
        }

        paths.push(PathBuf::from("libs"));
        paths.push(PathBuf::from("./"));

        paths
    }

    /// Bind PDFium from the first location that loads, falling back to the
    /// system library.
    pub fn bind(&self) -> Result<Pdfium, RenderError> {
        for path in self.search_paths() {
            let lib_path = Pdfium::pdfium_platform_library_name_at_path(&path);
            log::debug!("[Render] trying pdfium at {:?}", lib_path);

            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                log::info!("[Render] loaded pdfium from {:?}", path);
                return Ok(Pdfium::new(bindings));
            }
        }

        log::debug!("[Render] trying system pdfium");
        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| RenderError::LibraryUnavailable(e.to_string()))
    }
}

/// Renders every page of a PDF to an RGB image.
pub struct Rasterizer {
    pdfium: Pdfium,
}

impl Rasterizer {
    pub fn new(pdfium: Pdfium) -> Self {
        Self { pdfium }
    }

    /// Render all pages in document order.
    ///
    /// The document is closed when this returns, on success or failure.

    pub fn rasterize(&self, path: &Path, dpi: u32) -> Result<Vec<RgbImage>, RenderError> {
        if dpi == 0 {
            return Err(RenderError::InvalidDpi(dpi));
        }

        let document = self
            .pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| RenderError::Load {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        log::info!(
            "[Render] {} has {} page(s), rendering at {} DPI",
            path.display(),
            page_count,
            dpi
        );

        let mut images = Vec::with_capacity(page_count);
        for (index, page) in pages.iter().enumerate() {
            log::info!("[Render] Rendering page {}/{}", index + 1, page_count);
            images.push(render_page(&page, index, dpi)?);
        }

        Ok(images)
    }
}

fn render_page(page: &PdfPage, index: usize, dpi: u32) -> Result<RgbImage, RenderError> {
    let (target_width, target_height) =
        render_target_size(page.width().value, page.height().value, dpi);

    log::debug!(
        "[Render] page {}: {}x{} pt -> {}x{} px",
        index + 1,
        page.width().value,
        page.height().value,
        target_width,
        target_height
    );

    let render_config = PdfRenderConfig::new()
        .set_target_width(target_width)
        .set_target_height(target_height)
        .render_form_data(true);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| page_error(index, e))?;

    Ok(flatten_alpha(bitmap.as_image()))
}

/// `index` is zero-based; the reported page number is not.
fn page_error(index: usize, err: impl std::fmt::Display) -> RenderError {
    RenderError::Page {
        page: index + 1,
        message: err.to_string(),
    }
}

/// Pixel size for a page of the given size in points.
pub fn render_target_size(width_pt: f32, height_pt: f32, dpi: u32) -> (i32, i32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let width = ((width_pt * scale).round() as i32).max(1);
    let height = ((height_pt * scale).round() as i32).max(1);
    (width, height)
}

/// Convert a rendered bitmap to RGB, compositing any transparency onto white.
pub fn flatten_alpha(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        DynamicImage::ImageRgba8(rgba) => {
            let (width, height) = rgba.dimensions();
            let mut rgb = RgbImage::new(width, height);
            for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
                let [r, g, b, a] = src.0;
                *dst = Rgb([blend(r, a), blend(g, a), blend(b, a)]);
            }
            rgb
        }
        other => other.to_rgb8(),
    }
}

fn blend(channel: u8, alpha: u8) -> u8 {
    let alpha = alpha as u32;
    ((channel as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8
}
