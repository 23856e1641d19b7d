use pdfocr_ocr::{ModelManifest, ModelPaths, ModelSource, OcrConfig, DET_LIMIT_SIDE};
use pdfocr_render::DEFAULT_DPI;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "pdfocr.json";
const MODELS_DIR_NAME: &str = "models";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    // ============ 渲染 ============
    /// 光栅化分辨率
    pub dpi: Option<u32>,
    /// PDFium 动态库所在目录
    pub pdfium_library_dir: Option<PathBuf>,

    // ============ Paddle OCR ============
    /// 模型目录，未单独指定的模型文件从这里取
    pub models_dir: Option<PathBuf>,
    pub det_model_path: Option<PathBuf>,
    pub rec_model_path: Option<PathBuf>,
    pub dict_path: Option<PathBuf>,
    pub det_limit_side: Option<u32>,
    pub intra_threads: Option<usize>,
    pub inter_threads: Option<usize>,

    /// fetch-models 使用的下载清单
    pub models: ModelManifest,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 读取配置文件，文件不存在时返回默认配置
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        log::debug!("[Config] {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("[Config] loaded {}", path.display());
    Ok(config)
}

impl AppConfig {
    /// 用 overrides 中已设置的字段覆盖当前值
    pub fn merge(self, overrides: AppConfig) -> AppConfig {
        AppConfig {
            dpi: overrides.dpi.or(self.dpi),
            pdfium_library_dir: overrides.pdfium_library_dir.or(self.pdfium_library_dir),
            models_dir: overrides.models_dir.or(self.models_dir),
            det_model_path: overrides.det_model_path.or(self.det_model_path),
            rec_model_path: overrides.rec_model_path.or(self.rec_model_path),
            dict_path: overrides.dict_path.or(self.dict_path),
            det_limit_side: overrides.det_limit_side.or(self.det_limit_side),
            intra_threads: overrides.intra_threads.or(self.intra_threads),
            inter_threads: overrides.inter_threads.or(self.inter_threads),
            models: ModelManifest {
                det: merge_source(self.models.det, overrides.models.det),
                rec: merge_source(self.models.rec, overrides.models.rec),
                dict: merge_source(self.models.dict, overrides.models.dict),
            },
        }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi.filter(|&dpi| dpi > 0).unwrap_or(DEFAULT_DPI)
    }

    /// 模型目录，默认为 base 下的 models/
    pub fn models_dir(&self, base: &Path) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| base.join(MODELS_DIR_NAME))
    }

    /// 显式指定的文件优先，其余取模型目录下的标准文件名
    pub fn model_paths(&self, base: &Path) -> ModelPaths {
        let defaults = ModelPaths::in_dir(&self.models_dir(base));
        ModelPaths {
            det: self.det_model_path.clone().unwrap_or(defaults.det),
            rec: self.rec_model_path.clone().unwrap_or(defaults.rec),
            dict: self.dict_path.clone().unwrap_or(defaults.dict),
        }
    }

    pub fn ocr_config(&self, base: &Path) -> OcrConfig {
        let mut config = OcrConfig::new(self.model_paths(base));
        config.det_limit_side = self.det_limit_side.unwrap_or(DET_LIMIT_SIDE);
        config.intra_threads = self.intra_threads;
        config.inter_threads = self.inter_threads;
        config
    }
}

fn merge_source(base: ModelSource, overrides: ModelSource) -> ModelSource {
    if overrides.url.trim().is_empty() {
        base
    } else {
        overrides
    }
}
