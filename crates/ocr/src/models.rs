//! 模型下载与安装

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::OcrError;

const DET_FILE_NAME: &str = "det.onnx";
const REC_FILE_NAME: &str = "rec.onnx";
const DICT_FILE_NAME: &str = "dict.txt";
const PROGRESS_STEP: u64 = 1024 * 1024;

/// 单个模型文件的来源
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelSource {
    pub url: String,
    /// 期望的 SHA-256（十六进制），为空时不校验
    pub sha256: Option<String>,
}

/// 检测模型、识别模型、字典的下载清单
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelManifest {
    pub det: ModelSource,
    pub rec: ModelSource,
    pub dict: ModelSource,
}

impl ModelManifest {
    /// 返回第一个缺少 URL 的条目名
    pub fn missing_url(&self) -> Option<&'static str> {
        [("det", &self.det), ("rec", &self.rec), ("dict", &self.dict)]
            .into_iter()
            .find(|(_, source)| source.url.trim().is_empty())
            .map(|(name, _)| name)
    }
}

/// 安装后的模型路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub det: PathBuf,
    pub rec: PathBuf,
    pub dict: PathBuf,
}

impl ModelPaths {
    /// 模型目录下的标准文件名
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            det: dir.join(DET_FILE_NAME),
            rec: dir.join(REC_FILE_NAME),
            dict: dir.join(DICT_FILE_NAME),
        }
    }
}

/// 下载进度事件
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub file_name: String,
    pub file_index: u32,
    pub total_files: u32,
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: f32,
}

/// 下载清单中的全部文件到 dir
pub fn install_models<F>(
    manifest: &ModelManifest,
    dir: &Path,
    mut on_progress: F,
) -> Result<ModelPaths, OcrError>
where
    F: FnMut(&DownloadProgress),
{
    if let Some(name) = manifest.missing_url() {
        return Err(OcrError::Download(format!("未配置 {} 的下载地址", name)));
    }

    fs::create_dir_all(dir)?;
    let paths = ModelPaths::in_dir(dir);
    let client = reqwest::blocking::Client::builder()
        .build()
        .map_err(|e| OcrError::Download(e.to_string()))?;

    let jobs = [
        (&manifest.det, &paths.det, DET_FILE_NAME),
        (&manifest.rec, &paths.rec, REC_FILE_NAME),
        (&manifest.dict, &paths.dict, DICT_FILE_NAME),
    ];
    let total_files = jobs.len() as u32;
    for (index, (source, dest, file_name)) in jobs.into_iter().enumerate() {
        download_file_with_progress(
            &client,
            source,
            dest,
            file_name,
            index as u32 + 1,
            total_files,
            &mut on_progress,
        )?;
    }

    log::info!("[Models] 已安装到 {}", dir.display());
    Ok(paths)
}

/// 下载文件（带进度与校验），成功后才替换目标文件
fn download_file_with_progress<F>(
    client: &reqwest::blocking::Client,
    source: &ModelSource,
    dest: &Path,
    file_name: &str,
    file_index: u32,
    total_files: u32,
    on_progress: &mut F,
) -> Result<(), OcrError>
where
    F: FnMut(&DownloadProgress),
{
    log::info!("[Models] 下载 {} -> {}", source.url, dest.display());

    let mut response = client
        .get(&source.url)
        .send()
        .map_err(|e| OcrError::Download(format!("{}: {}", source.url, e)))?;
    if !response.status().is_success() {
        return Err(OcrError::Download(format!(
            "{}: HTTP 状态 {}",
            source.url,
            response.status()
        )));
    }

    let total = response.content_length();
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    let mut downloaded: u64 = 0;
    let mut last_emit: u64 = 0;

    let mut emit = |downloaded: u64, percent: f32| {
        on_progress(&DownloadProgress {
            file_name: file_name.to_string(),
            file_index,
            total_files,
            downloaded,
            total,
            percent,
        })
    };

    loop {
        let count = response.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        file.write_all(&buffer[..count])?;
        hasher.update(&buffer[..count]);
        downloaded += count as u64;

        if downloaded - last_emit >= PROGRESS_STEP {
            last_emit = downloaded;
            let percent = total
                .map(|t| (downloaded as f32 / t as f32) * 100.0)
                .unwrap_or(0.0);
            emit(downloaded, percent);
        }
    }
    emit(downloaded, 100.0);

    if let Some(expected) = source.sha256.as_deref().filter(|s| !s.trim().is_empty()) {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(OcrError::Download(format!(
                "{} 校验失败: 期望 {}, 实际 {}",
                file_name, expected, actual
            )));
        }
    }

    file.persist(dest).map_err(|e| OcrError::Io(e.error))?;
    log::info!("[Models] {} 完成: {} 字节", file_name, downloaded);
    Ok(())
}
