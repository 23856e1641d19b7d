use ort::session::builder::SessionBuilder;
use ort::Error;

const DEFAULT_MAX_THREADS: usize = 4;

/// ONNX Runtime 线程设置，由调用方显式传入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadSettings {
    pub intra: usize,
    pub inter: usize,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            intra: default_thread_count(),
            inter: 1,
        }
    }
}

impl ThreadSettings {
    /// 用配置值覆盖默认值，0 视为未设置
    pub fn resolve(intra: Option<usize>, inter: Option<usize>) -> Self {
        let defaults = Self::default();
        Self {
            intra: intra.filter(|v| *v > 0).unwrap_or(defaults.intra),
            inter: inter.filter(|v| *v > 0).unwrap_or(defaults.inter),
        }
    }
}

fn default_thread_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(DEFAULT_MAX_THREADS);
    available.min(DEFAULT_MAX_THREADS).max(1)
}

pub fn apply_session_threads(
    builder: SessionBuilder,
    settings: ThreadSettings,
) -> Result<SessionBuilder, Error> {
    log::info!(
        "[OCR] 线程设置: intra={}, inter={}",
        settings.intra,
        settings.inter
    );

    let builder = builder.with_intra_threads(settings.intra)?;
    let builder = builder.with_inter_threads(settings.inter)?;
    builder.with_parallel_execution(false)
}
