//! OCR 错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("模型加载失败: {0}")]
    ModelLoad(String),

    #[error("图像处理失败: {0}")]
    ImageProcess(String),

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("模型下载失败: {0}")]
    Download(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OcrError::ModelLoad("det.onnx".to_string());
        assert_eq!(err.to_string(), "模型加载失败: det.onnx");
        let err = OcrError::Download("timeout".to_string());
        assert_eq!(err.to_string(), "模型下载失败: timeout");
    }
}
