//! 错误类型 (Error types)

use thiserror::Error;

use crate::algorithms::AlgorithmId;

/// 流水线错误
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("未注册的算法 id: {0}")]
    UnknownAlgorithm(AlgorithmId),

    #[error("算法链索引越界: {index} (长度 {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("算法 [{name}] 处理失败: {message}")]
    UnitFailed { name: String, message: String },

    #[error("算法 [{name}] 处理时 panic: {message}")]
    UnitPanicked { name: String, message: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::UnknownAlgorithm(42);
        assert_eq!(err.to_string(), "未注册的算法 id: 42");

        let err = PipelineError::UnitFailed {
            name: "高斯模糊".to_string(),
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("高斯模糊"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::Json(_)));
    }
}
