#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod algorithms; // 可插拔图像算法单元
pub mod chain; // 算法链
pub mod config; // JSON 应用配置
pub mod detection; // 检测输出解码与过滤
pub mod error;
pub mod frame;
pub mod pipeline; // 后台帧处理流水线
pub mod registry; // 算法注册表

pub use crate::algorithms::{AlgorithmDescriptor, AlgorithmId, AlgorithmUnit, ParamMap, ParamValue, ParameterSpec};
pub use crate::chain::{AlgorithmChain, ChainEntry, ChainSnapshot};
pub use crate::config::AppConfig;
pub use crate::error::PipelineError;
pub use crate::frame::Frame;
pub use crate::pipeline::{FramePipeline, PipelineBuilder, PipelineEvent, PipelineOptions, PipelineState, PipelineStats};
pub use crate::registry::AlgorithmRegistry;

/// 北京时间戳, 各字段以 `delimiter` 分隔, 用于输出文件命名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = match chrono::FixedOffset::east_opt(8 * 60 * 60) {
        Some(offset) => chrono::Utc::now().with_timezone(&offset),
        None => chrono::Utc::now().fixed_offset(),
    };
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_time_string() {
        let s = gen_time_string("-");
        let parts: Vec<&str> = s.split('-').collect();
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[0].len(), 4);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));
    }
}
