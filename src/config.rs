//! 应用配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chain::ChainEntry;
use crate::detection::{DecoderConfig, FilterConfig, ModelKind};
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineOptions;

/// 检测相关参数
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_kind: ModelKind,
    pub decoder: DecoderConfig,
    pub filter: FilterConfig,
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineOptions,
    pub detection: DetectionConfig,
    /// 启动时装配的算法链
    pub chain: Vec<ChainEntry>,
}

impl AppConfig {
    /// 从JSON文件加载配置; 文件不存在时写入默认配置, 解析失败时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    tracing::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("⚠️ 配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("📝 配置文件不存在, 创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    tracing::error!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 严格加载: 读取、解析或校验失败都返回错误
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        tracing::info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.queue_capacity < 1 {
            return Err(PipelineError::Config("queue_capacity 必须 >= 1".to_string()));
        }
        let thresholds = [
            ("decoder.conf_threshold", self.detection.decoder.conf_threshold),
            ("filter.conf_threshold", self.detection.filter.conf_threshold),
            ("filter.nms_threshold", self.detection.filter.nms_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!("{} 超出 [0, 1]: {}", name, value)));
            }
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        println!("\n🎛️  当前配置:");
        println!("  队列容量: {}", self.pipeline.queue_capacity);
        println!("  停止超时: {}ms", self.pipeline.stop_timeout_ms);
        println!("  模型类型: {:?}", self.detection.model_kind);
        println!("  检测置信度: {:.2}", self.detection.filter.conf_threshold);
        println!(
            "  NMS: {} (IoU {:.2})",
            self.detection.filter.use_nms, self.detection.filter.nms_threshold
        );
        println!("  最大检测数: {}", self.detection.filter.max_detections);
        println!("  算法链: {:?}\n", self.chain.iter().map(|e| e.id).collect::<Vec<_>>());
    }
}
