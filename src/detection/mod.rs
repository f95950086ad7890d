/// 检测后处理 (Detection)
///
/// - types:    检测框 / 结果集 / 类别名称表
/// - decoder:  网络原始输出 → 候选检测 (Dense / Flat) 或分类 top-K (Scores)
/// - filter:   置信度 / 类别 / NMS / 数量上限
/// - detector: 推理后端 + 解码 + 过滤
pub mod decoder;
pub mod detector;
pub mod filter;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod types;

pub use decoder::{BoxPolicy, DecodeError, DecoderConfig, DetectionDecoder};
pub use detector::{Detector, DetectorStats, InferenceBackend};
pub use filter::{non_max_suppression, ClassFilter, DetectionFilter, FilterConfig};
#[cfg(feature = "onnx")]
pub use onnx::{OrtBackend, OrtOptions};
pub use types::{Bbox, ClassNames, Classification, Detection, DetectionSet, ModelKind, OutputLayout};
