/// 图像处理算法 (Algorithm Units)
///
/// # 架构说明
///
/// 每个算法单元实现统一的 [`AlgorithmUnit`] trait:
/// - 处理 (process): 输入一帧, 输出一帧
/// - 参数 (set_parameters / parameters): 部分更新, 按元数据钳位
/// - 元数据 (describe): id、名称、描述、参数列表
/// - 深拷贝 (clone_unit): 包含时序状态 (前一帧缓存等)
///
/// ## 内置算法 id
/// ```text
///  0 原始图像     1 灰度处理     2 高斯模糊     3 Canny边缘
///  4 二值化       5 中值模糊     6 Otsu二值化   7 自适应二值化
///  8 Sobel边缘    9 形态学操作  10 HSV颜色提取 11 帧差运动检测
/// 12 背景减除    13 模糊检测    16 FAST特征点  17 块匹配光流
/// ```
use anyhow::Result;

use crate::frame::Frame;
use crate::registry::AlgorithmRegistry;

pub mod params;

mod basic;
mod blur;
mod color;
mod edges;
mod features;
mod morphology;
mod motion;
mod optical_flow;
mod quality;
mod threshold;

pub use basic::{Grayscale, Original};
pub use blur::{GaussianBlur, MedianBlur};
pub use color::HsvColorExtraction;
pub use edges::{CannyEdges, SobelEdges};
pub use features::FastFeatures;
pub use morphology::Morphology;
pub use motion::{BackgroundSubtractor, FrameDifference};
pub use optical_flow::BlockOpticalFlow;
pub use params::{apply_params, ParamKind, ParamMap, ParamValue, ParameterSpec};
pub use quality::BlurDetector;
pub use threshold::{AdaptiveThreshold, BinaryThreshold, OtsuThreshold};

/// 算法唯一标识
pub type AlgorithmId = u32;

/// 内置算法 id
pub mod ids {
    use super::AlgorithmId;

    pub const ORIGINAL: AlgorithmId = 0;
    pub const GRAYSCALE: AlgorithmId = 1;
    pub const GAUSSIAN_BLUR: AlgorithmId = 2;
    pub const CANNY: AlgorithmId = 3;
    pub const THRESHOLD: AlgorithmId = 4;
    pub const MEDIAN_BLUR: AlgorithmId = 5;
    pub const OTSU: AlgorithmId = 6;
    pub const ADAPTIVE_THRESHOLD: AlgorithmId = 7;
    pub const SOBEL: AlgorithmId = 8;
    pub const MORPHOLOGY: AlgorithmId = 9;
    pub const HSV_EXTRACTION: AlgorithmId = 10;
    pub const FRAME_DIFFERENCE: AlgorithmId = 11;
    pub const BACKGROUND_SUBTRACTION: AlgorithmId = 12;
    pub const BLUR_DETECTOR: AlgorithmId = 13;
    pub const FAST_FEATURES: AlgorithmId = 16;
    pub const OPTICAL_FLOW: AlgorithmId = 17;
}

/// 算法元数据 (每种算法构造一次, 之后只读)
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AlgorithmDescriptor {
    pub id: AlgorithmId,
    pub name: String,
    pub description: String,
    pub params: Vec<ParameterSpec>,
}

impl AlgorithmDescriptor {
    pub fn new(id: AlgorithmId, name: &str, description: &str, params: Vec<ParameterSpec>) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 全部参数的默认值
    pub fn defaults(&self) -> ParamMap {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }
}

/// 统一的算法单元接口
///
/// ## 核心流程
/// ```text
/// 输入帧 → process → 输出帧
///            ↑
///   set_parameters (钳位后写入)
/// ```
pub trait AlgorithmUnit: Send {
    /// 处理一帧; 空帧原样返回
    fn process(&mut self, frame: Frame) -> Result<Frame>;

    /// 部分更新参数, 未指定的键保持原值, 未知键忽略
    fn set_parameters(&mut self, params: &ParamMap);

    /// 当前全部参数, 可原样回写到 `set_parameters`
    fn parameters(&self) -> ParamMap;

    fn describe(&self) -> &AlgorithmDescriptor;

    /// 深拷贝, 包含时序状态
    fn clone_unit(&self) -> Box<dyn AlgorithmUnit>;

    fn id(&self) -> AlgorithmId {
        self.describe().id
    }

    fn name(&self) -> &str {
        &self.describe().name
    }
}

impl Clone for Box<dyn AlgorithmUnit> {
    fn clone(&self) -> Self {
        self.clone_unit()
    }
}

impl std::fmt::Debug for dyn AlgorithmUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmUnit")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("params", &self.parameters())
            .finish()
    }
}

/// 注册全部内置算法
pub fn register_builtins(registry: &AlgorithmRegistry) {
    registry.register(ids::ORIGINAL, || Box::new(Original::new()));
    registry.register(ids::GRAYSCALE, || Box::new(Grayscale::new()));
    registry.register(ids::GAUSSIAN_BLUR, || Box::new(GaussianBlur::new()));
    registry.register(ids::CANNY, || Box::new(CannyEdges::new()));
    registry.register(ids::THRESHOLD, || Box::new(BinaryThreshold::new()));

    // 图像处理
    registry.register(ids::MEDIAN_BLUR, || Box::new(MedianBlur::new()));
    registry.register(ids::OTSU, || Box::new(OtsuThreshold::new()));
    registry.register(ids::ADAPTIVE_THRESHOLD, || Box::new(AdaptiveThreshold::new()));
    registry.register(ids::SOBEL, || Box::new(SobelEdges::new()));
    registry.register(ids::MORPHOLOGY, || Box::new(Morphology::new()));
    registry.register(ids::HSV_EXTRACTION, || Box::new(HsvColorExtraction::new()));

    // 运动检测
    registry.register(ids::FRAME_DIFFERENCE, || Box::new(FrameDifference::new()));
    registry.register(ids::BACKGROUND_SUBTRACTION, || Box::new(BackgroundSubtractor::new()));

    // 质量检测 / 特征 / 光流
    registry.register(ids::BLUR_DETECTOR, || Box::new(BlurDetector::new()));
    registry.register(ids::FAST_FEATURES, || Box::new(FastFeatures::new()));
    registry.register(ids::OPTICAL_FLOW, || Box::new(BlockOpticalFlow::new()));
}
