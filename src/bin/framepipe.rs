/// 帧处理流水线演示 (framepipe)
///
/// 采集 (图片文件 / 目录 / 随机噪声) → FramePipeline → 可选检测 → PNG 输出
///
/// 示例:
///   cargo run --bin framepipe -- --list
///   cargo run --bin framepipe -- --chain "2:kernelSize=7;4:threshold=100" --frames 60
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use framepipe_rs::detection::{Detector, InferenceBackend, OutputLayout};
use framepipe_rs::{
    gen_time_string, AlgorithmChain, AlgorithmRegistry, AppConfig, ChainEntry, Frame, FramePipeline, ParamMap,
    ParamValue, PipelineEvent,
};
use image::{DynamicImage, RgbImage};
use phf::phf_map;
use rand::Rng;
use tracing_subscriber::EnvFilter;

/// 输出编码名称 → OutputLayout
static LAYOUTS: phf::Map<&'static str, OutputLayout> = phf_map! {
    "dense" => OutputLayout::Dense,
    "yolo" => OutputLayout::Dense,
    "flat" => OutputLayout::Flat,
    "ssd" => OutputLayout::Flat,
    "scores" => OutputLayout::Scores,
    "classification" => OutputLayout::Scores,
};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Parser, Debug)]
#[command(author, version, about = "可插拔帧处理流水线", long_about = None)]
struct Args {
    /// 输入图片或目录; 缺省时生成随机噪声帧
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// 算法链, 例如 "2:kernelSize=7;4:threshold=100"
    #[arg(short, long)]
    chain: Option<String>,

    /// JSON 配置文件 (不存在时写入默认配置)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 处理帧数
    #[arg(short, long, default_value_t = 30)]
    frames: usize,

    /// 噪声帧尺寸
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,

    /// 入队间隔 (ms)
    #[arg(long, default_value_t = 33)]
    interval_ms: u64,

    /// 处理结果保存目录
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 检测模型 (需启用 onnx 功能)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 输出编码: dense / yolo / flat / ssd / scores / classification
    #[arg(long)]
    layout: Option<String>,

    /// 列出已注册的算法后退出
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let registry = Arc::new(AlgorithmRegistry::with_builtins());
    if args.list {
        print_algorithms(&registry);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => AppConfig::load(path),
        None => AppConfig::default(),
    };
    config.validate()?;
    config.print_summary();

    let entries = match &args.chain {
        Some(text) => parse_chain(text)?,
        None => config.chain.clone(),
    };
    let chain = Arc::new(AlgorithmChain::from_entries(registry, &entries));
    println!("🔗 算法链: {:?}", chain.info());

    let layout = args.layout.as_deref().map(parse_layout).transpose()?;
    let mut detector = build_detector(&args, &config, layout)?;

    if let Some(dir) = &args.output {
        std::fs::create_dir_all(dir).with_context(|| format!("无法创建输出目录 {}", dir.display()))?;
    }

    let source = FrameSource::open(&args)?;
    let (pipeline, events) = FramePipeline::with_channels(chain, config.pipeline.clone());
    pipeline.start()?;

    let total = args.frames as u64;
    let interval = Duration::from_millis(args.interval_ms);
    thread::scope(|s| -> Result<()> {
        let pipeline = &pipeline;
        s.spawn(move || {
            let mut source = source;
            for i in 0..args.frames {
                match source.next_frame(i) {
                    Ok(frame) => pipeline.enqueue(frame),
                    Err(e) => tracing::error!("❌ 读取帧失败: {:#}", e),
                }
                thread::sleep(interval);
            }
        });

        let mut received = 0u64;
        while received + pipeline.stats().dropped < total {
            match events.recv_timeout(Duration::from_secs(2)) {
                Ok(PipelineEvent::Processed(frame)) => {
                    received += 1;
                    if let Some(detector) = detector.as_mut() {
                        let set = detector.detect(frame.image());
                        for d in set.iter() {
                            println!("  🎯 {} {:.2} {:?}", d.label, d.confidence, d.bbox);
                        }
                        for c in &set.classifications {
                            println!("  🏷️ {} {:.2}", c.label, c.confidence);
                        }
                    }
                    if let Some(dir) = &args.output {
                        save_frame(dir, &frame, received)?;
                    }
                }
                Ok(PipelineEvent::Error(message)) => {
                    received += 1;
                    eprintln!("❌ {}", message);
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!("⚠️ 等待处理结果超时");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    })?;

    pipeline.stop();
    let stats = pipeline.stats();
    println!(
        "\n📊 处理 {} 帧, 丢弃 {}, 失败 {}, 最近一帧 {:.2}ms, FPS {:.1}",
        stats.processed, stats.dropped, stats.errors, stats.last_frame_ms, stats.fps
    );
    Ok(())
}

fn print_algorithms(registry: &AlgorithmRegistry) {
    for descriptor in registry.descriptors() {
        println!("{:>3}  {}  {}", descriptor.id, descriptor.name, descriptor.description);
        for param in &descriptor.params {
            println!("       {} ({}) = {}", param.name, param.display_name, param.default);
        }
    }
}

/// 解析 "id:key=value,key=value;id" 形式的算法链
fn parse_chain(text: &str) -> Result<Vec<ChainEntry>> {
    let mut entries = Vec::new();
    for item in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, rest) = item.split_once(':').unwrap_or((item, ""));
        let id = id.trim().parse().with_context(|| format!("无效的算法 id: {}", id))?;
        let mut params = ParamMap::new();
        for pair in rest.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("参数缺少 '=': {}", pair))?;
            params.insert(key.trim().to_string(), ParamValue::parse_loose(value));
        }
        entries.push(ChainEntry { id, params });
    }
    Ok(entries)
}

fn parse_layout(name: &str) -> Result<OutputLayout> {
    LAYOUTS
        .get(name.to_lowercase().as_str())
        .copied()
        .ok_or_else(|| anyhow!("未知的输出编码: {} (可选 dense/yolo/flat/ssd/scores/classification)", name))
}

#[cfg(feature = "onnx")]
fn build_detector(
    args: &Args,
    config: &AppConfig,
    layout: Option<OutputLayout>,
) -> Result<Option<Detector<Box<dyn InferenceBackend>>>> {
    use framepipe_rs::detection::{ClassNames, OrtBackend, OrtOptions};

    let Some(model) = &args.model else {
        return Ok(None);
    };
    let backend = OrtBackend::load(model, OrtOptions { layout, ..Default::default() })?;
    let mut decoder = config.detection.decoder.clone();
    if decoder.label_offset == 0 {
        decoder.label_offset = backend.model_kind().default_label_offset();
    }
    let backend: Box<dyn InferenceBackend> = Box::new(backend);
    Ok(Some(Detector::new(
        backend,
        ClassNames::coco(),
        decoder,
        config.detection.filter.clone(),
    )))
}

#[cfg(not(feature = "onnx"))]
fn build_detector(
    args: &Args,
    _config: &AppConfig,
    _layout: Option<OutputLayout>,
) -> Result<Option<Detector<Box<dyn InferenceBackend>>>> {
    if args.model.is_some() {
        tracing::warn!("⚠️ 未启用 onnx 功能, 忽略 --model");
    }
    Ok(None)
}

fn save_frame(dir: &Path, frame: &Frame, index: u64) -> Result<()> {
    let path = dir.join(format!("{}_{:04}.png", gen_time_string("-"), index));
    frame
        .image()
        .save(&path)
        .with_context(|| format!("保存 {} 失败", path.display()))
}

/// 帧来源
enum FrameSource {
    Images(Vec<PathBuf>),
    Noise { width: u32, height: u32 },
}

impl FrameSource {
    fn open(args: &Args) -> Result<Self> {
        let Some(input) = &args.input else {
            return Ok(FrameSource::Noise {
                width: args.width.max(1),
                height: args.height.max(1),
            });
        };
        if input.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            if files.is_empty() {
                bail!("目录中没有图片: {}", input.display());
            }
            Ok(FrameSource::Images(files))
        } else {
            Ok(FrameSource::Images(vec![input.clone()]))
        }
    }

    /// 第 `index` 帧; 图片列表循环使用
    fn next_frame(&mut self, index: usize) -> Result<Frame> {
        match self {
            FrameSource::Images(files) => {
                let path = &files[index % files.len()];
                let image = image::open(path).with_context(|| format!("无法读取 {}", path.display()))?;
                Ok(Frame::new(image))
            }
            FrameSource::Noise { width, height } => {
                let mut rng = rand::thread_rng();
                let mut image = RgbImage::new(*width, *height);
                for pixel in image.pixels_mut() {
                    pixel.0 = [rng.gen(), rng.gen(), rng.gen()];
                }
                Ok(Frame::new(DynamicImage::ImageRgb8(image)))
            }
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chain() {
        let entries = parse_chain("2:kernelSize=7;4:threshold=100, maxValue=200 ; 1").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].id, 2);
        assert_eq!(entries[0].params["kernelSize"], ParamValue::Int(7));
        assert_eq!(entries[1].params.len(), 2);
        assert!(entries[2].params.is_empty());

        assert!(parse_chain("x:a=1").is_err());
        assert!(parse_chain("2:kernelSize").is_err());
        assert!(parse_chain("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_layout() {
        assert_eq!(parse_layout("YOLO").unwrap(), OutputLayout::Dense);
        assert_eq!(parse_layout("ssd").unwrap(), OutputLayout::Flat);
        assert_eq!(parse_layout("Classification").unwrap(), OutputLayout::Scores);
        assert!(parse_layout("grid").is_err());
    }
}
