/// 帧处理流水线 (Frame Pipeline)
///
/// 生产者非阻塞入队, 专用工作线程按 FIFO 取帧, 对算法链快照处理后通知订阅者.
///
/// ```text
/// 采集线程 ──enqueue──► [有界队列, 满时丢最旧] ──► 工作线程
///                                                  │ chain.snapshot().run(frame)
///                                                  ├─► on_processed(frame)
///                                                  └─► on_error(message)
/// ```
///
/// 队列锁与算法链锁相互独立, 算法处理期间不持有任何锁.
mod stats;

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::chain::AlgorithmChain;
use crate::error::Result;
use crate::frame::Frame;

pub use stats::PipelineStats;
use stats::{FpsMeter, StatsCounters};

const WORKER_NAME: &str = "framepipe-worker";

/// 流水线参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// 队列容量, 满时丢弃最旧的帧
    pub queue_capacity: usize,
    /// stop() 等待工作线程退出的上限 (ms)
    pub stop_timeout_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            stop_timeout_ms: 3000,
        }
    }
}

impl PipelineOptions {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running { paused: bool },
}

/// `with_channels` 输出的事件
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Processed(Frame),
    Error(String),
}

type FrameCallback = Box<dyn Fn(Frame) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    on_processed: Vec<FrameCallback>,
    on_error: Vec<ErrorCallback>,
}

impl Subscribers {
    fn processed(&self, frame: Frame) {
        if let Some((last, rest)) = self.on_processed.split_last() {
            for callback in rest {
                guarded("on_processed", || callback(frame.clone()));
            }
            guarded("on_processed", || last(frame));
        }
    }

    fn error(&self, message: String) {
        for callback in &self.on_error {
            guarded("on_error", || callback(message.clone()));
        }
    }
}

/// 订阅者 panic 只记录日志, 工作线程继续运行
fn guarded(kind: &str, callback: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!("❌ {} 订阅者 panic: {}", kind, message);
    }
}

struct QueueState {
    frames: VecDeque<Frame>,
    running: bool,
    paused: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    wake: Condvar,
    capacity: usize,
    chain: Arc<AlgorithmChain>,
    subscribers: Subscribers,
    stats: StatsCounters,
}

/// 一次 start 对应的工作线程
struct Worker {
    handle: JoinHandle<()>,
    /// 线程退出时发送端被丢弃
    exited: Receiver<()>,
    cancel: Arc<AtomicBool>,
}

/// 构造流水线并注册订阅者
pub struct PipelineBuilder {
    chain: Arc<AlgorithmChain>,
    options: PipelineOptions,
    subscribers: Subscribers,
}

impl PipelineBuilder {
    pub fn new(chain: Arc<AlgorithmChain>) -> Self {
        Self {
            chain,
            options: PipelineOptions::default(),
            subscribers: Subscribers::default(),
        }
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_processed(mut self, callback: impl Fn(Frame) + Send + Sync + 'static) -> Self {
        self.subscribers.on_processed.push(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.subscribers.on_error.push(Box::new(callback));
        self
    }

    pub fn build(self) -> FramePipeline {
        let capacity = self.options.queue_capacity.max(1);
        FramePipeline {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    frames: VecDeque::with_capacity(capacity),
                    running: false,
                    paused: false,
                }),
                wake: Condvar::new(),
                capacity,
                chain: self.chain,
                subscribers: self.subscribers,
                stats: StatsCounters::default(),
            }),
            options: self.options,
            worker: Mutex::new(None),
        }
    }
}

pub struct FramePipeline {
    shared: Arc<Shared>,
    options: PipelineOptions,
    worker: Mutex<Option<Worker>>,
}

impl FramePipeline {
    pub fn builder(chain: Arc<AlgorithmChain>) -> PipelineBuilder {
        PipelineBuilder::new(chain)
    }

    /// 以 channel 形式接收处理结果与错误
    pub fn with_channels(chain: Arc<AlgorithmChain>, options: PipelineOptions) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let tx_err = tx.clone();
        let pipeline = PipelineBuilder::new(chain)
            .options(options)
            .on_processed(move |frame| {
                let _ = tx.send(PipelineEvent::Processed(frame));
            })
            .on_error(move |message| {
                let _ = tx_err.send(PipelineEvent::Error(message));
            })
            .build();
        (pipeline, rx)
    }

    pub fn chain(&self) -> &Arc<AlgorithmChain> {
        &self.shared.chain
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// 入队一帧, 从不阻塞; 停止状态下忽略
    pub fn enqueue(&self, frame: Frame) {
        let mut queue = self.shared.queue.lock();
        if !queue.running {
            return;
        }
        while queue.frames.len() >= self.shared.capacity {
            queue.frames.pop_front();
            self.shared.stats.record_dropped();
        }
        queue.frames.push_back(frame);
        self.shared.wake.notify_one();
    }

    /// 启动工作线程; 已在运行时只唤醒
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        self.shared.queue.lock().running = true;
        if worker.is_some() {
            self.shared.wake.notify_all();
            return Ok(());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = crossbeam_channel::bounded::<()>(1);
        let shared = self.shared.clone();
        let run_cancel = cancel.clone();
        let spawned = thread::Builder::new().name(WORKER_NAME.to_string()).spawn(move || {
            let _exit = exit_tx;
            worker_loop(&shared, &run_cancel);
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.queue.lock().running = false;
                return Err(e.into());
            }
        };
        *worker = Some(Worker { handle, exited, cancel });
        tracing::info!("▶️ 流水线启动");
        Ok(())
    }

    pub fn pause(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.running {
            queue.paused = true;
            tracing::info!("⏸️ 流水线暂停");
        }
    }

    pub fn resume(&self) {
        let mut queue = self.shared.queue.lock();
        if queue.running && queue.paused {
            queue.paused = false;
            self.shared.wake.notify_all();
            tracing::info!("▶️ 流水线恢复");
        }
    }

    /// 停止并清空队列, 最多等待 `stop_timeout`
    ///
    /// 超时后工作线程被分离: 它在当前帧结束后退出, 且不再发出任何通知.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            let mut queue = self.shared.queue.lock();
            queue.running = false;
            queue.paused = false;
            queue.frames.clear();
            return;
        };

        worker.cancel.store(true, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock();
            queue.running = false;
            queue.paused = false;
            queue.frames.clear();
            self.shared.wake.notify_all();
        }

        match worker.exited.recv_timeout(self.options.stop_timeout()) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "⚠️ 工作线程 {}ms 内未退出, 已分离",
                    self.options.stop_timeout_ms
                );
            }
            _ => {
                if worker.handle.join().is_err() {
                    tracing::error!("❌ 工作线程异常退出");
                }
            }
        }
        tracing::info!("⏹️ 流水线停止");
    }

    pub fn state(&self) -> PipelineState {
        let queue = self.shared.queue.lock();
        if queue.running {
            PipelineState::Running { paused: queue.paused }
        } else {
            PipelineState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running
    }

    pub fn is_paused(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.running && queue.paused
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().frames.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats.snapshot()
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 取下一帧; 被取消时返回 None
fn next_frame(shared: &Shared, cancel: &AtomicBool) -> Option<Frame> {
    let mut queue = shared.queue.lock();
    loop {
        if cancel.load(Ordering::SeqCst) {
            return None;
        }
        if !queue.paused {
            if let Some(frame) = queue.frames.pop_front() {
                return Some(frame);
            }
        }
        shared.wake.wait(&mut queue);
    }
}

fn worker_loop(shared: &Shared, cancel: &AtomicBool) {
    tracing::debug!("工作线程启动");
    let mut fps = FpsMeter::new();

    while let Some(frame) = next_frame(shared, cancel) {
        let mut snapshot = shared.chain.snapshot();
        let started = Instant::now();
        let result = snapshot.run(frame);
        let elapsed = started.elapsed();

        match result {
            Ok(output) => {
                // 已分离的旧线程不得覆盖新线程推进的时序状态
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                shared.chain.write_back(snapshot);
                shared.stats.record_processed(elapsed);
                if let Some(value) = fps.tick() {
                    shared.stats.set_fps(value);
                }
                shared.subscribers.processed(output);
            }
            Err(e) => {
                tracing::error!("❌ 帧处理失败: {}", e);
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                shared.stats.record_error();
                shared.subscribers.error(e.to_string());
            }
        }
    }
    tracing::debug!("工作线程退出");
}
