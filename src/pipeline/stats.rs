use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 流水线运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStats {
    /// 成功处理的帧数
    pub processed: u64,
    /// 队列满时丢弃的旧帧数
    pub dropped: u64,
    /// 处理失败的帧数
    pub errors: u64,
    /// 最近一帧处理耗时 (ms)
    pub last_frame_ms: f64,
    pub fps: f64,
}

/// 工作线程与调用方共享的计数器
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    processed: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
    last_frame_us: AtomicU64,
    fps_bits: AtomicU64,
}

impl StatsCounters {
    pub fn record_processed(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.last_frame_us.store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_frame_ms: self.last_frame_us.load(Ordering::Relaxed) as f64 / 1000.0,
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
        }
    }
}

/// 每秒刷新一次的帧率计
pub(crate) struct FpsMeter {
    count: u64,
    last: Instant,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            count: 0,
            last: Instant::now(),
        }
    }

    /// 计一帧; 满一秒时返回新的帧率
    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.last.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.count as f64 / elapsed.as_secs_f64();
            self.count = 0;
            self.last = Instant::now();
            Some(fps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_processed(Duration::from_micros(2500));
        counters.record_processed(Duration::from_millis(4));
        counters.record_dropped();
        counters.record_error();
        counters.set_fps(29.5);

        let stats = counters.snapshot();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.last_frame_ms, 4.0);
        assert_eq!(stats.fps, 29.5);
    }

    #[test]
    fn test_fps_meter_waits_for_full_second() {
        let mut meter = FpsMeter::new();
        assert_eq!(meter.tick(), None);
    }
}
