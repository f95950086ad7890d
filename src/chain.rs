//! 算法链 (AlgorithmChain)
//!
//! 有序的算法槽位列表, 结构修改走写锁, 每个槽位的算法实例另有互斥锁.
//!
//! ```text
//! UI 线程:   append / remove_at / update_params ──► RwLock<Vec<Arc<ChainSlot>>>
//! 工作线程:  snapshot() ──► 深拷贝各槽位 ──► run(frame) ──► write_back()
//! ```
//!
//! 快照在锁外运行; 处理完成后时序状态 (前一帧等) 按修订号回写到仍存在且参数未变的槽位.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::algorithms::{AlgorithmId, AlgorithmUnit, ParamMap};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::registry::AlgorithmRegistry;

/// 持久化用的链条目 (算法 id + 参数)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    pub id: AlgorithmId,
    #[serde(default)]
    pub params: ParamMap,
}

/// 链中的单个槽位
pub struct ChainSlot {
    unit: Mutex<Box<dyn AlgorithmUnit>>,
    /// 参数修订号, 每次 `update_params` 加一
    revision: AtomicU64,
}

impl ChainSlot {
    fn new(unit: Box<dyn AlgorithmUnit>) -> Self {
        Self {
            unit: Mutex::new(unit),
            revision: AtomicU64::new(0),
        }
    }
}

pub struct AlgorithmChain {
    registry: Arc<AlgorithmRegistry>,
    slots: RwLock<Vec<Arc<ChainSlot>>>,
}

impl AlgorithmChain {
    pub fn new(registry: Arc<AlgorithmRegistry>) -> Self {
        Self {
            registry,
            slots: RwLock::new(Vec::new()),
        }
    }

    /// 按条目重建算法链, 未注册的 id 跳过
    pub fn from_entries(registry: Arc<AlgorithmRegistry>, entries: &[ChainEntry]) -> Self {
        let chain = Self::new(registry);
        for entry in entries {
            if chain.append(entry.id, &entry.params).is_none() {
                tracing::warn!("⚠️ 跳过未注册的算法 id: {}", entry.id);
            }
        }
        chain
    }

    pub fn registry(&self) -> &Arc<AlgorithmRegistry> {
        &self.registry
    }

    /// 追加算法, 返回其位置; 未知 id 返回 None 且链不变
    pub fn append(&self, id: AlgorithmId, params: &ParamMap) -> Option<usize> {
        let mut unit = self.registry.create(id)?;
        if !params.is_empty() {
            unit.set_parameters(params);
        }
        tracing::debug!("算法链追加: {} ({})", unit.name(), id);
        let mut slots = self.slots.write();
        slots.push(Arc::new(ChainSlot::new(unit)));
        Some(slots.len() - 1)
    }

    pub fn remove_at(&self, index: usize) -> bool {
        let mut slots = self.slots.write();
        if index < slots.len() {
            slots.remove(index);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        self.slots.write().clear();
    }

    /// 部分更新指定位置的参数; 索引越界返回 false
    pub fn update_params(&self, index: usize, params: &ParamMap) -> bool {
        let Some(slot) = self.slot(index) else {
            return false;
        };
        let mut unit = slot.unit.lock();
        unit.set_parameters(params);
        slot.revision.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// 每个槽位的 (名称, id)
    pub fn info(&self) -> Vec<(String, AlgorithmId)> {
        self.handles()
            .iter()
            .map(|slot| {
                let unit = slot.unit.lock();
                (unit.name().to_string(), unit.id())
            })
            .collect()
    }

    pub fn id_at(&self, index: usize) -> Option<AlgorithmId> {
        self.slot(index).map(|slot| slot.unit.lock().id())
    }

    pub fn name_at(&self, index: usize) -> Option<String> {
        self.slot(index).map(|slot| slot.unit.lock().name().to_string())
    }

    pub fn params_at(&self, index: usize) -> Option<ParamMap> {
        self.slot(index).map(|slot| slot.unit.lock().parameters())
    }

    pub fn to_entries(&self) -> Vec<ChainEntry> {
        self.handles()
            .iter()
            .map(|slot| {
                let unit = slot.unit.lock();
                ChainEntry {
                    id: unit.id(),
                    params: unit.parameters(),
                }
            })
            .collect()
    }

    /// 当前链的深拷贝
    ///
    /// 读锁只用于复制槽位句柄, 各算法实例的拷贝在锁外完成.
    pub fn snapshot(&self) -> ChainSnapshot {
        let handles = self.handles();
        let entries = handles
            .into_iter()
            .map(|slot| {
                let (unit, revision) = {
                    let guard = slot.unit.lock();
                    (guard.clone_unit(), slot.revision.load(Ordering::Acquire))
                };
                SnapshotEntry { slot, revision, unit }
            })
            .collect();
        ChainSnapshot {
            entries,
            completed: false,
        }
    }

    /// 将成功处理过的快照写回链中
    ///
    /// 只写回仍在链中且修订号未变的槽位; 期间的参数修改优先.
    pub fn write_back(&self, snapshot: ChainSnapshot) {
        if !snapshot.completed {
            return;
        }
        let live = self.handles();
        for entry in snapshot.entries {
            if !live.iter().any(|slot| Arc::ptr_eq(slot, &entry.slot)) {
                continue;
            }
            let mut unit = entry.slot.unit.lock();
            if entry.slot.revision.load(Ordering::Acquire) == entry.revision {
                *unit = entry.unit;
            }
        }
    }

    fn handles(&self) -> Vec<Arc<ChainSlot>> {
        self.slots.read().clone()
    }

    fn slot(&self, index: usize) -> Option<Arc<ChainSlot>> {
        self.slots.read().get(index).cloned()
    }
}

impl std::fmt::Debug for AlgorithmChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmChain").field("units", &self.info()).finish()
    }
}

struct SnapshotEntry {
    slot: Arc<ChainSlot>,
    revision: u64,
    unit: Box<dyn AlgorithmUnit>,
}

/// 算法链在某一时刻的独立拷贝, 工作线程对其处理一帧
pub struct ChainSnapshot {
    entries: Vec<SnapshotEntry>,
    /// 最近一次 run 是否完整成功
    completed: bool,
}

impl ChainSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<AlgorithmId> {
        self.entries.iter().map(|e| e.unit.id()).collect()
    }

    /// 依次执行各算法, 前一个的输出作为后一个的输入
    ///
    /// 第一个失败的算法终止本帧, 错误中带有该算法名称. 算法内部 panic 同样转为错误.
    pub fn run(&mut self, frame: Frame) -> Result<Frame, PipelineError> {
        self.completed = false;
        let mut current = frame;
        for entry in self.entries.iter_mut() {
            let unit = &mut entry.unit;
            let input = current;
            match catch_unwind(AssertUnwindSafe(|| unit.process(input))) {
                Ok(Ok(output)) => current = output,
                Ok(Err(e)) => {
                    return Err(PipelineError::UnitFailed {
                        name: unit.name().to_string(),
                        message: format!("{:#}", e),
                    })
                }
                Err(payload) => {
                    return Err(PipelineError::UnitPanicked {
                        name: unit.name().to_string(),
                        message: panic_message(payload.as_ref()),
                    })
                }
            }
        }
        self.completed = true;
        Ok(current)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
