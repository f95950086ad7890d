//! 算法注册表 (AlgorithmRegistry)
//!
//! 算法 id → 工厂函数. 显式构造后以 `Arc<AlgorithmRegistry>` 注入到链和流水线,
//! 不使用全局单例.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::algorithms::{register_builtins, AlgorithmDescriptor, AlgorithmId, AlgorithmUnit};

type Factory = Arc<dyn Fn() -> Box<dyn AlgorithmUnit> + Send + Sync>;

#[derive(Default)]
pub struct AlgorithmRegistry {
    factories: RwLock<BTreeMap<AlgorithmId, Factory>>,
}

impl AlgorithmRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置算法
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// 注册工厂函数; 同一 id 重复注册时后者覆盖前者
    pub fn register<F>(&self, id: AlgorithmId, factory: F)
    where
        F: Fn() -> Box<dyn AlgorithmUnit> + Send + Sync + 'static,
    {
        if self.factories.write().insert(id, Arc::new(factory)).is_some() {
            tracing::debug!("算法 {} 的工厂被覆盖", id);
        }
    }

    /// 以默认参数创建新实例; 未知 id 返回 None
    pub fn create(&self, id: AlgorithmId) -> Option<Box<dyn AlgorithmUnit>> {
        // 锁外构造
        let factory = self.factories.read().get(&id).cloned()?;
        Some(factory())
    }

    pub fn is_registered(&self, id: AlgorithmId) -> bool {
        self.factories.read().contains_key(&id)
    }

    /// 升序排列的已注册 id
    pub fn list_ids(&self) -> Vec<AlgorithmId> {
        self.factories.read().keys().copied().collect()
    }

    /// (id, 名称) 列表
    pub fn list_descriptors(&self) -> Vec<(AlgorithmId, String)> {
        self.descriptors().into_iter().map(|d| (d.id, d.name)).collect()
    }

    /// 全部算法的完整元数据
    pub fn descriptors(&self) -> Vec<AlgorithmDescriptor> {
        self.list_ids()
            .into_iter()
            .filter_map(|id| self.create(id))
            .map(|unit| unit.describe().clone())
            .collect()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry").field("ids", &self.list_ids()).finish()
    }
}
