//! 链路注册表
//!
//! 以无序交换机对为键查找链路账本，并按确定性顺序遍历全部链路。
//! 由控制器持有并显式传递，不使用进程级全局状态。

use std::collections::BTreeMap;

use super::id::{LinkKey, SwitchId};
use super::link::{EwmaConfig, LinkInfo};
use crate::sim::SimTime;

#[derive(Debug, Clone, Default)]
pub struct LinkRegistry {
    links: BTreeMap<LinkKey, LinkInfo>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条新链路；已存在时返回已有账本。
    pub fn insert(&mut self, a: SwitchId, b: SwitchId, capacity: u64) -> &mut LinkInfo {
        let key = LinkKey::new(a, b);
        self.links
            .entry(key)
            .or_insert_with(|| LinkInfo::new(key, capacity))
    }

    pub fn get(&self, a: SwitchId, b: SwitchId) -> Option<&LinkInfo> {
        self.links.get(&LinkKey::new(a, b))
    }

    pub fn get_mut(&mut self, a: SwitchId, b: SwitchId) -> Option<&mut LinkInfo> {
        self.links.get_mut(&LinkKey::new(a, b))
    }

    pub fn by_key(&self, key: LinkKey) -> Option<&LinkInfo> {
        self.links.get(&key)
    }

    pub fn by_key_mut(&mut self, key: LinkKey) -> Option<&mut LinkInfo> {
        self.links.get_mut(&key)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn keys(&self) -> Vec<LinkKey> {
        self.links.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkInfo> {
        self.links.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LinkInfo> {
        self.links.values_mut()
    }

    /// 对全部链路执行一次 EWMA 更新
    pub fn ewma_update(&mut self, interval: SimTime, cfg: &EwmaConfig) {
        for link in self.links.values_mut() {
            link.ewma_update(interval, cfg);
        }
    }
}
