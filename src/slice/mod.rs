//! 网络切片
//!
//! 切片是拥有独立带宽配额的隔离流量类。本模块定义切片标识、
//! 切片控制器句柄（优先级、是否参与带宽共享、基础配额）以及
//! 按优先级分层的切片注册表。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 切片标识符。`SPARE` 与 `ALL` 为保留值：
/// 前者记录未分配（空闲）配额，后者是所有真实切片的聚合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceId(pub u8);

impl SliceId {
    pub const SPARE: SliceId = SliceId(254);
    pub const ALL: SliceId = SliceId(255);

    /// 是否为真实切片（非保留值）
    pub fn is_real(self) -> bool {
        self != Self::SPARE && self != Self::ALL
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SPARE => f.write_str("spare"),
            Self::ALL => f.write_str("all"),
            SliceId(n) => write!(f, "s{n}"),
        }
    }
}

/// 流量类型：保证比特率（GBR）与非保证比特率（Non-GBR）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosType {
    Gbr,
    NonGbr,
}

impl QosType {
    pub const ALL: [QosType; 2] = [QosType::Gbr, QosType::NonGbr];

    pub(crate) fn index(self) -> usize {
        match self {
            QosType::Gbr => 0,
            QosType::NonGbr => 1,
        }
    }
}

/// 切片控制器句柄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceInfo {
    pub id: SliceId,
    #[serde(default)]
    pub name: String,
    /// 共享优先级：授予额外带宽时从最大值开始，回收时从最小值开始
    #[serde(default)]
    pub priority: i32,
    /// 是否参与空闲带宽共享
    #[serde(default = "default_sharing")]
    pub sharing: bool,
    /// 每条链路上的基础配额（百分比）
    pub quota: u8,
}

fn default_sharing() -> bool {
    true
}

impl SliceInfo {
    pub fn new(id: SliceId, name: impl Into<String>, priority: i32, sharing: bool, quota: u8) -> Self {
        Self {
            id,
            name: name.into(),
            priority,
            sharing,
            quota,
        }
    }
}

/// 同一优先级的一组共享切片，成员按注册顺序排列。
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityTier {
    pub priority: i32,
    pub members: Vec<SliceId>,
}

/// 切片注册表：切片创建后只读，共享切片预先按优先级分层。
#[derive(Debug, Clone, Default)]
pub struct SliceRegistry {
    slices: Vec<SliceInfo>,
    /// 共享切片的优先级分层，按优先级数值升序
    tiers: Vec<PriorityTier>,
}

impl SliceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册切片。重复的 id 会覆盖旧值。
    pub fn register(&mut self, info: SliceInfo) {
        match self.slices.iter_mut().find(|s| s.id == info.id) {
            Some(slot) => *slot = info,
            None => self.slices.push(info),
        }
        self.rebuild_tiers();
    }

    fn rebuild_tiers(&mut self) {
        let mut tiers: Vec<PriorityTier> = Vec::new();
        for s in self.slices.iter().filter(|s| s.sharing) {
            match tiers.iter_mut().find(|t| t.priority == s.priority) {
                Some(t) => t.members.push(s.id),
                None => tiers.push(PriorityTier {
                    priority: s.priority,
                    members: vec![s.id],
                }),
            }
        }
        // 稳定排序：同优先级成员保持注册顺序
        tiers.sort_by_key(|t| t.priority);
        self.tiers = tiers;
    }

    pub fn get(&self, id: SliceId) -> Option<&SliceInfo> {
        self.slices.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: SliceId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// 按注册顺序遍历所有切片
    pub fn iter(&self) -> impl Iterator<Item = &SliceInfo> {
        self.slices.iter()
    }

    /// 共享切片的 id（注册顺序）
    pub fn sharing_ids(&self) -> Vec<SliceId> {
        self.slices.iter().filter(|s| s.sharing).map(|s| s.id).collect()
    }

    /// 切片在注册表中的位置，用于分配每切片的路由表。
    pub fn position(&self, id: SliceId) -> Option<usize> {
        self.slices.iter().position(|s| s.id == id)
    }

    /// 回收顺序：优先级数值从小到大。
    pub fn tiers_ascending(&self) -> impl Iterator<Item = &PriorityTier> {
        self.tiers.iter()
    }

    /// 授予顺序：优先级数值从大到小。
    pub fn tiers_descending(&self) -> impl Iterator<Item = &PriorityTier> {
        self.tiers.iter().rev()
    }
}
