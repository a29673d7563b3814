//! 承载（bearer）
//!
//! 承载是一条被接纳的业务流（隧道），以 TEID 标识，属于某个切片，
//! 带有保证/最大比特率以及接入段和核心段两个逻辑接口上的路径状态。

mod block;
mod path;

pub use block::BlockReasons;
pub use path::{BearerPathState, Interface, PathState, Route};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::net::SwitchId;
use crate::slice::{QosType, SliceId};

/// 承载 QoS 参数（bps）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerQos {
    pub gbr_dl: u64,
    pub gbr_ul: u64,
    pub mbr_dl: u64,
    pub mbr_ul: u64,
}

/// 承载的端点交换机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerEndpoints {
    pub enb: SwitchId,
    pub sgw: SwitchId,
    pub pgw: SwitchId,
}

#[derive(Debug, Clone)]
pub struct Bearer {
    pub teid: u32,
    pub slice: SliceId,
    pub qos: BearerQos,
    /// 流规则优先级，每次切换递增
    pub priority: u16,
    pub has_dl: bool,
    pub has_ul: bool,
    pub endpoints: BearerEndpoints,
    pub paths: BearerPathState,
    pub block_reasons: BlockReasons,
    pub active: bool,
    pub installed: bool,
    pub mbr_installed: bool,
}

impl Bearer {
    pub fn new(teid: u32, slice: SliceId, qos: BearerQos, endpoints: BearerEndpoints) -> Self {
        Self {
            teid,
            slice,
            qos,
            priority: 1,
            has_dl: true,
            has_ul: true,
            endpoints,
            paths: BearerPathState::default(),
            block_reasons: BlockReasons::NONE,
            active: false,
            installed: false,
            mbr_installed: false,
        }
    }

    pub fn with_traffic(mut self, has_dl: bool, has_ul: bool) -> Self {
        self.has_dl = has_dl;
        self.has_ul = has_ul;
        self
    }

    pub fn is_gbr(&self) -> bool {
        self.qos.gbr_dl > 0 || self.qos.gbr_ul > 0
    }

    pub fn has_mbr(&self) -> bool {
        (self.has_dl && self.qos.mbr_dl > 0) || (self.has_ul && self.qos.mbr_ul > 0)
    }

    pub fn qos_type(&self) -> QosType {
        if self.is_gbr() { QosType::Gbr } else { QosType::NonGbr }
    }

    /// 需要在下行方向预留的比特率
    pub fn gbr_dl(&self) -> u64 {
        if self.has_dl { self.qos.gbr_dl } else { 0 }
    }

    /// 需要在上行方向预留的比特率
    pub fn gbr_ul(&self) -> u64 {
        if self.has_ul { self.qos.gbr_ul } else { 0 }
    }

    pub fn is_blocked(&self) -> bool {
        !self.block_reasons.is_empty()
    }

    /// 接口下行方向的 (起点, 终点) 交换机
    pub fn downlink_ends(&self, iface: Interface) -> (SwitchId, SwitchId) {
        match iface {
            Interface::Access => (self.endpoints.sgw, self.endpoints.enb),
            Interface::Core => (self.endpoints.pgw, self.endpoints.sgw),
        }
    }
}

/// TEID -> 承载 的显式注册表，由控制器持有
#[derive(Debug, Clone, Default)]
pub struct BearerRegistry {
    bearers: BTreeMap<u32, Bearer>,
}

impl BearerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入承载；TEID 已存在时返回 false
    pub fn insert(&mut self, bearer: Bearer) -> bool {
        if self.bearers.contains_key(&bearer.teid) {
            return false;
        }
        self.bearers.insert(bearer.teid, bearer);
        true
    }

    pub fn get(&self, teid: u32) -> Option<&Bearer> {
        self.bearers.get(&teid)
    }

    pub fn get_mut(&mut self, teid: u32) -> Option<&mut Bearer> {
        self.bearers.get_mut(&teid)
    }

    pub fn remove(&mut self, teid: u32) -> Option<Bearer> {
        self.bearers.remove(&teid)
    }

    pub fn len(&self) -> usize {
        self.bearers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bearers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bearer> {
        self.bearers.values()
    }
}
