//! 控制器事件
//!
//! 统计收集等订阅者通过回调接收事件，控制器不直接依赖它们。

use serde::Serialize;

use crate::bearer::{BlockReasons, Route};
use crate::net::{LinkDir, LinkKey, SwitchId};
use crate::slice::SliceId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokerEvent {
    BearerRequested {
        teid: u32,
        slice: SliceId,
        accepted: bool,
        reasons: BlockReasons,
        access: Route,
        core: Route,
    },
    BearerInstalled {
        teid: u32,
    },
    BearerRemoved {
        teid: u32,
    },
    BearerHandover {
        teid: u32,
        enb: SwitchId,
        accepted: bool,
    },
    MeterAdjusted {
        #[serde(skip)]
        link: LinkKey,
        dir: LinkDir,
        slice: SliceId,
        bit_rate: u64,
    },
    ExtraAdjusted {
        #[serde(skip)]
        link: LinkKey,
        dir: LinkDir,
        slice: SliceId,
        delta: i64,
    },
}

/// 事件订阅者
pub type BrokerObserver = Box<dyn FnMut(&BrokerEvent) + Send>;

/// 准入与编程统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub requests: u64,
    pub accepted: u64,
    pub blocked: u64,
    pub blocked_bandwidth: u64,
    pub blocked_cpu: u64,
    pub blocked_table: u64,
    pub handovers: u64,
    pub meter_mods: u64,
}

impl BrokerStats {
    pub(crate) fn record_request(&mut self, accepted: bool, reasons: BlockReasons) {
        self.requests += 1;
        if accepted {
            self.accepted += 1;
            return;
        }
        self.blocked += 1;
        if reasons.contains(BlockReasons::BANDWIDTH) {
            self.blocked_bandwidth += 1;
        }
        if reasons.contains(BlockReasons::CPU) {
            self.blocked_cpu += 1;
        }
        if reasons.contains(BlockReasons::TABLE) {
            self.blocked_table += 1;
        }
    }
}
