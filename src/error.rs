//! 错误类型
//!
//! 账本变更与控制器生命周期的错误。准入失败不是错误（以布尔值与阻塞原因表示），
//! 这里只描述会被拒绝的非法变更以及控制面/数据面失步。

use thiserror::Error;

use crate::bearer::Interface;
use crate::net::{LinkDir, LinkKey, SwitchId};
use crate::slice::SliceId;

/// 链路带宽账本的变更错误。返回错误时账本状态保持不变。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("slice {0} is not registered on this link")]
    UnknownSlice(SliceId),

    #[error("slice {0} is a reserved pseudo-slice and cannot be mutated directly")]
    ReservedSlice(SliceId),

    #[error("reserved bit rate of {slice} ({dir}) would drop below zero: {current} bps {delta:+} bps")]
    ReservedUnderflow {
        dir: LinkDir,
        slice: SliceId,
        current: u64,
        delta: i64,
    },

    #[error("reserved bit rate of {slice} ({dir}) would exceed quota: {current} bps {delta:+} bps > {quota_bit_rate} bps")]
    ReservedOverflow {
        dir: LinkDir,
        slice: SliceId,
        current: u64,
        delta: i64,
        quota_bit_rate: u64,
    },

    #[error("extra bit rate of {slice} ({dir}) would drop below zero: {current} bps {delta:+} bps")]
    ExtraUnderflow {
        dir: LinkDir,
        slice: SliceId,
        current: u64,
        delta: i64,
    },

    #[error("quota of {slice} ({dir}) out of range: {current}% {delta:+}%")]
    QuotaOutOfRange {
        dir: LinkDir,
        slice: SliceId,
        current: u8,
        delta: i32,
    },

    #[error("quota of {slice} ({dir}) would under-provision {reserved} bps already reserved")]
    QuotaUnderProvisioned {
        dir: LinkDir,
        slice: SliceId,
        reserved: u64,
    },
}

/// 控制器错误
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown bearer teid={0:#x}")]
    UnknownBearer(u32),

    #[error("bearer teid={0:#x} already registered")]
    DuplicateBearer(u32),

    #[error("unknown slice {0}")]
    UnknownSlice(SliceId),

    #[error("no link between {0} and {1}")]
    UnknownLink(SwitchId, SwitchId),

    #[error("unknown switch {0}")]
    UnknownSwitch(SwitchId),

    #[error("no route for bearer teid={teid:#x} on {iface} interface")]
    Unroutable { teid: u32, iface: Interface },

    #[error("ledger mutation failed on link {link}: {source}")]
    Ledger {
        link: LinkKey,
        #[source]
        source: LedgerError,
    },

    #[error("flow rule cookie={cookie:#x} removed from {switch} while bearer teid={teid:#x} is active")]
    FlowRemovedWhileActive {
        switch: SwitchId,
        cookie: u64,
        teid: u32,
    },
}

pub type Result<T> = std::result::Result<T, BrokerError>;
