//! 链路统计快照
//!
//! 可打印的每链路/方向/切片快照，供日志与 CLI 输出使用。格式仅供人阅读。

use std::fmt;

use serde::Serialize;

use super::id::{LinkDir, LinkKey};
use crate::slice::SliceId;

/// 某 (链路, 方向, 切片) 在某一时刻的带宽状态（单位 bps）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    #[serde(skip)]
    pub link: LinkKey,
    pub dir: LinkDir,
    pub slice: SliceId,
    pub quota: u8,
    pub max: u64,
    pub reserved: u64,
    pub unreserved: u64,
    pub extra: u64,
    pub meter: u64,
    pub gbr_short: u64,
    pub gbr_long: u64,
    pub non_gbr_short: u64,
    pub non_gbr_long: u64,
}

fn mbps(bps: u64) -> f64 {
    bps as f64 / 1e6
}

impl LinkSnapshot {
    /// 与 `Display` 输出对齐的表头
    pub fn header() -> String {
        format!(
            "{:<14} {:>4} {:>6} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "link", "dir", "slice", "quota", "max", "reserved", "unreserved", "extra", "meter",
            "gbr_s", "gbr_l", "ngbr_s", "ngbr_l"
        )
    }
}

impl fmt::Display for LinkSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<14} {:>4} {:>6} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            self.link.to_string(),
            self.dir.to_string(),
            self.slice.to_string(),
            self.quota,
            mbps(self.max),
            mbps(self.reserved),
            mbps(self.unreserved),
            mbps(self.extra),
            mbps(self.meter),
            mbps(self.gbr_short),
            mbps(self.gbr_long),
            mbps(self.non_gbr_short),
            mbps(self.non_gbr_long),
        )
    }
}
