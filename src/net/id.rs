//! 标识符类型
//!
//! 定义交换机、链路及链路方向的标识符。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 交换机标识符（在环形拓扑中即为环上的下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchId(pub usize);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw{}", self.0)
    }
}

/// 链路标识符：无序交换机对，内部按 (小, 大) 归一化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    lo: SwitchId,
    hi: SwitchId,
}

impl LinkKey {
    pub fn new(a: SwitchId, b: SwitchId) -> Self {
        if a <= b {
            Self { lo: a, hi: b }
        } else {
            Self { lo: b, hi: a }
        }
    }

    /// 编号较小的一端（正向的起点）
    pub fn lo(&self) -> SwitchId {
        self.lo
    }

    /// 编号较大的一端（正向的终点）
    pub fn hi(&self) -> SwitchId {
        self.hi
    }

    pub fn contains(&self, sw: SwitchId) -> bool {
        self.lo == sw || self.hi == sw
    }

    /// 从 `from` 发往另一端时使用的方向。
    pub fn direction_from(&self, from: SwitchId) -> LinkDir {
        if from == self.lo {
            LinkDir::Forward
        } else {
            LinkDir::Backward
        }
    }

    /// 某方向上的发送端交换机
    pub fn source(&self, dir: LinkDir) -> SwitchId {
        match dir {
            LinkDir::Forward => self.lo,
            LinkDir::Backward => self.hi,
        }
    }

    /// 某方向上的接收端交换机
    pub fn target(&self, dir: LinkDir) -> SwitchId {
        self.source(dir.inverse())
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.lo, self.hi)
    }
}

/// 链路方向。正向为编号小的交换机发往编号大的交换机。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkDir {
    Forward,
    Backward,
}

impl LinkDir {
    pub const ALL: [LinkDir; 2] = [LinkDir::Forward, LinkDir::Backward];

    pub fn inverse(self) -> LinkDir {
        match self {
            LinkDir::Forward => LinkDir::Backward,
            LinkDir::Backward => LinkDir::Forward,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            LinkDir::Forward => 0,
            LinkDir::Backward => 1,
        }
    }
}

impl fmt::Display for LinkDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDir::Forward => f.write_str("fwd"),
            LinkDir::Backward => f.write_str("bwd"),
        }
    }
}
