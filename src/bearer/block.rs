//! 承载阻塞原因
//!
//! 一个承载可同时带有多个阻塞原因，以位掩码表示。

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BlockReasons(u8);

impl BlockReasons {
    pub const NONE: BlockReasons = BlockReasons(0);
    /// 链路带宽不足
    pub const BANDWIDTH: BlockReasons = BlockReasons(1 << 0);
    /// 交换机 CPU 过载
    pub const CPU: BlockReasons = BlockReasons(1 << 1);
    /// 流表已满
    pub const TABLE: BlockReasons = BlockReasons(1 << 2);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn insert(&mut self, other: BlockReasons) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: BlockReasons) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl std::ops::BitOr for BlockReasons {
    type Output = BlockReasons;

    fn bitor(self, rhs: BlockReasons) -> BlockReasons {
        BlockReasons(self.0 | rhs.0)
    }
}

impl fmt::Display for BlockReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (Self::BANDWIDTH, "bandwidth"),
            (Self::CPU, "cpu"),
            (Self::TABLE, "table"),
        ]
        .iter()
        .filter(|(r, _)| self.contains(*r))
        .map(|(_, n)| *n)
        .collect();
        f.write_str(&names.join("|"))
    }
}
