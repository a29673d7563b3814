//! OpenFlow 流水线布局与命令文本
//!
//! 流表编号固定：输入表 (0) → 分类表 (1) → N 张切片路由表 → 带宽限制表 → 输出表。
//! cookie 编码 (接口, 优先级, TEID) 以便按承载选择性删除；meter id 编码
//! (切片, 出端口) 或 (方向, TEID)。命令以文本形式交给外部 OpenFlow 代理。

use std::fmt;

use crate::bearer::Interface;
use crate::slice::SliceId;

/// 流表布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    num_slices: u8,
}

impl TableLayout {
    pub const INPUT: u8 = 0;
    pub const CLASSIFY: u8 = 1;
    const FIRST_SLICE: u8 = 2;

    pub fn new(num_slices: usize) -> Self {
        Self {
            num_slices: num_slices.min(200) as u8,
        }
    }

    pub fn num_slices(&self) -> usize {
        self.num_slices as usize
    }

    /// 第 `pos` 个切片的路由表
    pub fn slice_table(&self, pos: usize) -> u8 {
        Self::FIRST_SLICE + pos.min(self.num_slices.saturating_sub(1) as usize) as u8
    }

    pub fn bandwidth(&self) -> u8 {
        Self::FIRST_SLICE + self.num_slices
    }

    pub fn output(&self) -> u8 {
        self.bandwidth() + 1
    }

    /// 流水线中的流表总数
    pub fn num_tables(&self) -> usize {
        self.output() as usize + 1
    }
}

/// 流规则 cookie：`[iface:4][reserved:12][priority:16][teid:32]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie {
    pub iface: u8,
    pub priority: u16,
    pub teid: u32,
}

impl Cookie {
    /// 路由规则的 cookie
    pub fn routing(iface: Interface, priority: u16, teid: u32) -> Self {
        Self {
            iface: iface.code(),
            priority,
            teid,
        }
    }

    /// 分类与限速规则的 cookie（不属于某个接口）
    pub fn bearer(priority: u16, teid: u32) -> Self {
        Self {
            iface: 0,
            priority,
            teid,
        }
    }

    pub fn to_u64(self) -> u64 {
        (u64::from(self.iface & 0xF) << 60) | (u64::from(self.priority) << 32) | u64::from(self.teid)
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            iface: ((raw >> 60) & 0xF) as u8,
            priority: ((raw >> 32) & 0xFFFF) as u16,
            teid: (raw & 0xFFFF_FFFF) as u32,
        }
    }
}

const SLICE_METER_TAG: u32 = 0xC000_0000;
const MBR_METER_TAG: u32 = 0x8000_0000;

/// 切片 meter：`0xC000_0000 | slice << 8 | egress_port`
pub fn slice_meter_id(slice: SliceId, egress_port: u32) -> u32 {
    SLICE_METER_TAG | (u32::from(slice.0) << 8) | (egress_port & 0xFF)
}

/// 承载 MBR meter：bit31 置位，bit30 表示上行，低 30 位为 TEID
pub fn mbr_meter_id(teid: u32, uplink: bool) -> u32 {
    MBR_METER_TAG | (u32::from(uplink) << 30) | (teid & 0x3FFF_FFFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModCmd {
    Add,
    Mod,
    Del,
}

impl fmt::Display for ModCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModCmd::Add => f.write_str("add"),
            ModCmd::Mod => f.write_str("mod"),
            ModCmd::Del => f.write_str("del"),
        }
    }
}

/// OFPFF_SEND_FLOW_REM | OFPFF_CHECK_OVERLAP
const FLOW_FLAGS: u16 = 0x0003;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub cmd: ModCmd,
    pub table: u8,
    pub priority: u16,
    pub cookie: Cookie,
    pub matches: String,
    pub instructions: String,
}

impl FlowMod {
    pub fn add(table: u8, priority: u16, cookie: Cookie, matches: String, instructions: String) -> Self {
        Self {
            cmd: ModCmd::Add,
            table,
            priority,
            cookie,
            matches,
            instructions,
        }
    }

    /// 按 cookie 精确删除
    pub fn del(table: u8, cookie: Cookie) -> Self {
        Self {
            cmd: ModCmd::Del,
            table,
            priority: 0,
            cookie,
            matches: String::new(),
            instructions: String::new(),
        }
    }
}

impl fmt::Display for FlowMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cmd {
            ModCmd::Del => write!(
                f,
                "flow-mod cmd=del,table={},cookie={:#018x},cookie_mask=0xffffffffffffffff",
                self.table,
                self.cookie.to_u64()
            ),
            cmd => write!(
                f,
                "flow-mod cmd={},table={},prio={},cookie={:#018x},flags={:#06x} {} {}",
                cmd,
                self.table,
                self.priority,
                self.cookie.to_u64(),
                FLOW_FLAGS,
                self.matches,
                self.instructions
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterMod {
    pub cmd: ModCmd,
    pub meter: u32,
    pub bit_rate: u64,
}

/// OFPMF_KBPS
const METER_FLAGS: u16 = 0x0001;

impl MeterMod {
    pub fn kbps(&self) -> u64 {
        self.bit_rate / 1000
    }
}

impl fmt::Display for MeterMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cmd {
            ModCmd::Del => write!(f, "meter-mod cmd=del,meter={:#x}", self.meter),
            cmd => write!(
                f,
                "meter-mod cmd={},flags={:#06x},meter={:#x} drop:rate={}",
                cmd,
                METER_FLAGS,
                self.meter,
                self.kbps()
            ),
        }
    }
}

/// 发往交换机的一条编程命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfCommand {
    Flow(FlowMod),
    Meter(MeterMod),
}

impl fmt::Display for OfCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfCommand::Flow(m) => m.fmt(f),
            OfCommand::Meter(m) => m.fmt(f),
        }
    }
}
