//! 交换机资源
//!
//! 记录每台传输交换机的 CPU 负载、流表占用以及到邻居的端口，
//! 用于准入时检查交换机侧资源。

use std::collections::BTreeMap;

use tracing::{trace, warn};

use super::id::SwitchId;

/// 单张流表的容量与占用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowTable {
    pub size: u32,
    pub used: u32,
}

/// 交换机
#[derive(Debug, Clone)]
pub struct SwitchInfo {
    id: SwitchId,
    /// CPU 使用率（0..=1），由外部统计周期性写入
    cpu_usage: f64,
    tables: Vec<FlowTable>,
    /// 邻居 -> 本端端口号
    ports: BTreeMap<SwitchId, u32>,
    next_port: u32,
}

impl SwitchInfo {
    pub fn new(id: SwitchId, num_tables: usize, table_size: u32) -> Self {
        Self {
            id,
            cpu_usage: 0.0,
            tables: vec![
                FlowTable {
                    size: table_size,
                    used: 0,
                };
                num_tables
            ],
            ports: BTreeMap::new(),
            next_port: 1,
        }
    }

    pub fn id(&self) -> SwitchId {
        self.id
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_usage
    }

    pub fn set_cpu_usage(&mut self, usage: f64) {
        self.cpu_usage = usage.clamp(0.0, 1.0);
    }

    pub fn table(&self, table: u8) -> Option<&FlowTable> {
        self.tables.get(table as usize)
    }

    /// CPU 使用率低于阈值时可接纳新承载
    pub fn has_cpu(&self, threshold: f64) -> bool {
        self.cpu_usage < threshold
    }

    /// 再安装一条规则后占用率不超过阈值
    pub fn has_table(&self, table: u8, threshold: f64) -> bool {
        self.table(table).is_some_and(|t| {
            f64::from(t.used.saturating_add(1)) <= f64::from(t.size) * threshold
        })
    }

    pub(crate) fn rule_added(&mut self, table: u8) {
        match self.tables.get_mut(table as usize) {
            Some(t) => t.used = t.used.saturating_add(1),
            None => warn!(switch = %self.id, table, "安装规则到不存在的流表"),
        }
        trace!(switch = %self.id, table, "流表占用 +1");
    }

    pub(crate) fn rule_removed(&mut self, table: u8) {
        if let Some(t) = self.tables.get_mut(table as usize) {
            t.used = t.used.saturating_sub(1);
        }
        trace!(switch = %self.id, table, "流表占用 -1");
    }

    /// 通往邻居的端口
    pub fn port_to(&self, neighbor: SwitchId) -> Option<u32> {
        self.ports.get(&neighbor).copied()
    }

    /// 邻居列表（按编号升序）
    pub fn neighbors(&self) -> impl Iterator<Item = SwitchId> + '_ {
        self.ports.keys().copied()
    }

    fn attach(&mut self, neighbor: SwitchId) -> u32 {
        if let Some(p) = self.ports.get(&neighbor) {
            return *p;
        }
        let port = self.next_port;
        self.next_port += 1;
        self.ports.insert(neighbor, port);
        port
    }
}

/// 交换机注册表，下标即 `SwitchId`
#[derive(Debug, Clone, Default)]
pub struct SwitchRegistry {
    switches: Vec<SwitchInfo>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加交换机，返回其标识符
    pub fn add(&mut self, num_tables: usize, table_size: u32) -> SwitchId {
        let id = SwitchId(self.switches.len());
        self.switches.push(SwitchInfo::new(id, num_tables, table_size));
        id
    }

    /// 在两台交换机之间分配端口
    pub fn connect(&mut self, a: SwitchId, b: SwitchId) -> Option<(u32, u32)> {
        if a.0 >= self.switches.len() || b.0 >= self.switches.len() || a == b {
            return None;
        }
        let pa = self.switches[a.0].attach(b);
        let pb = self.switches[b.0].attach(a);
        Some((pa, pb))
    }

    pub fn get(&self, id: SwitchId) -> Option<&SwitchInfo> {
        self.switches.get(id.0)
    }

    pub fn get_mut(&mut self, id: SwitchId) -> Option<&mut SwitchInfo> {
        self.switches.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SwitchInfo> {
        self.switches.iter()
    }
}
