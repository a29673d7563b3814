//! 链路带宽账本
//!
//! 每条物理链路维护两个方向上、每个切片的带宽记录：配额、已预留、
//! 额外（借用）比特率、最近一次下发的 meter 速率，以及两种时间尺度的
//! EWMA 吞吐。`ALL` 聚合项随每次变更同步更新，始终等于真实切片之和。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::id::{LinkDir, LinkKey, SwitchId};
use super::stats::LinkSnapshot;
use crate::error::LedgerError;
use crate::sim::SimTime;
use crate::slice::{QosType, SliceId};

/// EWMA 时间尺度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EwmaTerm {
    Short,
    Long,
}

impl EwmaTerm {
    fn index(self) -> usize {
        match self {
            EwmaTerm::Short => 0,
            EwmaTerm::Long => 1,
        }
    }
}

/// EWMA 参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaConfig {
    /// 短期平滑系数（约 1s 窗口）
    pub short_alpha: f64,
    /// 长期平滑系数（约 20s 窗口）
    pub long_alpha: f64,
    /// 更新周期（毫秒）
    pub timeout_ms: u64,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self {
            short_alpha: 0.2,
            long_alpha: 0.01,
            timeout_ms: 200,
        }
    }
}

impl EwmaConfig {
    pub fn timeout(&self) -> SimTime {
        SimTime::from_millis(self.timeout_ms)
    }

    fn alpha(&self, term: EwmaTerm) -> f64 {
        match term {
            EwmaTerm::Short => self.short_alpha,
            EwmaTerm::Long => self.long_alpha,
        }
    }
}

/// 单个 (方向, 切片) 的带宽记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceMetadata {
    quota: u8,
    reserved: u64,
    extra: u64,
    meter: u64,
    /// [qos][term]
    ewma: [[f64; 2]; 2],
    /// 自上次 EWMA 更新以来发送的字节数，[qos]
    tx_bytes: [u64; 2],
}

impl SliceMetadata {
    fn with_quota(quota: u8) -> Self {
        Self {
            quota,
            ..Self::default()
        }
    }

    pub fn quota(&self) -> u8 {
        self.quota
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn extra(&self) -> u64 {
        self.extra
    }

    pub fn meter(&self) -> u64 {
        self.meter
    }

    pub fn ewma(&self, qos: QosType, term: EwmaTerm) -> f64 {
        self.ewma[qos.index()][term.index()]
    }
}

type DirLedger = BTreeMap<SliceId, SliceMetadata>;

/// 链路带宽账本，不感知拓扑。
#[derive(Debug, Clone)]
pub struct LinkInfo {
    key: LinkKey,
    capacity: u64,
    dirs: [DirLedger; 2],
}

fn apply_delta(value: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        value.checked_add(delta as u64)
    } else {
        value.checked_sub(delta.unsigned_abs())
    }
}

impl LinkInfo {
    /// 新链路：全部容量计入空闲配额。
    pub fn new(key: LinkKey, capacity: u64) -> Self {
        let mut dir = DirLedger::new();
        dir.insert(SliceId::SPARE, SliceMetadata::with_quota(100));
        dir.insert(SliceId::ALL, SliceMetadata::with_quota(0));
        Self {
            key,
            capacity,
            dirs: [dir.clone(), dir],
        }
    }

    pub fn key(&self) -> LinkKey {
        self.key
    }

    /// 链路名义容量（bps）
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 从 `from` 发往另一端的方向
    pub fn direction(&self, from: SwitchId) -> LinkDir {
        self.key.direction_from(from)
    }

    /// 注册真实切片（初始配额为 0）。已存在时不做任何修改。
    pub fn add_slice(&mut self, slice: SliceId) -> Result<(), LedgerError> {
        if !slice.is_real() {
            return Err(LedgerError::ReservedSlice(slice));
        }
        for dir in &mut self.dirs {
            dir.entry(slice).or_default();
        }
        Ok(())
    }

    /// 已注册的真实切片
    pub fn slices(&self) -> impl Iterator<Item = SliceId> + '_ {
        self.dirs[0].keys().copied().filter(|s| s.is_real())
    }

    pub fn metadata(&self, dir: LinkDir, slice: SliceId) -> Option<&SliceMetadata> {
        self.dirs[dir.index()].get(&slice)
    }

    fn meta(&self, dir: LinkDir, slice: SliceId) -> Result<&SliceMetadata, LedgerError> {
        self.metadata(dir, slice).ok_or(LedgerError::UnknownSlice(slice))
    }

    fn meta_or_default(&self, dir: LinkDir, slice: SliceId) -> SliceMetadata {
        self.metadata(dir, slice).cloned().unwrap_or_default()
    }

    pub fn quota(&self, dir: LinkDir, slice: SliceId) -> u8 {
        self.meta_or_default(dir, slice).quota
    }

    /// 配额折算的比特率
    pub fn quota_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.quota_to_bit_rate(self.quota(dir, slice))
    }

    fn quota_to_bit_rate(&self, quota: u8) -> u64 {
        ((self.capacity as u128) * (quota as u128) / 100) as u64
    }

    pub fn reserved_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.metadata(dir, slice).map_or(0, |m| m.reserved)
    }

    pub fn extra_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.metadata(dir, slice).map_or(0, |m| m.extra)
    }

    pub fn meter_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.metadata(dir, slice).map_or(0, |m| m.meter)
    }

    /// 切片当前可用的最大比特率：配额 + 借用
    pub fn max_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.quota_bit_rate(dir, slice)
            .saturating_add(self.extra_bit_rate(dir, slice))
    }

    /// 最大比特率中尚未预留的部分
    pub fn unreserved_bit_rate(&self, dir: LinkDir, slice: SliceId) -> u64 {
        self.max_bit_rate(dir, slice)
            .saturating_sub(self.reserved_bit_rate(dir, slice))
    }

    /// 某流量类型的 EWMA 吞吐（bps）
    pub fn ewma_thp(&self, dir: LinkDir, slice: SliceId, qos: QosType, term: EwmaTerm) -> u64 {
        self.metadata(dir, slice)
            .map_or(0, |m| m.ewma(qos, term).max(0.0) as u64)
    }

    /// GBR 与 Non-GBR 合计的 EWMA 吞吐（bps）
    pub fn thp_bit_rate(&self, dir: LinkDir, slice: SliceId, term: EwmaTerm) -> u64 {
        QosType::ALL
            .iter()
            .map(|&q| self.ewma_thp(dir, slice, q, term))
            .sum()
    }

    /// 空闲比特率 = max(0, 最大比特率 - EWMA 吞吐)
    pub fn idle_bit_rate(&self, dir: LinkDir, slice: SliceId, term: EwmaTerm) -> u64 {
        self.max_bit_rate(dir, slice)
            .saturating_sub(self.thp_bit_rate(dir, slice, term))
    }

    /// 超额比特率 = max(0, EWMA 吞吐 - 配额比特率)
    pub fn over_bit_rate(&self, dir: LinkDir, slice: SliceId, term: EwmaTerm) -> u64 {
        self.thp_bit_rate(dir, slice, term)
            .saturating_sub(self.quota_bit_rate(dir, slice))
    }

    /// 只读检查：reserved + amount 是否不超过 min(配额, 配额 × 阻塞阈值)。
    /// 额外借用的带宽不参与 GBR 准入。
    pub fn has_bit_rate(&self, dir: LinkDir, slice: SliceId, amount: u64, block_threshold: f64) -> bool {
        let Some(meta) = self.metadata(dir, slice) else {
            return false;
        };
        let quota_bit_rate = self.quota_to_bit_rate(meta.quota);
        let limit = (quota_bit_rate as f64 * block_threshold.clamp(0.0, 1.0)) as u64;
        let limit = limit.min(quota_bit_rate);
        let ok = meta.reserved.saturating_add(amount) <= limit;
        trace!(link = %self.key, %dir, %slice, amount, reserved = meta.reserved, limit, ok, "检查可用比特率");
        ok
    }

    fn check_res(&self, dir: LinkDir, slice: SliceId, delta: i64) -> Result<u64, LedgerError> {
        if !slice.is_real() {
            return Err(LedgerError::ReservedSlice(slice));
        }
        let meta = self.meta(dir, slice)?;
        let next = apply_delta(meta.reserved, delta).ok_or(LedgerError::ReservedUnderflow {
            dir,
            slice,
            current: meta.reserved,
            delta,
        })?;
        let quota_bit_rate = self.quota_to_bit_rate(meta.quota);
        if next > quota_bit_rate {
            return Err(LedgerError::ReservedOverflow {
                dir,
                slice,
                current: meta.reserved,
                delta,
                quota_bit_rate,
            });
        }
        Ok(next)
    }

    fn set_res(&mut self, dir: LinkDir, slice: SliceId, next: u64) {
        let ledger = &mut self.dirs[dir.index()];
        let prev = ledger.get(&slice).map_or(0, |m| m.reserved);
        if let Some(m) = ledger.get_mut(&slice) {
            m.reserved = next;
        }
        if let Some(all) = ledger.get_mut(&SliceId::ALL) {
            all.reserved = all.reserved - prev + next;
        }
    }

    /// 调整已预留比特率。越界时返回错误且不修改任何状态。
    pub fn update_res_bit_rate(&mut self, dir: LinkDir, slice: SliceId, delta: i64) -> Result<(), LedgerError> {
        let next = self.check_res(dir, slice, delta)?;
        self.set_res(dir, slice, next);
        debug!(link = %self.key, %dir, %slice, delta, reserved = next, "更新预留比特率");
        Ok(())
    }

    /// 同时调整两个方向的预留比特率：`dir` 方向 `delta`，反方向 `inv_delta`。
    /// 任一方向越界则两个方向都不修改。
    pub fn update_res_bit_rate_pair(
        &mut self,
        dir: LinkDir,
        slice: SliceId,
        delta: i64,
        inv_delta: i64,
    ) -> Result<(), LedgerError> {
        let next = self.check_res(dir, slice, delta)?;
        let inv_next = self.check_res(dir.inverse(), slice, inv_delta)?;
        self.set_res(dir, slice, next);
        self.set_res(dir.inverse(), slice, inv_next);
        debug!(link = %self.key, %dir, %slice, delta, inv_delta, "更新双向预留比特率");
        Ok(())
    }

    /// 调整额外比特率，仅以 0 为下界（可超过配额）。
    pub fn update_ext_bit_rate(&mut self, dir: LinkDir, slice: SliceId, delta: i64) -> Result<(), LedgerError> {
        if !slice.is_real() {
            return Err(LedgerError::ReservedSlice(slice));
        }
        let meta = self.meta(dir, slice)?;
        let prev = meta.extra;
        let next = apply_delta(prev, delta).ok_or(LedgerError::ExtraUnderflow {
            dir,
            slice,
            current: prev,
            delta,
        })?;
        let ledger = &mut self.dirs[dir.index()];
        if let Some(m) = ledger.get_mut(&slice) {
            m.extra = next;
        }
        if let Some(all) = ledger.get_mut(&SliceId::ALL) {
            all.extra = all.extra - prev + next;
        }
        debug!(link = %self.key, %dir, %slice, delta, extra = next, "更新额外比特率");
        Ok(())
    }

    /// 调整切片配额（百分比），空闲配额做反向调整。
    pub fn update_quota(&mut self, dir: LinkDir, slice: SliceId, delta: i32) -> Result<(), LedgerError> {
        if !slice.is_real() {
            return Err(LedgerError::ReservedSlice(slice));
        }
        let meta = self.meta(dir, slice)?;
        let spare = self.meta(dir, SliceId::SPARE)?.quota;
        let out_of_range = LedgerError::QuotaOutOfRange {
            dir,
            slice,
            current: meta.quota,
            delta,
        };
        let next = i32::from(meta.quota) + delta;
        let spare_next = i32::from(spare) - delta;
        if !(0..=100).contains(&next) || !(0..=100).contains(&spare_next) {
            return Err(out_of_range);
        }
        let next = next as u8;
        if self.quota_to_bit_rate(next) < meta.reserved {
            return Err(LedgerError::QuotaUnderProvisioned {
                dir,
                slice,
                reserved: meta.reserved,
            });
        }

        let ledger = &mut self.dirs[dir.index()];
        if let Some(m) = ledger.get_mut(&slice) {
            m.quota = next;
        }
        if let Some(m) = ledger.get_mut(&SliceId::SPARE) {
            m.quota = spare_next as u8;
        }
        if let Some(all) = ledger.get_mut(&SliceId::ALL) {
            all.quota = (i32::from(all.quota) + delta) as u8;
        }
        debug!(link = %self.key, %dir, %slice, delta, quota = next, "更新切片配额");
        Ok(())
    }

    /// 记录最近一次下发的 meter 速率。调用方负责发送对应的 meter-mod 命令。
    pub fn set_meter_bit_rate(&mut self, dir: LinkDir, slice: SliceId, bit_rate: u64) {
        if let Some(m) = self.dirs[dir.index()].get_mut(&slice) {
            m.meter = bit_rate;
        }
    }

    /// 累计发送字节，供下一次 EWMA 更新使用（同时计入 ALL）。
    pub fn record_tx(&mut self, dir: LinkDir, slice: SliceId, qos: QosType, bytes: u64) {
        let ledger = &mut self.dirs[dir.index()];
        for id in [slice, SliceId::ALL] {
            if let Some(m) = ledger.get_mut(&id) {
                m.tx_bytes[qos.index()] = m.tx_bytes[qos.index()].saturating_add(bytes);
            }
        }
    }

    /// 周期性更新 EWMA 吞吐并清零字节计数。
    pub fn ewma_update(&mut self, interval: SimTime, cfg: &EwmaConfig) {
        let secs = interval.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        for ledger in &mut self.dirs {
            for meta in ledger.values_mut() {
                for qos in QosType::ALL {
                    let q = qos.index();
                    let rate = meta.tx_bytes[q] as f64 * 8.0 / secs;
                    for term in [EwmaTerm::Short, EwmaTerm::Long] {
                        let alpha = cfg.alpha(term);
                        let avg = &mut meta.ewma[q][term.index()];
                        *avg = alpha * rate + (1.0 - alpha) * *avg;
                    }
                    meta.tx_bytes[q] = 0;
                }
            }
        }
        trace!(link = %self.key, "EWMA 已更新");
    }

    /// 某 (方向, 切片) 的可打印快照
    pub fn snapshot(&self, dir: LinkDir, slice: SliceId) -> LinkSnapshot {
        let meta = self.meta_or_default(dir, slice);
        LinkSnapshot {
            link: self.key,
            dir,
            slice,
            quota: meta.quota,
            max: self.max_bit_rate(dir, slice),
            reserved: meta.reserved,
            unreserved: self.unreserved_bit_rate(dir, slice),
            extra: meta.extra,
            meter: meta.meter,
            gbr_short: self.ewma_thp(dir, slice, QosType::Gbr, EwmaTerm::Short),
            gbr_long: self.ewma_thp(dir, slice, QosType::Gbr, EwmaTerm::Long),
            non_gbr_short: self.ewma_thp(dir, slice, QosType::NonGbr, EwmaTerm::Short),
            non_gbr_long: self.ewma_thp(dir, slice, QosType::NonGbr, EwmaTerm::Long),
        }
    }
}
