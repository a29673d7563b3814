//! 切片间空闲带宽共享
//!
//! 定时（默认 20s）对每条链路的每个方向执行一次：根据长期 EWMA 吞吐，
//! 在参与共享的切片之间按优先级授予或回收“额外”比特率，然后重新计算
//! 切片 meter 目标速率，仅当变化超过 meter 步长时才下发。
//! 单次调整只走一遍，不求均衡；收敛依赖多次定时触发。

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::net::{EwmaTerm, LinkDir, LinkInfo, LinkKey, LinkRegistry};
use crate::sim::SimTime;
use crate::slice::{SliceId, SliceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    /// 不安装切片 meter
    None,
    /// 所有共享切片共用一个聚合 meter
    Shared,
    /// 每切片 meter，按固定配额
    Static,
    /// 每切片 meter，额外比特率动态调整
    #[default]
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    pub mode: SharingMode,
    /// 调整周期（毫秒）
    pub timeout_ms: u64,
    /// 保护带宽，避免链路饱和（bps）
    pub guard_bit_rate: u64,
    /// 每次授予/回收的额外比特率（bps）
    pub step: u64,
    /// meter 更新阈值（bps）
    pub meter_step: u64,
    /// 未分配配额是否参与共享
    pub share_spare: bool,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            mode: SharingMode::Dynamic,
            timeout_ms: 20_000,
            guard_bit_rate: 10_000_000,
            step: 4_000_000,
            meter_step: 2_000_000,
            share_spare: true,
        }
    }
}

impl SharingConfig {
    pub fn timeout(&self) -> SimTime {
        SimTime::from_millis(self.timeout_ms)
    }
}

/// 需要下发到某切片 meter 的新速率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterUpdate {
    pub link: LinkKey,
    pub dir: LinkDir,
    pub slice: SliceId,
    pub bit_rate: u64,
}

/// 一次额外比特率变更
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraChange {
    pub link: LinkKey,
    pub dir: LinkDir,
    pub slice: SliceId,
    pub delta: i64,
}

/// 一轮调整的结果
#[derive(Debug, Clone, Default)]
pub struct SharingReport {
    pub extra: Vec<ExtraChange>,
    pub meters: Vec<MeterUpdate>,
}

#[derive(Debug, Clone, Default)]
pub struct SliceSharer {
    cfg: SharingConfig,
}

impl SliceSharer {
    pub fn new(cfg: SharingConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SharingConfig {
        &self.cfg
    }

    pub fn mode(&self) -> SharingMode {
        self.cfg.mode
    }

    /// 对全部链路与方向执行一轮调整。只计算与修改额外比特率；meter 更新由调用方下发。
    pub fn run(&self, links: &mut LinkRegistry, slices: &SliceRegistry) -> SharingReport {
        let mut report = SharingReport::default();
        for link in links.iter_mut() {
            for dir in LinkDir::ALL {
                if self.cfg.mode == SharingMode::Dynamic {
                    report.extra.extend(self.adjust_extra(link, dir, slices));
                }
                report.meters.extend(self.meter_updates(link, dir, slices, false));
            }
        }
        debug!(
            extra_changes = report.extra.len(),
            meter_updates = report.meters.len(),
            "切片共享调整完成"
        );
        report
    }

    fn shift(&self, link: &mut LinkInfo, dir: LinkDir, slice: SliceId, delta: i64, out: &mut Vec<ExtraChange>) -> bool {
        match link.update_ext_bit_rate(dir, slice, delta) {
            Ok(()) => {
                out.push(ExtraChange {
                    link: link.key(),
                    dir,
                    slice,
                    delta,
                });
                true
            }
            Err(e) => {
                warn!(link = %link.key(), %dir, %slice, delta, error = %e, "额外比特率调整失败");
                false
            }
        }
    }

    /// 动态算法：单条链路的单个方向
    pub fn adjust_extra(&self, link: &mut LinkInfo, dir: LinkDir, slices: &SliceRegistry) -> Vec<ExtraChange> {
        let step = self.cfg.step;
        let mut changes = Vec::new();
        if step == 0 {
            return changes;
        }
        let on_link: Vec<SliceId> = link.slices().collect();
        let sharing: Vec<SliceId> = slices
            .sharing_ids()
            .into_iter()
            .filter(|s| on_link.contains(s))
            .collect();
        if sharing.is_empty() {
            return changes;
        }

        let mut max_share: u64 = sharing.iter().map(|&s| link.quota_bit_rate(dir, s)).sum();
        if self.cfg.share_spare {
            max_share += link.quota_bit_rate(dir, SliceId::SPARE);
        }
        let used: u64 = sharing
            .iter()
            .map(|&s| link.thp_bit_rate(dir, s, EwmaTerm::Long))
            .sum();
        let mut idle = max_share as i128 - self.cfg.guard_bit_rate as i128 - used as i128;
        trace!(link = %link.key(), %dir, max_share, used, idle, "共享带宽评估");

        if idle > 0 {
            // 从优先级数值最大的切片开始
            for tier in slices.tiers_descending() {
                for &s in tier.members.iter().filter(|s| sharing.contains(s)) {
                    let s_idle = link.idle_bit_rate(dir, s, EwmaTerm::Long);
                    let extra = link.extra_bit_rate(dir, s);
                    if s_idle < step / 2 {
                        if idle >= step as i128 && self.shift(link, dir, s, step as i64, &mut changes) {
                            idle -= step as i128;
                        }
                    } else if s_idle >= 2 * step
                        && extra >= step
                        && self.shift(link, dir, s, -(step as i64), &mut changes)
                    {
                        idle += step as i128;
                    }
                }
            }
            return changes;
        }

        // 链路超出预算：先清理所有未使用的额外比特率
        for &s in &sharing {
            let unused = link
                .extra_bit_rate(dir, s)
                .min(link.idle_bit_rate(dir, s, EwmaTerm::Long));
            let reclaim = unused / step * step;
            if reclaim > 0 {
                self.shift(link, dir, s, -(reclaim as i64), &mut changes);
            }
        }

        // 仍然不足：从优先级数值最小的层开始逐步回收，同层切片轮流回收
        let mut deficit = (-idle) as u128;
        for tier in slices.tiers_ascending() {
            if deficit == 0 {
                break;
            }
            let members: Vec<SliceId> = tier
                .members
                .iter()
                .copied()
                .filter(|s| sharing.contains(s))
                .collect();
            loop {
                let mut progressed = false;
                for &s in &members {
                    if deficit == 0 {
                        break;
                    }
                    let take = link.extra_bit_rate(dir, s).min(step);
                    if take > 0 && self.shift(link, dir, s, -(take as i64), &mut changes) {
                        deficit = deficit.saturating_sub(take as u128);
                        progressed = true;
                    }
                }
                if !progressed || deficit == 0 {
                    break;
                }
            }
        }
        changes
    }

    /// 每个需要 meter 的切片的目标速率
    pub fn meter_targets(&self, link: &LinkInfo, dir: LinkDir, slices: &SliceRegistry) -> Vec<(SliceId, u64)> {
        let fixed = |s: SliceId| {
            link.quota_bit_rate(dir, s)
                .saturating_sub(link.reserved_bit_rate(dir, s))
        };
        let on_link: Vec<SliceId> = link.slices().collect();
        let mut targets = Vec::new();
        match self.cfg.mode {
            SharingMode::None => {}
            SharingMode::Static => {
                for s in slices.iter().map(|s| s.id).filter(|s| on_link.contains(s)) {
                    targets.push((s, fixed(s)));
                }
            }
            SharingMode::Dynamic => {
                for info in slices.iter().filter(|s| on_link.contains(&s.id)) {
                    let rate = if info.sharing {
                        link.unreserved_bit_rate(dir, info.id)
                    } else {
                        fixed(info.id)
                    };
                    targets.push((info.id, rate));
                }
            }
            SharingMode::Shared => {
                let mut shared = 0u64;
                let mut any_sharing = false;
                for info in slices.iter().filter(|s| on_link.contains(&s.id)) {
                    if info.sharing {
                        shared += fixed(info.id);
                        any_sharing = true;
                    } else {
                        targets.push((info.id, fixed(info.id)));
                    }
                }
                if any_sharing {
                    if self.cfg.share_spare {
                        shared += link.quota_bit_rate(dir, SliceId::SPARE);
                    }
                    targets.push((SliceId::ALL, shared));
                }
            }
        }
        targets
    }

    /// 目标速率与已下发速率之差不小于 meter 步长（或 `force`）时产生更新
    pub fn meter_updates(&self, link: &LinkInfo, dir: LinkDir, slices: &SliceRegistry, force: bool) -> Vec<MeterUpdate> {
        self.meter_targets(link, dir, slices)
            .into_iter()
            .filter(|&(s, target)| force || target.abs_diff(link.meter_bit_rate(dir, s)) >= self.cfg.meter_step)
            .map(|(slice, bit_rate)| MeterUpdate {
                link: link.key(),
                dir,
                slice,
                bit_rate,
            })
            .collect()
    }
}
