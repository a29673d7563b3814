use super::MBPS;
use crate::net::{EwmaConfig, EwmaTerm, LinkDir, LinkInfo, LinkKey, SwitchId};
use crate::sharing::{SharingConfig, SharingMode, SliceSharer};
use crate::sim::SimTime;
use crate::slice::{QosType, SliceId, SliceInfo, SliceRegistry};

const A: SliceId = SliceId(1);
const B: SliceId = SliceId(2);
const FWD: LinkDir = LinkDir::Forward;

/// alpha = 1：EWMA 等于上一周期的速率
fn instant_ewma() -> EwmaConfig {
    EwmaConfig {
        short_alpha: 1.0,
        long_alpha: 1.0,
        timeout_ms: 1_000,
    }
}

fn sharer(mode: SharingMode, guard_mbps: u64) -> SliceSharer {
    SliceSharer::new(SharingConfig {
        mode,
        guard_bit_rate: guard_mbps * MBPS,
        step: 4 * MBPS,
        meter_step: 2 * MBPS,
        ..SharingConfig::default()
    })
}

fn registry(slices: &[(SliceId, i32, bool)]) -> SliceRegistry {
    let mut reg = SliceRegistry::new();
    for &(id, prio, sharing) in slices {
        reg.register(SliceInfo::new(id, format!("s{}", id.0), prio, sharing, 0));
    }
    reg
}

fn link_with(quotas: &[(SliceId, i32)]) -> LinkInfo {
    let mut link = LinkInfo::new(LinkKey::new(SwitchId(0), SwitchId(1)), 1000 * MBPS);
    for &(slice, quota) in quotas {
        link.add_slice(slice).expect("add slice");
        for dir in LinkDir::ALL {
            link.update_quota(dir, slice, quota).expect("quota");
        }
    }
    link
}

/// 在 1s 周期内按 `bps` 发送，并更新 EWMA
fn offer(link: &mut LinkInfo, loads: &[(SliceId, u64)]) {
    for &(slice, bps) in loads {
        link.record_tx(FWD, slice, QosType::NonGbr, bps / 8);
    }
    link.ewma_update(SimTime::from_secs(1), &instant_ewma());
}

#[test]
fn saturated_slice_borrows_until_guard_band() {
    let reg = registry(&[(A, 0, true), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = link_with(&[(A, 50), (B, 50)]);

    let mut last = 0;
    for _ in 0..200 {
        let max_a = link.max_bit_rate(FWD, A);
        offer(&mut link, &[(A, max_a)]);
        sharer.adjust_extra(&mut link, FWD, &reg);
        let extra = link.extra_bit_rate(FWD, A);
        assert!(extra >= last);
        last = extra;
    }
    // 1000 - 10 (保护) - 500 (A 配额) = 490，按 4 Mbps 步长取整
    assert_eq!(link.extra_bit_rate(FWD, A), 488 * MBPS);
    assert_eq!(link.extra_bit_rate(FWD, B), 0);
    assert_eq!(link.extra_bit_rate(LinkDir::Backward, A), 0);

    let max_a = link.max_bit_rate(FWD, A);
    offer(&mut link, &[(A, max_a)]);
    assert!(sharer.adjust_extra(&mut link, FWD, &reg).is_empty());
    assert_eq!(link.extra_bit_rate(FWD, A), 488 * MBPS);
}

#[test]
fn idle_borrower_returns_extra_step_by_step() {
    let reg = registry(&[(A, 0, true), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = link_with(&[(A, 50), (B, 50)]);
    link.update_ext_bit_rate(FWD, A, (40 * MBPS) as i64).expect("extra");

    offer(&mut link, &[(A, 100 * MBPS)]);
    let changes = sharer.adjust_extra(&mut link, FWD, &reg);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].slice, A);
    assert_eq!(changes[0].delta, -(4 * MBPS as i64));
    assert_eq!(link.extra_bit_rate(FWD, A), 36 * MBPS);
}

#[test]
fn over_budget_link_reclaims_the_deficit() {
    let reg = registry(&[(A, 0, true), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = link_with(&[(A, 50), (B, 50)]);
    link.update_ext_bit_rate(FWD, A, (100 * MBPS) as i64).expect("extra");

    // 使用 1010 Mbps，预算 990 Mbps：缺口 20 Mbps
    offer(&mut link, &[(A, 600 * MBPS), (B, 410 * MBPS)]);
    let changes = sharer.adjust_extra(&mut link, FWD, &reg);
    assert_eq!(changes.len(), 5);
    assert!(changes.iter().all(|c| c.slice == A && c.delta == -(4 * MBPS as i64)));
    assert_eq!(link.extra_bit_rate(FWD, A), 80 * MBPS);
}

#[test]
fn unused_extra_is_cleaned_before_the_deficit() {
    let reg = registry(&[(A, 0, true), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = link_with(&[(A, 50), (B, 50)]);
    link.update_ext_bit_rate(FWD, A, (30 * MBPS) as i64).expect("extra");

    // A 空闲 10 Mbps，先清理 8 Mbps；清理量不抵扣 14 Mbps 的缺口
    offer(&mut link, &[(A, 520 * MBPS), (B, 484 * MBPS)]);
    sharer.adjust_extra(&mut link, FWD, &reg);
    assert_eq!(link.extra_bit_rate(FWD, A), 6 * MBPS);
    assert_eq!(link.extra_bit_rate(FWD, B), 0);
}

#[test]
fn largest_priority_value_is_granted_first() {
    let reg = registry(&[(A, 1, true), (B, 5, true)]);
    let sharer = sharer(SharingMode::Dynamic, 96);
    let mut link = link_with(&[(A, 45), (B, 45)]);

    // 可共享 1000 Mbps（含 10% 空闲配额），已用 900，保护 96：恰好剩一个步长
    offer(&mut link, &[(A, 450 * MBPS), (B, 450 * MBPS)]);
    let changes = sharer.adjust_extra(&mut link, FWD, &reg);
    assert_eq!(changes.len(), 1);
    assert_eq!(link.extra_bit_rate(FWD, B), 4 * MBPS);
    assert_eq!(link.extra_bit_rate(FWD, A), 0);
}

#[test]
fn deficit_is_reclaimed_from_smallest_priority_value_first() {
    let reg = registry(&[(A, 1, true), (B, 5, true)]);
    let mut link = link_with(&[(A, 45), (B, 45)]);
    link.update_ext_bit_rate(FWD, A, (8 * MBPS) as i64).expect("extra");
    link.update_ext_bit_rate(FWD, B, (8 * MBPS) as i64).expect("extra");

    // 可共享 1000 Mbps，保护 92，已用 916：缺口 8 Mbps 全部由 A 承担
    offer(&mut link, &[(A, 458 * MBPS), (B, 458 * MBPS)]);
    sharer(SharingMode::Dynamic, 92).adjust_extra(&mut link, FWD, &reg);
    assert_eq!(link.extra_bit_rate(FWD, A), 0);
    assert_eq!(link.extra_bit_rate(FWD, B), 8 * MBPS);

    // 缺口超过数值最小层的全部额外比特率时继续回收下一层
    let mut link = link_with(&[(A, 45), (B, 45)]);
    link.update_ext_bit_rate(FWD, A, (8 * MBPS) as i64).expect("extra");
    link.update_ext_bit_rate(FWD, B, (8 * MBPS) as i64).expect("extra");
    offer(&mut link, &[(A, 458 * MBPS), (B, 458 * MBPS)]);
    sharer(SharingMode::Dynamic, 96).adjust_extra(&mut link, FWD, &reg);
    assert_eq!(link.extra_bit_rate(FWD, A), 0);
    assert_eq!(link.extra_bit_rate(FWD, B), 4 * MBPS);
}

#[test]
fn non_sharing_slices_never_borrow() {
    let reg = registry(&[(A, 0, false), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = link_with(&[(A, 50), (B, 50)]);
    offer(&mut link, &[(A, 500 * MBPS)]);
    sharer.adjust_extra(&mut link, FWD, &reg);
    assert_eq!(link.extra_bit_rate(FWD, A), 0);
}

fn targets_link() -> LinkInfo {
    let mut link = link_with(&[(A, 50), (B, 30)]);
    link.update_res_bit_rate(FWD, A, (100 * MBPS) as i64).expect("reserve");
    link.update_res_bit_rate(FWD, B, (50 * MBPS) as i64).expect("reserve");
    link.update_ext_bit_rate(FWD, A, (40 * MBPS) as i64).expect("extra");
    link
}

#[test]
fn meter_targets_follow_the_sharing_mode() {
    let reg = registry(&[(A, 0, true), (B, 0, false)]);
    let link = targets_link();

    assert!(sharer(SharingMode::None, 10).meter_targets(&link, FWD, &reg).is_empty());
    assert_eq!(
        sharer(SharingMode::Static, 10).meter_targets(&link, FWD, &reg),
        vec![(A, 400 * MBPS), (B, 250 * MBPS)]
    );
    assert_eq!(
        sharer(SharingMode::Dynamic, 10).meter_targets(&link, FWD, &reg),
        vec![(A, 440 * MBPS), (B, 250 * MBPS)]
    );
    // 共享切片与空闲配额合并为一个聚合 meter
    assert_eq!(
        sharer(SharingMode::Shared, 10).meter_targets(&link, FWD, &reg),
        vec![(B, 250 * MBPS), (SliceId::ALL, 600 * MBPS)]
    );
}

#[test]
fn meter_updates_skip_small_changes() {
    let reg = registry(&[(A, 0, true), (B, 0, false)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut link = targets_link();
    link.set_meter_bit_rate(FWD, A, 439 * MBPS);

    let updates = sharer.meter_updates(&link, FWD, &reg, false);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].slice, B);
    assert_eq!(updates[0].bit_rate, 250 * MBPS);
    assert_eq!(sharer.meter_updates(&link, FWD, &reg, true).len(), 2);
}

#[test]
fn run_reports_extra_and_meter_changes() {
    let reg = registry(&[(A, 0, true), (B, 0, true)]);
    let sharer = sharer(SharingMode::Dynamic, 10);
    let mut links = crate::net::LinkRegistry::new();
    let link = links.insert(SwitchId(0), SwitchId(1), 1000 * MBPS);
    for slice in [A, B] {
        link.add_slice(slice).expect("add slice");
        for dir in LinkDir::ALL {
            link.update_quota(dir, slice, 50).expect("quota");
            link.set_meter_bit_rate(dir, slice, 500 * MBPS);
        }
    }
    offer(link, &[(A, 500 * MBPS)]);

    let report = sharer.run(&mut links, &reg);
    assert_eq!(report.extra.len(), 1);
    assert_eq!(report.extra[0].delta, 4 * MBPS as i64);
    assert_eq!(report.meters.len(), 1);
    assert_eq!(report.meters[0].slice, A);
    assert_eq!(report.meters[0].bit_rate, 504 * MBPS);
    assert_eq!(sharer.mode(), SharingMode::Dynamic);
    assert_eq!(link_short(&links), 500 * MBPS);
}

fn link_short(links: &crate::net::LinkRegistry) -> u64 {
    links
        .get(SwitchId(0), SwitchId(1))
        .map_or(0, |l| l.thp_bit_rate(FWD, A, EwmaTerm::Short))
}
