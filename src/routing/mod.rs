//! 路由与准入
//!
//! `RoutingStrategy` 是控制器在构造时选定的可插拔路由策略。具体策略只需提供
//! 最短路径计算、路径展开为逐跳列表以及是否允许回退；带宽/交换机资源检查、
//! 逐链路预留与释放、流规则安装与删除均由 trait 的默认方法按路径逐跳完成。

mod mesh;
mod ring;

pub use mesh::MeshRouting;
pub use ring::{RingRouting, RoutingPolicy};

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use crate::bearer::{Bearer, BlockReasons, Interface, Route};
use crate::broker::{Cookie, FlowMod, OfCommand, SwitchChannel, TableLayout};
use crate::error::{BrokerError, Result};
use crate::net::{LinkDir, LinkKey, LinkRegistry, SwitchId, SwitchRegistry};
use crate::slice::SliceRegistry;

/// 某接口在每个 (链路, 方向) 上需要的保证比特率
pub type LinkDemand = BTreeMap<(LinkKey, LinkDir), u64>;

/// 路由策略可访问的控制器资源
pub struct RouteCtx<'a> {
    pub links: &'a mut LinkRegistry,
    pub switches: &'a mut SwitchRegistry,
    pub slices: &'a SliceRegistry,
    pub layout: TableLayout,
    pub channel: &'a mut dyn SwitchChannel,
    pub block_threshold: f64,
}

/// 已安装规则所对应的路径，用于切换时删除旧规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPath {
    pub route: Route,
    pub src: SwitchId,
    pub dst: SwitchId,
    pub priority: u16,
}

impl InstalledPath {
    pub fn of(bearer: &Bearer, iface: Interface) -> Self {
        let (src, dst) = bearer.downlink_ends(iface);
        Self {
            route: bearer.paths.route(iface).clone(),
            src,
            dst,
            priority: bearer.priority,
        }
    }
}

/// 规则安装位置：(交换机, 下一跳, 是否下行)
type RuleSite = (SwitchId, SwitchId, bool);

fn switch_addr(sw: SwitchId) -> String {
    format!("10.1.{}.{}", (sw.0 >> 8) & 0xFF, (sw.0 & 0xFF) + 1)
}

pub trait RoutingStrategy: Send {
    fn name(&self) -> &'static str;

    /// 计算 src → dst 的最短路由。`key` 用于等价路径之间的稳定选择。
    fn find_path(&self, switches: &SwitchRegistry, src: SwitchId, dst: SwitchId, key: u64) -> Option<Route>;

    /// 将路由展开为下行方向的逐跳列表 (发送端, 接收端)
    fn path_hops(&self, route: &Route, src: SwitchId, dst: SwitchId) -> Vec<(SwitchId, SwitchId)>;

    /// 最短路径资源不足时是否允许尝试反向路径
    fn allows_fallback(&self) -> bool;

    /// 拓扑变化通知（新增链路后调用）
    fn topology_changed(&mut self, _switches: &SwitchRegistry) {}

    /// 路由经过的交换机（含首尾）
    fn path_switches(&self, route: &Route, src: SwitchId, dst: SwitchId) -> Vec<SwitchId> {
        let hops = self.path_hops(route, src, dst);
        if hops.is_empty() {
            return vec![src];
        }
        let mut out: Vec<SwitchId> = hops.iter().map(|(a, _)| *a).collect();
        out.extend(hops.last().map(|(_, b)| *b));
        out
    }

    /// 接口当前路由上每个 (链路, 方向) 的需求：下行 GBR 沿下行方向，上行 GBR 沿反方向。
    fn link_demand(&self, bearer: &Bearer, iface: Interface) -> LinkDemand {
        let (src, dst) = bearer.downlink_ends(iface);
        let mut demand = LinkDemand::new();
        for (a, b) in self.path_hops(bearer.paths.route(iface), src, dst) {
            let key = LinkKey::new(a, b);
            let dir = key.direction_from(a);
            *demand.entry((key, dir)).or_default() += bearer.gbr_dl();
            *demand.entry((key, dir.inverse())).or_default() += bearer.gbr_ul();
        }
        demand
    }

    /// 带宽检查。与 `prior`（同一承载已评估接口）共享的链路，两个方向都按两者之和检查。
    fn request_bit_rate(&self, links: &LinkRegistry, bearer: &Bearer, iface: Interface, prior: &LinkDemand, block_threshold: f64) -> bool {
        if !bearer.is_gbr() {
            return true;
        }
        let mut demand = self.link_demand(bearer, iface);
        let shared: BTreeSet<LinkKey> = demand
            .keys()
            .map(|(k, _)| *k)
            .filter(|k| prior.keys().any(|(pk, _)| pk == k))
            .collect();
        for key in &shared {
            for dir in LinkDir::ALL {
                let extra = prior.get(&(*key, dir)).copied().unwrap_or(0);
                *demand.entry((*key, dir)).or_default() += extra;
            }
        }
        demand.iter().all(|((key, dir), amount)| {
            let ok = links
                .by_key(*key)
                .is_some_and(|l| l.has_bit_rate(*dir, bearer.slice, *amount, block_threshold));
            if !ok {
                debug!(teid = bearer.teid, %iface, link = %key, %dir, amount, shared = shared.contains(key), "链路带宽不足");
            }
            ok
        })
    }

    /// 交换机 CPU 与流表检查，返回失败原因
    fn has_switch_resources(&self, ctx: &RouteCtx<'_>, bearer: &Bearer, iface: Interface) -> BlockReasons {
        let (src, dst) = bearer.downlink_ends(iface);
        let route = bearer.paths.route(iface);
        let table = ctx
            .slices
            .position(bearer.slice)
            .map(|p| ctx.layout.slice_table(p));
        let mut reasons = BlockReasons::NONE;
        for sw in self.path_switches(route, src, dst) {
            let Some(info) = ctx.switches.get(sw) else {
                reasons.insert(BlockReasons::TABLE);
                continue;
            };
            if !info.has_cpu(ctx.block_threshold) {
                trace!(teid = bearer.teid, switch = %sw, cpu = info.cpu_usage(), "交换机 CPU 过载");
                reasons.insert(BlockReasons::CPU);
            }
            if !route.is_local() && !table.is_some_and(|t| info.has_table(t, ctx.block_threshold)) {
                trace!(teid = bearer.teid, switch = %sw, "流表已满");
                reasons.insert(BlockReasons::TABLE);
            }
        }
        reasons
    }

    /// 在接口当前路由上检查全部资源
    fn check_path(&self, ctx: &RouteCtx<'_>, bearer: &Bearer, iface: Interface, prior: &LinkDemand) -> BlockReasons {
        let mut reasons = self.has_switch_resources(ctx, bearer, iface);
        if !self.request_bit_rate(ctx.links, bearer, iface, prior, ctx.block_threshold) {
            reasons.insert(BlockReasons::BANDWIDTH);
        }
        reasons
    }

    /// 准入：先检查最短路径，失败且允许回退时反转路径再检查一次。
    /// 两次都失败时恢复最短路径，并把失败原因记录到承载上。
    fn has_available_resources(&self, ctx: &RouteCtx<'_>, bearer: &mut Bearer, iface: Interface, prior: &LinkDemand) -> bool {
        let first = self.check_path(ctx, bearer, iface, prior);
        if first.is_empty() {
            return true;
        }
        let mut reasons = first;
        let route = bearer.paths.route(iface).clone();
        if self.allows_fallback() && route.inverse() != route {
            bearer.paths.get_mut(iface).invert();
            let retry = self.check_path(ctx, bearer, iface, prior);
            if retry.is_empty() {
                debug!(teid = bearer.teid, %iface, route = %bearer.paths.route(iface), "最短路径资源不足，改用反向路径");
                return true;
            }
            reasons.insert(retry);
            bearer.paths.get_mut(iface).invert();
        }
        debug!(teid = bearer.teid, %iface, %reasons, "接口资源不足");
        bearer.block_reasons.insert(reasons);
        false
    }

    /// 沿路径逐链路调整预留比特率；中途失败时回滚已修改的链路。
    fn walk_reservation(&self, links: &mut LinkRegistry, bearer: &Bearer, iface: Interface, sign: i64) -> Result<Vec<LinkKey>> {
        let (src, dst) = bearer.downlink_ends(iface);
        let dl = sign * bearer.gbr_dl() as i64;
        let ul = sign * bearer.gbr_ul() as i64;
        let mut done: Vec<(LinkKey, LinkDir)> = Vec::new();
        for (a, b) in self.path_hops(bearer.paths.route(iface), src, dst) {
            let key = LinkKey::new(a, b);
            let dir = key.direction_from(a);
            let result = match links.by_key_mut(key) {
                Some(link) => link
                    .update_res_bit_rate_pair(dir, bearer.slice, dl, ul)
                    .map_err(|source| BrokerError::Ledger { link: key, source }),
                None => Err(BrokerError::UnknownLink(a, b)),
            };
            if let Err(e) = result {
                warn!(teid = bearer.teid, %iface, error = %e, "预留变更失败，回滚");
                for (k, d) in done {
                    if let Some(link) = links.by_key_mut(k) {
                        let _ = link.update_res_bit_rate_pair(d, bearer.slice, -dl, -ul);
                    }
                }
                return Err(e);
            }
            done.push((key, dir));
        }
        Ok(done.into_iter().map(|(k, _)| k).collect())
    }

    /// 为接口预留保证比特率，返回涉及的链路
    fn reserve_bit_rate(&self, links: &mut LinkRegistry, bearer: &mut Bearer, iface: Interface) -> Result<Vec<LinkKey>> {
        if !bearer.is_gbr() || bearer.paths.is_reserved(iface) {
            return Ok(Vec::new());
        }
        let touched = self.walk_reservation(links, bearer, iface, 1)?;
        bearer.paths.get_mut(iface).reserved = true;
        debug!(teid = bearer.teid, %iface, links = touched.len(), "已预留比特率");
        Ok(touched)
    }

    /// 释放接口的保证比特率，返回涉及的链路
    fn release_bit_rate(&self, links: &mut LinkRegistry, bearer: &mut Bearer, iface: Interface) -> Result<Vec<LinkKey>> {
        if !bearer.paths.is_reserved(iface) {
            return Ok(Vec::new());
        }
        let touched = self.walk_reservation(links, bearer, iface, -1)?;
        bearer.paths.reset(iface);
        debug!(teid = bearer.teid, %iface, links = touched.len(), "已释放比特率");
        Ok(touched)
    }

    /// 路径上需要安装路由规则的位置
    fn rule_sites(&self, path: &InstalledPath, bearer: &Bearer) -> Vec<RuleSite> {
        let mut sites = Vec::new();
        for (a, b) in self.path_hops(&path.route, path.src, path.dst) {
            if bearer.has_dl {
                sites.push((a, b, true));
            }
            if bearer.has_ul {
                sites.push((b, a, false));
            }
        }
        sites
    }

    /// 安装接口当前路由上的转发规则
    fn install_rules(&self, ctx: &mut RouteCtx<'_>, bearer: &Bearer, iface: Interface) -> Result<()> {
        let path = InstalledPath::of(bearer, iface);
        let table = ctx
            .slices
            .position(bearer.slice)
            .map(|p| ctx.layout.slice_table(p))
            .ok_or(BrokerError::UnknownSlice(bearer.slice))?;
        let cookie = Cookie::routing(iface, path.priority, bearer.teid);
        let bw_table = ctx.layout.bandwidth();
        for (sw, next, downlink) in self.rule_sites(&path, bearer) {
            let info = ctx.switches.get_mut(sw).ok_or(BrokerError::UnknownSwitch(sw))?;
            let port = info.port_to(next).ok_or(BrokerError::UnknownLink(sw, next))?;
            let dst_addr = if downlink { switch_addr(path.dst) } else { switch_addr(path.src) };
            let matches = format!(
                "eth_type=0x800,ip_proto=17,udp_dst=2152,ip_dst={},gtpu_teid={:#x}",
                dst_addr, bearer.teid
            );
            let instructions = format!("write:output={port} goto:{bw_table}");
            info.rule_added(table);
            ctx.channel.send(
                sw,
                OfCommand::Flow(FlowMod::add(table, path.priority, cookie, matches, instructions)),
            );
        }
        trace!(teid = bearer.teid, %iface, route = %path.route, "路由规则已安装");
        Ok(())
    }

    /// 删除按 `path` 安装过的规则（每台交换机按 cookie 一次删除）
    fn remove_path_rules(&self, ctx: &mut RouteCtx<'_>, bearer: &Bearer, iface: Interface, path: &InstalledPath) -> Result<()> {
        let table = ctx
            .slices
            .position(bearer.slice)
            .map(|p| ctx.layout.slice_table(p))
            .ok_or(BrokerError::UnknownSlice(bearer.slice))?;
        let cookie = Cookie::routing(iface, path.priority, bearer.teid);
        let mut per_switch: BTreeMap<SwitchId, u32> = BTreeMap::new();
        for (sw, _, _) in self.rule_sites(path, bearer) {
            *per_switch.entry(sw).or_default() += 1;
        }
        for (sw, count) in per_switch {
            if let Some(info) = ctx.switches.get_mut(sw) {
                for _ in 0..count {
                    info.rule_removed(table);
                }
            }
            ctx.channel.send(sw, OfCommand::Flow(FlowMod::del(table, cookie)));
        }
        Ok(())
    }

    /// 删除接口当前路由上的规则
    fn remove_rules(&self, ctx: &mut RouteCtx<'_>, bearer: &Bearer, iface: Interface) -> Result<()> {
        let path = InstalledPath::of(bearer, iface);
        self.remove_path_rules(ctx, bearer, iface, &path)
    }

    /// 先按新路由与新优先级安装，再删除旧规则
    fn update_rules(&self, ctx: &mut RouteCtx<'_>, bearer: &Bearer, iface: Interface, old: &InstalledPath) -> Result<()> {
        self.install_rules(ctx, bearer, iface)?;
        self.remove_path_rules(ctx, bearer, iface, old)
    }
}
