//! 传输控制器
//!
//! 编排承载的 准入 → 预留 → 安装 → 删除 生命周期，持有链路/交换机/切片/承载
//! 注册表、可插拔的路由策略、共享算法以及交换机编程通道。

use tracing::{debug, info, trace, warn};

use super::channel::SwitchChannel;
use super::config::BrokerConfig;
use super::events::{BrokerEvent, BrokerObserver, BrokerStats};
use super::tables::{Cookie, FlowMod, MeterMod, ModCmd, OfCommand, TableLayout, mbr_meter_id, slice_meter_id};
use crate::bearer::{Bearer, BearerRegistry, Interface, Route};
use crate::error::{BrokerError, Result};
use crate::net::{LinkDir, LinkKey, LinkRegistry, LinkSnapshot, SwitchId, SwitchInfo, SwitchRegistry};
use crate::routing::{InstalledPath, LinkDemand, RouteCtx, RoutingStrategy};
use crate::sharing::{MeterUpdate, SharingMode, SliceSharer};
use crate::sim::SimTime;
use crate::slice::{SliceId, SliceInfo, SliceRegistry};

/// TEID 中编码切片的位段
const TEID_SLICE_SHIFT: u32 = 24;
const TEID_SLICE_MASK: u32 = 0x3F00_0000;

pub struct TransportBroker {
    cfg: BrokerConfig,
    layout: TableLayout,
    links: LinkRegistry,
    switches: SwitchRegistry,
    slices: SliceRegistry,
    bearers: BearerRegistry,
    routing: Box<dyn RoutingStrategy>,
    sharer: SliceSharer,
    channel: Box<dyn SwitchChannel>,
    observers: Vec<BrokerObserver>,
    stats: BrokerStats,
    next_seq: u32,
}

impl TransportBroker {
    pub fn new(
        cfg: BrokerConfig,
        slices: Vec<SliceInfo>,
        routing: Box<dyn RoutingStrategy>,
        channel: Box<dyn SwitchChannel>,
    ) -> Self {
        let mut registry = SliceRegistry::new();
        for s in slices {
            registry.register(s);
        }
        let layout = TableLayout::new(registry.len());
        let sharer = SliceSharer::new(cfg.sharing.clone());
        info!(
            slices = registry.len(),
            routing = routing.name(),
            sharing = ?sharer.mode(),
            "创建传输控制器"
        );
        Self {
            cfg,
            layout,
            links: LinkRegistry::new(),
            switches: SwitchRegistry::new(),
            slices: registry,
            bearers: BearerRegistry::new(),
            routing,
            sharer,
            channel,
            observers: Vec::new(),
            stats: BrokerStats::default(),
            next_seq: 1,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.cfg
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut LinkRegistry {
        &mut self.links
    }

    pub fn switches(&self) -> &SwitchRegistry {
        &self.switches
    }

    pub fn switch_mut(&mut self, id: SwitchId) -> Option<&mut SwitchInfo> {
        self.switches.get_mut(id)
    }

    pub fn slices(&self) -> &SliceRegistry {
        &self.slices
    }

    pub fn bearer(&self, teid: u32) -> Option<&Bearer> {
        self.bearers.get(teid)
    }

    pub fn bearers(&self) -> &BearerRegistry {
        &self.bearers
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    pub fn routing_name(&self) -> &'static str {
        self.routing.name()
    }

    /// 订阅控制器事件
    pub fn subscribe(&mut self, observer: BrokerObserver) {
        self.observers.push(observer);
    }

    fn emit(&mut self, ev: BrokerEvent) {
        trace!(event = ?ev, "控制器事件");
        for obs in &mut self.observers {
            obs(&ev);
        }
    }

    /// 同时借出路由策略与其上下文（字段级拆分借用）
    fn split(&mut self) -> (&dyn RoutingStrategy, RouteCtx<'_>) {
        (
            self.routing.as_ref(),
            RouteCtx {
                links: &mut self.links,
                switches: &mut self.switches,
                slices: &self.slices,
                layout: self.layout,
                channel: self.channel.as_mut(),
                block_threshold: self.cfg.block_threshold,
            },
        )
    }

    // ---------------------------------------------------------------------
    // 拓扑
    // ---------------------------------------------------------------------

    /// 添加一台传输交换机
    pub fn add_switch(&mut self) -> SwitchId {
        let id = self.switches.add(self.layout.num_tables(), self.cfg.table_size);
        debug!(switch = %id, "添加交换机");
        id
    }

    /// 连接两台交换机并建立链路账本，按切片配额划分容量。
    pub fn connect(&mut self, a: SwitchId, b: SwitchId, capacity: u64) -> Result<LinkKey> {
        for sw in [a, b] {
            if self.switches.get(sw).is_none() {
                return Err(BrokerError::UnknownSwitch(sw));
            }
        }
        self.switches
            .connect(a, b)
            .ok_or(BrokerError::UnknownLink(a, b))?;
        let quotas: Vec<(SliceId, u8)> = self.slices.iter().map(|s| (s.id, s.quota)).collect();
        let link = self.links.insert(a, b, capacity);
        let key = link.key();
        for (slice, quota) in quotas {
            link.add_slice(slice)
                .map_err(|source| BrokerError::Ledger { link: key, source })?;
            if link.quota(LinkDir::Forward, slice) == quota {
                continue;
            }
            for dir in LinkDir::ALL {
                link.update_quota(dir, slice, i32::from(quota))
                    .map_err(|source| BrokerError::Ledger { link: key, source })?;
            }
        }
        self.routing.topology_changed(&self.switches);
        info!(link = %key, capacity, "链路已建立");
        Ok(key)
    }

    /// 在所有链路、两个方向上调整某切片的配额；任一失败则全部回滚。
    pub fn update_slice_quota(&mut self, slice: SliceId, delta: i32) -> Result<()> {
        if !self.slices.contains(slice) {
            return Err(BrokerError::UnknownSlice(slice));
        }
        let mut done: Vec<(LinkKey, LinkDir)> = Vec::new();
        for key in self.links.keys() {
            for dir in LinkDir::ALL {
                let Some(link) = self.links.by_key_mut(key) else {
                    continue;
                };
                if let Err(source) = link.update_quota(dir, slice, delta) {
                    for (k, d) in done {
                        if let Some(l) = self.links.by_key_mut(k) {
                            let _ = l.update_quota(d, slice, -delta);
                        }
                    }
                    return Err(BrokerError::Ledger { link: key, source });
                }
                done.push((key, dir));
            }
        }
        for key in self.links.keys() {
            self.slice_meter_adjust(key, slice);
        }
        info!(%slice, delta, "切片配额已更新");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 流水线与 meter
    // ---------------------------------------------------------------------

    /// TEID 编码切片位置，分类表据此把流量送入切片路由表。
    pub fn allocate_teid(&mut self, slice: SliceId) -> Result<u32> {
        let pos = self
            .slices
            .position(slice)
            .ok_or(BrokerError::UnknownSlice(slice))?;
        loop {
            let seq = self.next_seq & 0x00FF_FFFF;
            self.next_seq = self.next_seq.wrapping_add(1);
            let teid = ((pos as u32 + 1) << TEID_SLICE_SHIFT) | seq;
            if seq != 0 && self.bearers.get(teid).is_none() {
                return Ok(teid);
            }
        }
    }

    /// 安装流水线默认规则并下发所有切片 meter。
    pub fn start(&mut self) {
        let switch_ids: Vec<SwitchId> = self.switches.iter().map(|s| s.id()).collect();
        let slice_tables: Vec<(usize, u8)> = self
            .slices
            .iter()
            .enumerate()
            .map(|(pos, _)| (pos, self.layout.slice_table(pos)))
            .collect();
        let layout = self.layout;
        let none = Cookie::bearer(0, 0);
        for sw in switch_ids {
            let mut mods = vec![
                FlowMod::add(TableLayout::INPUT, 0, none, String::new(), format!("goto:{}", TableLayout::CLASSIFY)),
                FlowMod::add(layout.bandwidth(), 0, none, String::new(), format!("goto:{}", layout.output())),
                FlowMod::add(layout.output(), 0, none, String::new(), "apply:output=meta".to_string()),
            ];
            for (pos, table) in &slice_tables {
                let pattern = ((*pos as u32) + 1) << TEID_SLICE_SHIFT;
                mods.push(FlowMod::add(
                    TableLayout::CLASSIFY,
                    64,
                    none,
                    format!("eth_type=0x800,ip_proto=17,udp_dst=2152,gtpu_teid={pattern:#x}/{TEID_SLICE_MASK:#x}"),
                    format!("goto:{table}"),
                ));
            }
            for m in mods {
                if let Some(info) = self.switches.get_mut(sw) {
                    info.rule_added(m.table);
                }
                self.channel.send(sw, OfCommand::Flow(m));
            }
        }
        self.install_slice_meters();
        info!(switches = self.switches.len(), links = self.links.len(), "控制器已启动");
    }

    /// 为每条链路、每个方向安装切片 meter 及对应的带宽表规则
    pub fn install_slice_meters(&mut self) {
        let mut updates = Vec::new();
        for link in self.links.iter() {
            for dir in LinkDir::ALL {
                updates.extend(self.sharer.meter_updates(link, dir, &self.slices, true));
            }
        }
        for u in updates {
            if let Some((sw, port)) = self.meter_site(u.link, u.dir) {
                let meter = slice_meter_id(u.slice, port);
                let pattern = match self.slices.position(u.slice) {
                    Some(pos) => format!(
                        "gtpu_teid={:#x}/{:#x},",
                        ((pos as u32) + 1) << TEID_SLICE_SHIFT,
                        TEID_SLICE_MASK
                    ),
                    None => String::new(),
                };
                // 聚合 meter 优先级低于各独立切片的规则
                let priority = if u.slice == SliceId::ALL { 16 } else { 32 };
                let rule = FlowMod::add(
                    self.layout.bandwidth(),
                    priority,
                    Cookie::bearer(0, 0),
                    format!("{pattern}meta={port}"),
                    format!("meter:{meter:#x} goto:{}", self.layout.output()),
                );
                if let Some(info) = self.switches.get_mut(sw) {
                    info.rule_added(rule.table);
                }
                self.channel.send(sw, OfCommand::Flow(rule));
            }
            self.apply_meter(u, ModCmd::Add);
        }
    }

    /// 某链路方向上执行限速的交换机及其出端口
    fn meter_site(&self, key: LinkKey, dir: LinkDir) -> Option<(SwitchId, u32)> {
        let src = key.source(dir);
        let port = self.switches.get(src)?.port_to(key.target(dir))?;
        Some((src, port))
    }

    fn apply_meter(&mut self, u: MeterUpdate, cmd: ModCmd) {
        let Some(link) = self.links.by_key_mut(u.link) else {
            return;
        };
        link.set_meter_bit_rate(u.dir, u.slice, u.bit_rate);
        if let Some((sw, port)) = self.meter_site(u.link, u.dir) {
            let meter = MeterMod {
                cmd,
                meter: slice_meter_id(u.slice, port),
                bit_rate: u.bit_rate,
            };
            self.channel.send(sw, OfCommand::Meter(meter));
        }
        self.stats.meter_mods += 1;
        debug!(link = %u.link, dir = %u.dir, slice = %u.slice, bit_rate = u.bit_rate, "切片 meter 已调整");
        self.emit(BrokerEvent::MeterAdjusted {
            link: u.link,
            dir: u.dir,
            slice: u.slice,
            bit_rate: u.bit_rate,
        });
    }

    /// 预留变化后重新计算链路上该切片的 meter；变化小于 meter 步长时不下发。
    pub fn slice_meter_adjust(&mut self, key: LinkKey, slice: SliceId) {
        let target = if self.sharer.mode() == SharingMode::Shared
            && self.slices.get(slice).is_some_and(|s| s.sharing)
        {
            SliceId::ALL
        } else {
            slice
        };
        let Some(link) = self.links.by_key(key) else {
            return;
        };
        let updates: Vec<MeterUpdate> = LinkDir::ALL
            .iter()
            .flat_map(|&dir| self.sharer.meter_updates(link, dir, &self.slices, false))
            .filter(|u| u.slice == target)
            .collect();
        for u in updates {
            self.apply_meter(u, ModCmd::Mod);
        }
    }

    /// 周期性 EWMA 更新
    pub fn ewma_update(&mut self, interval: SimTime) {
        self.links.ewma_update(interval, &self.cfg.ewma);
    }

    /// 一轮切片间额外带宽调整
    pub fn run_sharing(&mut self) {
        if self.sharer.mode() == SharingMode::None {
            return;
        }
        let report = self.sharer.run(&mut self.links, &self.slices);
        for c in report.extra {
            self.emit(BrokerEvent::ExtraAdjusted {
                link: c.link,
                dir: c.dir,
                slice: c.slice,
                delta: c.delta,
            });
        }
        for u in report.meters {
            self.apply_meter(u, ModCmd::Mod);
        }
    }

    // ---------------------------------------------------------------------
    // 承载生命周期
    // ---------------------------------------------------------------------

    fn take_bearer(&mut self, teid: u32) -> Result<Bearer> {
        self.bearers.remove(teid).ok_or(BrokerError::UnknownBearer(teid))
    }

    fn put_bearer(&mut self, bearer: Bearer) {
        self.bearers.insert(bearer);
    }

    fn reset_shortest(&self, bearer: &mut Bearer, iface: Interface) -> Result<()> {
        let (src, dst) = bearer.downlink_ends(iface);
        let route = self
            .routing
            .find_path(&self.switches, src, dst, u64::from(bearer.teid))
            .ok_or(BrokerError::Unroutable {
                teid: bearer.teid,
                iface,
            })?;
        bearer.paths.set_shortest(iface, route);
        Ok(())
    }

    /// 承载上下文创建：登记承载并为每个接口计算最短路径。
    #[tracing::instrument(skip(self, bearer), fields(teid = bearer.teid, slice = %bearer.slice))]
    pub fn notify_bearer_created(&mut self, mut bearer: Bearer) -> Result<()> {
        if !self.slices.contains(bearer.slice) {
            return Err(BrokerError::UnknownSlice(bearer.slice));
        }
        if self.bearers.get(bearer.teid).is_some() {
            return Err(BrokerError::DuplicateBearer(bearer.teid));
        }
        for iface in Interface::ALL {
            self.reset_shortest(&mut bearer, iface)?;
        }
        debug!(
            access = %bearer.paths.route(Interface::Access),
            core = %bearer.paths.route(Interface::Core),
            "承载已登记"
        );
        self.put_bearer(bearer);
        Ok(())
    }

    /// 准入检查：按接入段、核心段顺序评估，重叠链路按两段之和检查。
    #[tracing::instrument(skip(self))]
    pub fn bearer_request(&mut self, teid: u32) -> Result<bool> {
        let mut bearer = self.take_bearer(teid)?;
        if Interface::ALL.iter().all(|&i| bearer.paths.is_reserved(i)) && bearer.is_gbr() {
            self.put_bearer(bearer);
            return Ok(true);
        }
        bearer.block_reasons.clear();
        for iface in Interface::ALL {
            if !bearer.paths.is_reserved(iface) {
                if let Err(e) = self.reset_shortest(&mut bearer, iface) {
                    self.put_bearer(bearer);
                    return Err(e);
                }
            }
        }

        let (routing, ctx) = self.split();
        let mut prior = LinkDemand::new();
        let mut accepted = true;
        for iface in Interface::ALL {
            if bearer.paths.is_reserved(iface) {
                continue;
            }
            if !routing.has_available_resources(&ctx, &mut bearer, iface, &prior) {
                accepted = false;
            }
            for (k, v) in routing.link_demand(&bearer, iface) {
                *prior.entry(k).or_default() += v;
            }
        }

        let reasons = bearer.block_reasons;
        self.stats.record_request(accepted, reasons);
        let ev = BrokerEvent::BearerRequested {
            teid,
            slice: bearer.slice,
            accepted,
            reasons,
            access: bearer.paths.route(Interface::Access).clone(),
            core: bearer.paths.route(Interface::Core).clone(),
        };
        if accepted {
            info!(
                access = %bearer.paths.route(Interface::Access),
                core = %bearer.paths.route(Interface::Core),
                "承载准入成功"
            );
        } else {
            info!(%reasons, "承载被阻塞");
        }
        self.put_bearer(bearer);
        self.emit(ev);
        Ok(accepted)
    }

    /// 为已准入的承载预留保证比特率
    #[tracing::instrument(skip(self))]
    pub fn bearer_reserve(&mut self, teid: u32) -> Result<bool> {
        let mut bearer = self.take_bearer(teid)?;
        if bearer.is_blocked() {
            self.put_bearer(bearer);
            return Ok(false);
        }
        let (routing, mut ctx) = self.split();
        let mut touched: Vec<LinkKey> = Vec::new();
        for iface in Interface::ALL {
            match routing.reserve_bit_rate(ctx.links, &mut bearer, iface) {
                Ok(keys) => touched.extend(keys),
                Err(e) => {
                    for prev in Interface::ALL {
                        if let Ok(keys) = routing.release_bit_rate(ctx.links, &mut bearer, prev) {
                            touched.extend(keys);
                        }
                    }
                    let slice = bearer.slice;
                    self.put_bearer(bearer);
                    self.adjust_touched(&touched, slice);
                    return Err(e);
                }
            }
        }
        let slice = bearer.slice;
        self.put_bearer(bearer);
        self.adjust_touched(&touched, slice);
        Ok(true)
    }

    /// 释放承载的保证比特率（不删除规则）
    #[tracing::instrument(skip(self))]
    pub fn bearer_release(&mut self, teid: u32) -> Result<bool> {
        let mut bearer = self.take_bearer(teid)?;
        let result = self.release_all(&mut bearer);
        let slice = bearer.slice;
        self.put_bearer(bearer);
        let touched = result?;
        self.adjust_touched(&touched, slice);
        Ok(true)
    }

    fn release_all(&mut self, bearer: &mut Bearer) -> Result<Vec<LinkKey>> {
        let (routing, mut ctx) = self.split();
        let mut touched = Vec::new();
        for iface in Interface::ALL {
            touched.extend(routing.release_bit_rate(ctx.links, bearer, iface)?);
        }
        Ok(touched)
    }

    fn adjust_touched(&mut self, touched: &[LinkKey], slice: SliceId) {
        let mut keys = touched.to_vec();
        keys.sort();
        keys.dedup();
        for key in keys {
            self.slice_meter_adjust(key, slice);
        }
    }

    /// 安装承载的转发规则与 MBR meter
    #[tracing::instrument(skip(self))]
    pub fn bearer_install(&mut self, teid: u32) -> Result<bool> {
        let mut bearer = self.take_bearer(teid)?;
        if bearer.is_blocked() {
            self.put_bearer(bearer);
            return Ok(false);
        }
        let result = self.install_all(&mut bearer);
        self.put_bearer(bearer);
        result?;
        self.emit(BrokerEvent::BearerInstalled { teid });
        Ok(true)
    }

    fn install_all(&mut self, bearer: &mut Bearer) -> Result<()> {
        let (routing, mut ctx) = self.split();
        for iface in Interface::ALL {
            routing.install_rules(&mut ctx, bearer, iface)?;
        }
        self.install_mbr(bearer);
        bearer.installed = true;
        bearer.active = true;
        debug!(teid = bearer.teid, priority = bearer.priority, "承载规则已安装");
        Ok(())
    }

    /// MBR 限速：下行在 PGW 侧交换机，上行在 eNB 侧交换机
    fn mbr_sites(bearer: &Bearer) -> Vec<(SwitchId, bool, u64)> {
        let mut sites = Vec::new();
        if bearer.has_dl && bearer.qos.mbr_dl > 0 {
            sites.push((bearer.endpoints.pgw, false, bearer.qos.mbr_dl));
        }
        if bearer.has_ul && bearer.qos.mbr_ul > 0 {
            sites.push((bearer.endpoints.enb, true, bearer.qos.mbr_ul));
        }
        sites
    }

    fn install_mbr(&mut self, bearer: &mut Bearer) {
        if !bearer.has_mbr() {
            return;
        }
        let table = self.layout.bandwidth();
        let cookie = Cookie::bearer(bearer.priority, bearer.teid);
        for (sw, uplink, rate) in Self::mbr_sites(bearer) {
            let meter = mbr_meter_id(bearer.teid, uplink);
            self.channel.send(
                sw,
                OfCommand::Meter(MeterMod {
                    cmd: ModCmd::Add,
                    meter,
                    bit_rate: rate,
                }),
            );
            let rule = FlowMod::add(
                table,
                bearer.priority.saturating_add(64),
                cookie,
                format!("eth_type=0x800,ip_proto=17,udp_dst=2152,gtpu_teid={:#x}", bearer.teid),
                format!("meter:{meter:#x} goto:{}", self.layout.output()),
            );
            if let Some(info) = self.switches.get_mut(sw) {
                info.rule_added(table);
            }
            self.channel.send(sw, OfCommand::Flow(rule));
        }
        bearer.mbr_installed = true;
    }

    fn remove_mbr(&mut self, bearer: &mut Bearer) {
        if !bearer.mbr_installed {
            return;
        }
        let table = self.layout.bandwidth();
        let cookie = Cookie::bearer(bearer.priority, bearer.teid);
        for (sw, uplink, _) in Self::mbr_sites(bearer) {
            if let Some(info) = self.switches.get_mut(sw) {
                info.rule_removed(table);
            }
            self.channel.send(sw, OfCommand::Flow(FlowMod::del(table, cookie)));
            self.channel.send(
                sw,
                OfCommand::Meter(MeterMod {
                    cmd: ModCmd::Del,
                    meter: mbr_meter_id(bearer.teid, uplink),
                    bit_rate: 0,
                }),
            );
        }
        bearer.mbr_installed = false;
    }

    /// 删除承载规则并释放资源
    #[tracing::instrument(skip(self))]
    pub fn bearer_remove(&mut self, teid: u32) -> Result<bool> {
        let mut bearer = self.take_bearer(teid)?;
        let result = self.remove_all(&mut bearer);
        let slice = bearer.slice;
        self.put_bearer(bearer);
        let touched = result?;
        self.adjust_touched(&touched, slice);
        self.emit(BrokerEvent::BearerRemoved { teid });
        Ok(true)
    }

    fn remove_all(&mut self, bearer: &mut Bearer) -> Result<Vec<LinkKey>> {
        if bearer.installed {
            let (routing, mut ctx) = self.split();
            for iface in Interface::ALL {
                routing.remove_rules(&mut ctx, bearer, iface)?;
            }
            self.remove_mbr(bearer);
            bearer.installed = false;
        }
        bearer.active = false;
        self.release_all(bearer)
    }

    /// 切换：承载改由 `new_enb` 接入。重新计算接入段路径并检查资源，
    /// 成功后以更高优先级安装新规则再删除旧规则；失败则撤销承载。
    /// 未激活的承载只更新接入点，返回 `false`。
    #[tracing::instrument(skip(self))]
    pub fn bearer_update(&mut self, teid: u32, new_enb: SwitchId) -> Result<bool> {
        if self.switches.get(new_enb).is_none() {
            return Err(BrokerError::UnknownSwitch(new_enb));
        }
        let mut bearer = self.take_bearer(teid)?;
        if !bearer.active {
            // 未激活的承载没有预留，只更新接入点与最短路径
            bearer.endpoints.enb = new_enb;
            let result = self.reset_shortest(&mut bearer, Interface::Access);
            self.put_bearer(bearer);
            result?;
            debug!(teid, enb = %new_enb, "承载未激活，仅更新接入点");
            return Ok(false);
        }
        self.stats.handovers += 1;
        let result = self.handover(&mut bearer, new_enb);
        let slice = bearer.slice;
        self.put_bearer(bearer);
        let (accepted, touched) = result?;
        self.adjust_touched(&touched, slice);
        self.emit(BrokerEvent::BearerHandover {
            teid,
            enb: new_enb,
            accepted,
        });
        Ok(accepted)
    }

    fn handover(&mut self, bearer: &mut Bearer, new_enb: SwitchId) -> Result<(bool, Vec<LinkKey>)> {
        let old_paths: Vec<(Interface, InstalledPath)> = Interface::ALL
            .iter()
            .map(|&i| (i, InstalledPath::of(bearer, i)))
            .collect();
        let old_mbr = bearer.clone();
        let was_installed = bearer.installed;

        // 释放接入段的旧预留，核心段预留保持不变
        let mut touched = {
            let (routing, mut ctx) = self.split();
            routing.release_bit_rate(ctx.links, bearer, Interface::Access)?
        };
        bearer.endpoints.enb = new_enb;
        if let Err(err) = self.reset_shortest(bearer, Interface::Access) {
            warn!(teid = bearer.teid, error = %err, "切换目标不可达，撤销承载");
            touched.extend(self.abort_handover(bearer, &old_paths, old_mbr, was_installed)?);
            self.adjust_touched(&touched, bearer.slice);
            return Err(err);
        }
        bearer.block_reasons.clear();

        let admitted = {
            let (routing, ctx) = self.split();
            routing.has_available_resources(&ctx, bearer, Interface::Access, &LinkDemand::new())
        };
        if !admitted {
            warn!(teid = bearer.teid, reasons = %bearer.block_reasons, "切换目标资源不足，撤销承载");
            touched.extend(self.abort_handover(bearer, &old_paths, old_mbr, was_installed)?);
            return Ok((false, touched));
        }

        {
            let (routing, mut ctx) = self.split();
            touched.extend(routing.reserve_bit_rate(ctx.links, bearer, Interface::Access)?);
        }
        if was_installed {
            bearer.priority = bearer.priority.wrapping_add(1);
            let (routing, mut ctx) = self.split();
            for (iface, old) in &old_paths {
                routing.update_rules(&mut ctx, bearer, *iface, old)?;
            }
            let mut prev = old_mbr;
            self.remove_mbr(&mut prev);
            bearer.mbr_installed = false;
            self.install_mbr(bearer);
        }
        info!(teid = bearer.teid, enb = %new_enb, access = %bearer.paths.route(Interface::Access), "切换完成");
        Ok((true, touched))
    }

    /// 切换失败：按旧路径删除规则与 MBR meter，并释放全部预留
    fn abort_handover(
        &mut self,
        bearer: &mut Bearer,
        old_paths: &[(Interface, InstalledPath)],
        old_mbr: Bearer,
        was_installed: bool,
    ) -> Result<Vec<LinkKey>> {
        if was_installed {
            let (routing, mut ctx) = self.split();
            for (iface, old) in old_paths {
                routing.remove_path_rules(&mut ctx, bearer, *iface, old)?;
            }
            let mut prev = old_mbr;
            self.remove_mbr(&mut prev);
            bearer.mbr_installed = false;
            bearer.installed = false;
        }
        bearer.active = false;
        self.release_all(bearer)
    }

    /// 按实际传输的字节累计到承载路径上的每条链路
    pub fn account_traffic(&mut self, teid: u32, dl_bytes: u64, ul_bytes: u64) -> Result<()> {
        let bearer = self.bearers.get(teid).ok_or(BrokerError::UnknownBearer(teid))?;
        if !bearer.active {
            return Ok(());
        }
        let qos = bearer.qos_type();
        let slice = bearer.slice;
        let mut hops = Vec::new();
        for iface in Interface::ALL {
            let (src, dst) = bearer.downlink_ends(iface);
            hops.extend(self.routing.path_hops(bearer.paths.route(iface), src, dst));
        }
        for (a, b) in hops {
            if let Some(link) = self.links.get_mut(a, b) {
                let dir = link.direction(a);
                if dl_bytes > 0 {
                    link.record_tx(dir, slice, qos, dl_bytes);
                }
                if ul_bytes > 0 {
                    link.record_tx(dir.inverse(), slice, qos, ul_bytes);
                }
            }
        }
        Ok(())
    }

    /// 交换机上报流规则被删除。承载仍处于活动状态说明控制面与数据面失步。
    pub fn on_flow_removed(&mut self, switch: SwitchId, cookie: u64) -> Result<()> {
        let teid = Cookie::from_u64(cookie).teid;
        match self.bearers.get(teid) {
            Some(b) if b.active && b.installed => Err(BrokerError::FlowRemovedWhileActive {
                switch,
                cookie,
                teid,
            }),
            _ => {
                debug!(%switch, cookie, "流规则已删除");
                Ok(())
            }
        }
    }

    /// 交换机返回的错误或异常报文：记录后继续运行，不重试。
    pub fn on_switch_error(&mut self, switch: SwitchId, message: &str) {
        warn!(%switch, message, "交换机报告错误");
    }

    /// 当前承载路径（用于日志与测试）
    pub fn bearer_route(&self, teid: u32, iface: Interface) -> Option<Route> {
        self.bearers.get(teid).map(|b| b.paths.route(iface).clone())
    }

    /// 全部链路、方向、切片（含 ALL）的快照
    pub fn snapshots(&self) -> Vec<LinkSnapshot> {
        let mut out = Vec::new();
        for link in self.links.iter() {
            for dir in LinkDir::ALL {
                for slice in link.slices().chain([SliceId::ALL]) {
                    out.push(link.snapshot(dir, slice));
                }
            }
        }
        out
    }
}
