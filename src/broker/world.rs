//! 回传网络仿真世界
//!
//! `BackhaulWorld` 持有控制器以及各活动承载的给定负载；周期事件
//! （EWMA、切片共享、流量注入）执行完毕后重新调度自身。

use std::any::Any;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::broker::TransportBroker;
use crate::bearer::{Bearer, Interface, Route};
use crate::net::SwitchId;
use crate::sim::{Event, SimTime, Simulator, World};

/// 承载的给定负载（bps）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfferedLoad {
    pub dl_bps: u64,
    pub ul_bps: u64,
}

/// 一次承载请求的结果，供命令行输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BearerOutcome {
    pub teid: u32,
    pub at_ms: u64,
    pub accepted: bool,
    pub reasons: String,
    pub access: Route,
    pub core: Route,
}

pub struct BackhaulWorld {
    pub broker: TransportBroker,
    loads: BTreeMap<u32, OfferedLoad>,
    outcomes: Vec<BearerOutcome>,
}

impl World for BackhaulWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl BackhaulWorld {
    pub fn new(broker: TransportBroker) -> Self {
        Self {
            broker,
            loads: BTreeMap::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn outcomes(&self) -> &[BearerOutcome] {
        &self.outcomes
    }

    pub fn load(&self, teid: u32) -> Option<OfferedLoad> {
        self.loads.get(&teid).copied()
    }

    /// 登记并尝试准入、预留、安装一个承载。返回是否被接纳。
    pub fn start_bearer(&mut self, now: SimTime, bearer: Bearer, load: OfferedLoad) -> bool {
        let teid = bearer.teid;
        let admitted = self.admit(bearer);
        let (accepted, reasons, access, core) = match (&admitted, self.broker.bearer(teid)) {
            (Ok(accepted), Some(b)) => (
                *accepted,
                b.block_reasons.to_string(),
                b.paths.route(Interface::Access).clone(),
                b.paths.route(Interface::Core).clone(),
            ),
            (result, _) => {
                if let Err(e) = result {
                    warn!(teid, error = %e, "承载建立失败");
                }
                (false, String::from("error"), Route::Undefined, Route::Undefined)
            }
        };
        if accepted {
            self.loads.insert(teid, load);
        }
        self.outcomes.push(BearerOutcome {
            teid,
            at_ms: now.as_millis(),
            accepted,
            reasons,
            access,
            core,
        });
        accepted
    }

    fn admit(&mut self, bearer: Bearer) -> crate::error::Result<bool> {
        let teid = bearer.teid;
        self.broker.notify_bearer_created(bearer)?;
        if !self.broker.bearer_request(teid)? {
            return Ok(false);
        }
        self.broker.bearer_reserve(teid)?;
        self.broker.bearer_install(teid)
    }

    pub fn stop_bearer(&mut self, teid: u32) {
        self.loads.remove(&teid);
        if let Err(e) = self.broker.bearer_remove(teid) {
            warn!(teid, error = %e, "承载删除失败");
        }
    }

    pub fn handover(&mut self, teid: u32, enb: SwitchId) {
        match self.broker.bearer_update(teid, enb) {
            Ok(true) => {}
            Ok(false) => {
                self.loads.remove(&teid);
            }
            Err(e) => {
                warn!(teid, error = %e, "切换失败");
                self.loads.remove(&teid);
            }
        }
    }

    /// 把 `interval` 内的给定负载计入各承载路径上的链路
    pub fn inject_traffic(&mut self, interval: SimTime) {
        let secs = interval.as_secs_f64();
        let loads: Vec<(u32, OfferedLoad)> = self.loads.iter().map(|(t, l)| (*t, *l)).collect();
        for (teid, load) in loads {
            let dl = (load.dl_bps as f64 * secs / 8.0) as u64;
            let ul = (load.ul_bps as f64 * secs / 8.0) as u64;
            if let Err(e) = self.broker.account_traffic(teid, dl, ul) {
                warn!(teid, error = %e, "流量记账失败");
            }
        }
    }
}

fn backhaul(world: &mut dyn World) -> &mut BackhaulWorld {
    world
        .as_any_mut()
        .downcast_mut::<BackhaulWorld>()
        .expect("world must be BackhaulWorld")
}

/// 周期性 EWMA 更新
pub struct EwmaTick {
    pub interval: SimTime,
}

impl Event for EwmaTick {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = backhaul(world);
        w.broker.ewma_update(self.interval);
        sim.schedule_in(self.interval, *self);
    }
}

/// 周期性切片共享调整
pub struct SharingTick {
    pub interval: SimTime,
}

impl Event for SharingTick {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = backhaul(world);
        debug!(now = ?sim.now(), "切片共享定时器触发");
        w.broker.run_sharing();
        sim.schedule_in(self.interval, *self);
    }
}

/// 周期性注入给定负载
pub struct TrafficTick {
    pub interval: SimTime,
}

impl Event for TrafficTick {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = backhaul(world);
        w.inject_traffic(self.interval);
        sim.schedule_in(self.interval, *self);
    }
}

/// 承载开始；`duration` 非空时到期自动删除
pub struct BearerStart {
    pub bearer: Bearer,
    pub load: OfferedLoad,
    pub duration: Option<SimTime>,
}

impl Event for BearerStart {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let BearerStart {
            bearer,
            load,
            duration,
        } = *self;
        let teid = bearer.teid;
        let w = backhaul(world);
        let accepted = w.start_bearer(sim.now(), bearer, load);
        info!(teid, accepted, now = ?sim.now(), "承载请求");
        if let (true, Some(d)) = (accepted, duration) {
            sim.schedule_in(d, BearerStop { teid });
        }
    }
}

pub struct BearerStop {
    pub teid: u32,
}

impl Event for BearerStop {
    fn execute(self: Box<Self>, _sim: &mut Simulator, world: &mut dyn World) {
        backhaul(world).stop_bearer(self.teid);
    }
}

/// 用户移动到另一个 eNB
pub struct Handover {
    pub teid: u32,
    pub enb: SwitchId,
}

impl Event for Handover {
    fn execute(self: Box<Self>, _sim: &mut Simulator, world: &mut dyn World) {
        backhaul(world).handover(self.teid, self.enb);
    }
}

/// 启动三个周期定时器；周期为零的定时器不启动
pub fn start_timers(sim: &mut Simulator, world: &BackhaulWorld, traffic_interval: SimTime) {
    let cfg = world.broker.config();
    let ewma = cfg.ewma.timeout();
    let sharing = cfg.sharing.timeout();
    if traffic_interval > SimTime::ZERO {
        sim.schedule_in(traffic_interval, TrafficTick {
            interval: traffic_interval,
        });
    }
    if ewma > SimTime::ZERO {
        sim.schedule_in(ewma, EwmaTick { interval: ewma });
    }
    if sharing > SimTime::ZERO {
        sim.schedule_in(sharing, SharingTick { interval: sharing });
    }
}
