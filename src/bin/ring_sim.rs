//! 环形回传网络仿真
//!
//! 按场景在环形拓扑上逐个请求承载，周期性执行 EWMA 更新与切片共享，
//! 最后打印承载准入结果与每条链路的带宽状态。

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use sdmn_rs::bearer::{Bearer, BearerEndpoints};
use sdmn_rs::broker::{
    BackhaulWorld, BearerOutcome, BearerStart, BrokerStats, Handover, OfferedLoad, RecordingChannel,
    start_timers,
};
use sdmn_rs::net::{LinkSnapshot, SwitchId};
use sdmn_rs::sim::{ScenarioSpec, SimTime, Simulator};
use sdmn_rs::slice::SliceId;
use sdmn_rs::topo::ring::{RingOpts, ring_broker};

#[derive(Debug, Parser)]
#[command(name = "ring_sim", about = "环形回传网络切片带宽仿真")]
struct Args {
    /// 场景 JSON；缺省时运行内置场景
    #[arg(long)]
    scenario: Option<PathBuf>,
    /// 仿真运行到多少毫秒（覆盖场景中的 until_ms）
    #[arg(long)]
    until_ms: Option<u64>,
    /// 输出统计 JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,
    /// 覆盖环上交换机数量
    #[arg(long)]
    switches: Option<usize>,
    /// 覆盖链路容量（Mbps）
    #[arg(long)]
    link_mbps: Option<u64>,
}

#[derive(Serialize)]
struct LinkRow {
    link: String,
    #[serde(flatten)]
    snapshot: LinkSnapshot,
}

#[derive(Serialize)]
struct StatsDump<'a> {
    until_ms: u64,
    routing: &'a str,
    stats: &'a BrokerStats,
    bearers: &'a [BearerOutcome],
    links: Vec<LinkRow>,
    commands: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    // 初始化 tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut spec = match &args.scenario {
        Some(path) => ScenarioSpec::load(path)?,
        None => ScenarioSpec::default(),
    };
    if let Some(n) = args.switches {
        spec.ring.switches = n;
    }
    if let Some(m) = args.link_mbps {
        spec.ring.link_mbps = m;
    }
    spec.validate()?;

    let channel = RecordingChannel::new();
    let opts = RingOpts {
        switches: spec.ring.switches,
        link_mbps: spec.ring.link_mbps,
        policy: spec.ring.policy,
    };
    let mut broker = ring_broker(&opts, spec.broker.clone(), spec.slice_infos(), Box::new(channel.clone()))?;
    broker.start();

    let mut sim = Simulator::default();
    let mut world = BackhaulWorld::new(broker);

    for b in &spec.bearers {
        let slice = SliceId(b.slice);
        let teid = world.broker.allocate_teid(slice)?;
        let endpoints = BearerEndpoints {
            enb: SwitchId(b.enb),
            sgw: SwitchId(b.sgw),
            pgw: SwitchId(b.pgw),
        };
        let bearer = Bearer::new(teid, slice, b.qos, endpoints);
        sim.schedule(
            SimTime::from_millis(b.start_ms),
            BearerStart {
                bearer,
                load: OfferedLoad {
                    dl_bps: b.dl_bps,
                    ul_bps: b.ul_bps,
                },
                duration: b.duration_ms.map(SimTime::from_millis),
            },
        );
        for h in &b.handovers {
            sim.schedule(
                SimTime::from_millis(h.at_ms),
                Handover {
                    teid,
                    enb: SwitchId(h.enb),
                },
            );
        }
    }
    start_timers(&mut sim, &world, SimTime::from_millis(spec.traffic_interval_ms));

    let until_ms = args.until_ms.unwrap_or(spec.until_ms);
    sim.run_until(SimTime::from_millis(until_ms), &mut world);

    for o in world.outcomes() {
        println!(
            "bearer teid={:#x} at_ms={} accepted={} path=access:{},core:{} reasons={}",
            o.teid, o.at_ms, o.accepted, o.access, o.core, o.reasons
        );
    }
    let stats = world.broker.stats();
    println!(
        "stats requests={} accepted={} blocked={} handovers={} meter_mods={} commands={}",
        stats.requests,
        stats.accepted,
        stats.blocked,
        stats.handovers,
        stats.meter_mods,
        channel.len()
    );
    let snapshots = world.broker.snapshots();
    println!("{}", LinkSnapshot::header());
    for s in &snapshots {
        println!("{s}");
    }

    if let Some(path) = args.stats_json {
        let dump = StatsDump {
            until_ms,
            routing: world.broker.routing_name(),
            stats,
            bearers: world.outcomes(),
            links: snapshots
                .into_iter()
                .map(|s| LinkRow {
                    link: s.link.to_string(),
                    snapshot: s,
                })
                .collect(),
            commands: channel.len(),
        };
        fs::write(&path, serde_json::to_string_pretty(&dump)?)?;
    }
    Ok(())
}
