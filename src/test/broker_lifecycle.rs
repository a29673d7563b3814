use std::sync::{Arc, Mutex};

use super::{MBPS, ring4, ring4_with, two_slices};
use crate::bearer::{Bearer, BearerEndpoints, BearerQos, BlockReasons, Interface, Route};
use crate::broker::{BrokerConfig, BrokerEvent, Cookie, RecordingChannel, TableLayout, TransportBroker};
use crate::error::BrokerError;
use crate::net::{LinkDir, SwitchId};
use crate::routing::{MeshRouting, RoutingPolicy};
use crate::sharing::{SharingConfig, SharingMode};
use crate::slice::SliceId;

const MBB: SliceId = SliceId(1);
const IOT: SliceId = SliceId(2);

fn qos() -> BearerQos {
    BearerQos {
        gbr_dl: 100 * MBPS,
        gbr_ul: 10 * MBPS,
        mbr_dl: 200 * MBPS,
        mbr_ul: 20 * MBPS,
    }
}

/// 已启动的环，加上一个 sw0 -> sw2 的已安装承载
fn installed() -> (TransportBroker, RecordingChannel, u32) {
    let (mut broker, channel) = ring4(RoutingPolicy::ShortestFirst);
    broker.start();
    channel.clear();
    let teid = broker.allocate_teid(MBB).expect("teid");
    let endpoints = BearerEndpoints {
        enb: SwitchId(2),
        sgw: SwitchId(0),
        pgw: SwitchId(0),
    };
    broker
        .notify_bearer_created(Bearer::new(teid, MBB, qos(), endpoints))
        .expect("create");
    assert!(broker.bearer_request(teid).expect("request"));
    assert!(broker.bearer_reserve(teid).expect("reserve"));
    assert!(broker.bearer_install(teid).expect("install"));
    (broker, channel, teid)
}

fn table_used(broker: &TransportBroker, sw: usize, table: u8) -> u32 {
    broker
        .switches()
        .get(SwitchId(sw))
        .and_then(|s| s.table(table))
        .map_or(0, |t| t.used)
}

fn count(lines: &[String], needle: &str) -> usize {
    lines.iter().filter(|l| l.contains(needle)).count()
}

#[test]
fn ring_links_carry_slice_quotas() {
    let (broker, _) = ring4(RoutingPolicy::ShortestFirst);
    assert_eq!(broker.links().len(), 4);
    assert_eq!(broker.switches().len(), 4);
    assert_eq!(broker.layout().num_tables(), 6);
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.quota(dir, MBB), 60);
            assert_eq!(link.quota(dir, IOT), 40);
            assert_eq!(link.quota(dir, SliceId::SPARE), 0);
            assert_eq!(link.quota_bit_rate(dir, MBB), 600 * MBPS);
        }
    }
}

#[test]
fn start_installs_pipeline_and_slice_meters() {
    let (mut broker, channel) = ring4(RoutingPolicy::ShortestFirst);
    broker.start();
    let lines = channel.lines();

    // 每台交换机 3 条默认规则 + 2 条分类规则；16 个切片 meter 各带一条带宽表规则
    assert_eq!(lines.len(), 20 + 16 * 2);
    assert_eq!(count(&lines, "meter-mod cmd=add"), 16);
    assert_eq!(broker.stats().meter_mods, 16);
    assert!(lines.contains(&"sw0 meter-mod cmd=add,flags=0x0001,meter=0xc0000101 drop:rate=600000".to_string()));
    assert!(lines.contains(&"sw0 meter-mod cmd=add,flags=0x0001,meter=0xc0000201 drop:rate=400000".to_string()));
    assert!(lines.contains(&"sw3 meter-mod cmd=add,flags=0x0001,meter=0xc0000102 drop:rate=600000".to_string()));
    assert_eq!(count(&lines, "sw2 flow-mod cmd=add,table=1,prio=64"), 2);
    assert_eq!(table_used(&broker, 2, TableLayout::CLASSIFY), 2);

    let link = broker.links().get(SwitchId(0), SwitchId(1)).expect("link");
    assert_eq!(link.meter_bit_rate(LinkDir::Forward, MBB), 600 * MBPS);
    assert_eq!(link.meter_bit_rate(LinkDir::Backward, IOT), 400 * MBPS);
}

#[test]
fn shared_mode_programs_one_aggregate_meter() {
    let cfg = BrokerConfig {
        sharing: SharingConfig {
            mode: SharingMode::Shared,
            ..SharingConfig::default()
        },
        ..BrokerConfig::default()
    };
    let (mut broker, channel) = ring4_with(RoutingPolicy::ShortestFirst, cfg);
    broker.start();
    let lines = channel.lines();
    assert_eq!(count(&lines, "meter-mod cmd=add"), 8);
    assert!(lines.contains(&"sw0 meter-mod cmd=add,flags=0x0001,meter=0xc000ff01 drop:rate=1000000".to_string()));
    assert_eq!(count(&lines, "table=4,prio=16"), 8);

    channel.clear();
    let teid = broker.allocate_teid(MBB).expect("teid");
    let endpoints = BearerEndpoints {
        enb: SwitchId(1),
        sgw: SwitchId(0),
        pgw: SwitchId(0),
    };
    broker
        .notify_bearer_created(Bearer::new(teid, MBB, qos(), endpoints))
        .expect("create");
    broker.bearer_request(teid).expect("request");
    broker.bearer_reserve(teid).expect("reserve");
    let lines = channel.lines();
    assert!(lines.contains(&"sw0 meter-mod cmd=mod,flags=0x0001,meter=0xc000ff01 drop:rate=900000".to_string()));
    assert!(lines.contains(&"sw1 meter-mod cmd=mod,flags=0x0001,meter=0xc000ff01 drop:rate=990000".to_string()));
}

#[test]
fn none_mode_programs_no_slice_meters() {
    let cfg = BrokerConfig {
        sharing: SharingConfig {
            mode: SharingMode::None,
            ..SharingConfig::default()
        },
        ..BrokerConfig::default()
    };
    let (mut broker, channel) = ring4_with(RoutingPolicy::ShortestFirst, cfg);
    broker.start();
    assert_eq!(channel.len(), 20);
    assert_eq!(count(&channel.lines(), "meter-mod"), 0);
}

#[test]
fn reserve_adjusts_slice_meters_on_touched_links() {
    let (broker, channel, _) = installed();
    let lines = channel.lines();
    assert_eq!(count(&lines, "meter-mod cmd=mod"), 4);
    assert!(lines.contains(&"sw0 meter-mod cmd=mod,flags=0x0001,meter=0xc0000101 drop:rate=500000".to_string()));
    assert!(lines.contains(&"sw1 meter-mod cmd=mod,flags=0x0001,meter=0xc0000101 drop:rate=590000".to_string()));
    assert!(lines.contains(&"sw1 meter-mod cmd=mod,flags=0x0001,meter=0xc0000102 drop:rate=500000".to_string()));
    let link = broker.links().get(SwitchId(1), SwitchId(2)).expect("link");
    assert_eq!(link.meter_bit_rate(LinkDir::Backward, MBB), 590 * MBPS);
}

#[test]
fn small_reservation_changes_do_not_touch_meters() {
    let (mut broker, channel) = ring4(RoutingPolicy::ShortestFirst);
    broker.start();
    channel.clear();
    let teid = broker.allocate_teid(MBB).expect("teid");
    let tiny = BearerQos {
        gbr_dl: MBPS,
        gbr_ul: MBPS,
        ..BearerQos::default()
    };
    let endpoints = BearerEndpoints {
        enb: SwitchId(1),
        sgw: SwitchId(0),
        pgw: SwitchId(0),
    };
    broker
        .notify_bearer_created(Bearer::new(teid, MBB, tiny, endpoints))
        .expect("create");
    broker.bearer_request(teid).expect("request");
    broker.bearer_reserve(teid).expect("reserve");
    assert_eq!(count(&channel.lines(), "meter-mod"), 0);
    let link = broker.links().get(SwitchId(0), SwitchId(1)).expect("link");
    assert_eq!(link.reserved_bit_rate(LinkDir::Forward, MBB), MBPS);
    assert_eq!(link.meter_bit_rate(LinkDir::Forward, MBB), 600 * MBPS);
}

#[test]
fn install_programs_routing_rules_and_mbr_meters() {
    let (broker, channel, teid) = installed();
    assert_eq!(teid, 0x0100_0001);
    let lines = channel.lines();

    assert_eq!(count(&lines, "flow-mod cmd=add,table=2,prio=1,cookie=0x1000000101000001"), 4);
    assert!(lines.contains(
        &"sw0 flow-mod cmd=add,table=2,prio=1,cookie=0x1000000101000001,flags=0x0003 \
          eth_type=0x800,ip_proto=17,udp_dst=2152,ip_dst=10.1.0.3,gtpu_teid=0x1000001 write:output=1 goto:4"
            .to_string()
    ));
    assert!(lines.contains(
        &"sw1 flow-mod cmd=add,table=2,prio=1,cookie=0x1000000101000001,flags=0x0003 \
          eth_type=0x800,ip_proto=17,udp_dst=2152,ip_dst=10.1.0.1,gtpu_teid=0x1000001 write:output=1 goto:4"
            .to_string()
    ));
    assert!(lines.contains(&"sw0 meter-mod cmd=add,flags=0x0001,meter=0x81000001 drop:rate=200000".to_string()));
    assert!(lines.contains(&"sw2 meter-mod cmd=add,flags=0x0001,meter=0xc1000001 drop:rate=20000".to_string()));
    assert_eq!(count(&lines, "table=4,prio=65,cookie=0x0000000101000001"), 2);

    assert_eq!(table_used(&broker, 0, 2), 1);
    assert_eq!(table_used(&broker, 1, 2), 2);
    assert_eq!(table_used(&broker, 2, 2), 1);
    assert_eq!(table_used(&broker, 3, 2), 0);

    let bearer = broker.bearer(teid).expect("bearer");
    assert!(bearer.active && bearer.installed && bearer.mbr_installed);
}

#[test]
fn remove_deletes_rules_and_releases_bandwidth() {
    let (mut broker, channel, teid) = installed();
    channel.clear();
    assert!(broker.bearer_remove(teid).expect("remove"));
    let lines = channel.lines();

    assert_eq!(count(&lines, "flow-mod cmd=del,table=2,cookie=0x1000000101000001"), 3);
    assert_eq!(count(&lines, "flow-mod cmd=del,table=4,cookie=0x0000000101000001"), 2);
    assert!(lines.contains(&"sw0 meter-mod cmd=del,meter=0x81000001".to_string()));
    assert!(lines.contains(&"sw2 meter-mod cmd=del,meter=0xc1000001".to_string()));
    assert_eq!(count(&lines, "meter-mod cmd=mod"), 4);
    assert_eq!(lines.len(), 3 + 4 + 4);

    for sw in 0..4 {
        assert_eq!(table_used(&broker, sw, 2), 0);
    }
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.reserved_bit_rate(dir, MBB), 0);
            assert_eq!(link.reserved_bit_rate(dir, SliceId::ALL), 0);
        }
    }
    let bearer = broker.bearer(teid).expect("bearer");
    assert!(!bearer.active && !bearer.installed && !bearer.mbr_installed);
    assert!(!bearer.paths.is_reserved(Interface::Access));
}

#[test]
fn handover_moves_rules_with_make_before_break() {
    let (mut broker, channel, teid) = installed();
    channel.clear();
    assert!(broker.bearer_update(teid, SwitchId(3)).expect("handover"));
    let lines = channel.lines();

    let bearer = broker.bearer(teid).expect("bearer");
    assert_eq!(bearer.priority, 2);
    assert_eq!(bearer.endpoints.enb, SwitchId(3));
    assert_eq!(bearer.paths.route(Interface::Access), &Route::CounterClockwise);
    assert!(bearer.active && bearer.installed && bearer.mbr_installed);

    let new_add = lines
        .iter()
        .position(|l| l.contains("flow-mod cmd=add,table=2,prio=2,cookie=0x1000000201000001"))
        .expect("new rule");
    let old_del = lines
        .iter()
        .position(|l| l.contains("flow-mod cmd=del,table=2,cookie=0x1000000101000001"))
        .expect("old rule removal");
    assert!(new_add < old_del);
    assert_eq!(count(&lines, "flow-mod cmd=add,table=2,prio=2"), 2);
    assert_eq!(count(&lines, "flow-mod cmd=del,table=2,cookie=0x1000000101000001"), 3);
    assert!(lines.contains(&"sw2 meter-mod cmd=del,meter=0xc1000001".to_string()));
    assert!(lines.contains(&"sw3 meter-mod cmd=add,flags=0x0001,meter=0xc1000001 drop:rate=20000".to_string()));
    assert_eq!(count(&lines, "table=4,prio=66,cookie=0x0000000201000001"), 2);

    assert_eq!(table_used(&broker, 0, 2), 1);
    assert_eq!(table_used(&broker, 1, 2), 0);
    assert_eq!(table_used(&broker, 2, 2), 0);
    assert_eq!(table_used(&broker, 3, 2), 1);

    let links = broker.links();
    assert_eq!(
        links.get(SwitchId(0), SwitchId(1)).expect("link").reserved_bit_rate(LinkDir::Forward, MBB),
        0
    );
    let new_link = links.get(SwitchId(0), SwitchId(3)).expect("link");
    assert_eq!(new_link.reserved_bit_rate(LinkDir::Forward, MBB), 100 * MBPS);
    assert_eq!(new_link.reserved_bit_rate(LinkDir::Backward, MBB), 10 * MBPS);
    assert_eq!(broker.stats().handovers, 1);
}

#[test]
fn handover_without_resources_tears_the_bearer_down() {
    let (mut broker, channel, teid) = installed();
    broker
        .links_mut()
        .get_mut(SwitchId(0), SwitchId(3))
        .expect("link")
        .update_res_bit_rate(LinkDir::Forward, MBB, (500 * MBPS) as i64)
        .expect("preload");
    broker.switch_mut(SwitchId(1)).expect("switch").set_cpu_usage(1.0);
    channel.clear();

    assert!(!broker.bearer_update(teid, SwitchId(3)).expect("handover"));
    let bearer = broker.bearer(teid).expect("bearer");
    assert!(!bearer.active && !bearer.installed && !bearer.mbr_installed);
    assert!(bearer.block_reasons.contains(BlockReasons::BANDWIDTH));
    assert!(bearer.block_reasons.contains(BlockReasons::CPU));

    let lines = channel.lines();
    assert_eq!(count(&lines, "flow-mod cmd=add,table=2"), 0);
    assert_eq!(count(&lines, "flow-mod cmd=del,table=2,cookie=0x1000000101000001"), 3);
    for sw in 0..4 {
        assert_eq!(table_used(&broker, sw, 2), 0);
    }
    let links = broker.links();
    assert_eq!(
        links.get(SwitchId(0), SwitchId(1)).expect("link").reserved_bit_rate(LinkDir::Forward, MBB),
        0
    );
    assert_eq!(
        links.get(SwitchId(0), SwitchId(3)).expect("link").reserved_bit_rate(LinkDir::Forward, MBB),
        500 * MBPS
    );
}

#[test]
fn handover_of_removed_bearer_only_moves_the_access_point() {
    let (mut broker, channel, teid) = installed();
    broker.bearer_remove(teid).expect("remove");
    channel.clear();

    assert!(!broker.bearer_update(teid, SwitchId(3)).expect("handover"));
    let bearer = broker.bearer(teid).expect("bearer");
    assert!(!bearer.active && !bearer.installed);
    assert_eq!(bearer.endpoints.enb, SwitchId(3));
    assert_eq!(broker.bearer_route(teid, Interface::Access), Some(Route::CounterClockwise));
    assert_eq!(broker.stats().handovers, 0);
    assert!(channel.lines().is_empty());
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.reserved_bit_rate(dir, MBB), 0);
        }
    }
}

#[test]
fn handover_of_blocked_bearer_reserves_nothing() {
    let (mut broker, _) = ring4(RoutingPolicy::ShortestFirst);
    broker.start();
    let teid = broker.allocate_teid(MBB).expect("teid");
    let endpoints = BearerEndpoints {
        enb: SwitchId(2),
        sgw: SwitchId(0),
        pgw: SwitchId(0),
    };
    broker
        .notify_bearer_created(Bearer::new(teid, MBB, qos(), endpoints))
        .expect("create");
    let preload = [(SwitchId(0), SwitchId(1)), (SwitchId(0), SwitchId(3))];
    for (a, b) in preload {
        broker
            .links_mut()
            .get_mut(a, b)
            .expect("link")
            .update_res_bit_rate(LinkDir::Forward, MBB, (550 * MBPS) as i64)
            .expect("preload");
    }
    assert!(!broker.bearer_request(teid).expect("request"));
    for (a, b) in preload {
        broker
            .links_mut()
            .get_mut(a, b)
            .expect("link")
            .update_res_bit_rate(LinkDir::Forward, MBB, -((550 * MBPS) as i64))
            .expect("unload");
    }

    assert!(!broker.bearer_update(teid, SwitchId(3)).expect("handover"));
    let bearer = broker.bearer(teid).expect("bearer");
    assert!(!bearer.active);
    assert_eq!(bearer.endpoints.enb, SwitchId(3));
    assert_eq!(broker.stats().handovers, 0);
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.reserved_bit_rate(dir, MBB), 0);
        }
    }
}

#[test]
fn unroutable_handover_target_tears_the_bearer_down() {
    let channel = RecordingChannel::new();
    let mut broker = TransportBroker::new(
        BrokerConfig::default(),
        two_slices(),
        Box::new(MeshRouting::new(0)),
        Box::new(channel.clone()),
    );
    let ids: Vec<SwitchId> = (0..4).map(|_| broker.add_switch()).collect();
    // sw3 不连接任何链路
    broker.connect(ids[0], ids[1], 1000 * MBPS).expect("link");
    broker.connect(ids[1], ids[2], 1000 * MBPS).expect("link");
    broker.start();
    let teid = broker.allocate_teid(MBB).expect("teid");
    let endpoints = BearerEndpoints {
        enb: ids[2],
        sgw: ids[0],
        pgw: ids[0],
    };
    broker
        .notify_bearer_created(Bearer::new(teid, MBB, qos(), endpoints))
        .expect("create");
    assert!(broker.bearer_request(teid).expect("request"));
    assert!(broker.bearer_reserve(teid).expect("reserve"));
    assert!(broker.bearer_install(teid).expect("install"));
    // 中间交换机 sw1 同时承载下行与上行规则
    assert_eq!(table_used(&broker, 1, 2), 2);
    channel.clear();

    let err = broker.bearer_update(teid, ids[3]).unwrap_err();
    assert!(matches!(err, BrokerError::Unroutable { teid: t, iface: Interface::Access } if t == teid));
    let bearer = broker.bearer(teid).expect("bearer");
    assert!(!bearer.active && !bearer.installed && !bearer.mbr_installed);
    assert!(count(&channel.lines(), "flow-mod cmd=del,table=2") > 0);
    for sw in 0..4 {
        assert_eq!(table_used(&broker, sw, 2), 0);
    }
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.reserved_bit_rate(dir, MBB), 0);
        }
    }
}

#[test]
fn flow_removed_while_active_is_a_desync() {
    let (mut broker, _, teid) = installed();
    let cookie = Cookie::routing(Interface::Access, 1, teid).to_u64();
    let err = broker.on_flow_removed(SwitchId(1), cookie).unwrap_err();
    assert!(matches!(err, BrokerError::FlowRemovedWhileActive { teid: t, .. } if t == teid));

    broker.bearer_remove(teid).expect("remove");
    broker.on_flow_removed(SwitchId(1), cookie).expect("expected after removal");
    broker.on_switch_error(SwitchId(1), "OFPET_BAD_REQUEST");
}

#[test]
fn slice_quota_update_is_applied_everywhere_or_nowhere() {
    let (mut broker, _) = ring4(RoutingPolicy::ShortestFirst);
    assert!(matches!(
        broker.update_slice_quota(MBB, 10),
        Err(BrokerError::Ledger { .. })
    ));

    broker
        .links_mut()
        .get_mut(SwitchId(2), SwitchId(3))
        .expect("link")
        .update_res_bit_rate(LinkDir::Forward, IOT, (350 * MBPS) as i64)
        .expect("preload");
    assert!(broker.update_slice_quota(IOT, -10).is_err());
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.quota(dir, IOT), 40);
        }
    }

    broker.update_slice_quota(IOT, -5).expect("shrink");
    broker.update_slice_quota(MBB, 5).expect("grow");
    for link in broker.links().iter() {
        for dir in LinkDir::ALL {
            assert_eq!(link.quota(dir, IOT), 35);
            assert_eq!(link.quota(dir, MBB), 65);
            assert_eq!(link.quota(dir, SliceId::SPARE), 0);
        }
    }
    assert!(matches!(broker.update_slice_quota(SliceId(7), 1), Err(BrokerError::UnknownSlice(_))));
}

#[test]
fn observers_see_lifecycle_events() {
    let (mut broker, _) = ring4(RoutingPolicy::ShortestFirst);
    let seen: Arc<Mutex<Vec<BrokerEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    broker.subscribe(Box::new(move |ev| sink.lock().expect("lock").push(ev.clone())));
    broker.start();

    let teid = broker.allocate_teid(IOT).expect("teid");
    assert_eq!(teid >> 24, 2);
    let endpoints = BearerEndpoints {
        enb: SwitchId(1),
        sgw: SwitchId(0),
        pgw: SwitchId(1),
    };
    broker
        .notify_bearer_created(Bearer::new(teid, IOT, qos(), endpoints))
        .expect("create");
    broker.bearer_request(teid).expect("request");
    broker.bearer_reserve(teid).expect("reserve");
    broker.bearer_install(teid).expect("install");
    broker.bearer_remove(teid).expect("remove");

    let events = seen.lock().expect("lock").clone();
    let lifecycle: Vec<&BrokerEvent> = events
        .iter()
        .filter(|e| !matches!(e, BrokerEvent::MeterAdjusted { .. }))
        .collect();
    assert_eq!(lifecycle.len(), 3);
    assert!(matches!(
        lifecycle[0],
        BrokerEvent::BearerRequested {
            accepted: true,
            access: Route::Clockwise,
            core: Route::CounterClockwise,
            ..
        }
    ));
    assert_eq!(lifecycle[1], &BrokerEvent::BearerInstalled { teid });
    assert_eq!(lifecycle[2], &BrokerEvent::BearerRemoved { teid });
    assert!(events.iter().any(|e| matches!(e, BrokerEvent::MeterAdjusted { slice, .. } if *slice == IOT)));

    let json = serde_json::to_value(lifecycle[0]).expect("serialize");
    assert_eq!(json["kind"], "bearer_requested");
    assert_eq!(json["access"], "clockwise");
}

#[test]
fn traffic_is_accounted_along_both_interfaces() {
    let (mut broker, _, teid) = installed();
    broker.account_traffic(teid, 1_000, 100).expect("account");
    broker.ewma_update(crate::sim::SimTime::from_secs(1));

    let link = broker.links().get(SwitchId(1), SwitchId(2)).expect("link");
    assert!(link.thp_bit_rate(LinkDir::Forward, MBB, crate::net::EwmaTerm::Short) > 0);
    assert!(link.thp_bit_rate(LinkDir::Backward, MBB, crate::net::EwmaTerm::Short) > 0);
    let idle = broker.links().get(SwitchId(2), SwitchId(3)).expect("link");
    assert_eq!(idle.thp_bit_rate(LinkDir::Forward, MBB, crate::net::EwmaTerm::Short), 0);
    assert!(broker.account_traffic(0xbad, 1, 1).is_err());
}
