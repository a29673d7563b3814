mod broker_lifecycle;
mod sharing;

use crate::broker::{BrokerConfig, RecordingChannel, TransportBroker};
use crate::routing::RoutingPolicy;
use crate::slice::{SliceId, SliceInfo};
use crate::topo::ring::{RingOpts, ring_broker};

pub(crate) const MBPS: u64 = 1_000_000;

/// 两个切片：s1 (mbb, 优先级 1, 60%)，s2 (iot, 优先级 2, 40%)
pub(crate) fn two_slices() -> Vec<SliceInfo> {
    vec![
        SliceInfo::new(SliceId(1), "mbb", 1, true, 60),
        SliceInfo::new(SliceId(2), "iot", 2, true, 40),
    ]
}

/// 4 交换机、1 Gbps 的环
pub(crate) fn ring4_with(policy: RoutingPolicy, cfg: BrokerConfig) -> (TransportBroker, RecordingChannel) {
    let channel = RecordingChannel::new();
    let opts = RingOpts {
        switches: 4,
        link_mbps: 1000,
        policy,
    };
    let broker = ring_broker(&opts, cfg, two_slices(), Box::new(channel.clone())).expect("build ring");
    (broker, channel)
}

pub(crate) fn ring4(policy: RoutingPolicy) -> (TransportBroker, RecordingChannel) {
    ring4_with(policy, BrokerConfig::default())
}
