//! 环形回传拓扑构建

use crate::broker::{BrokerConfig, SwitchChannel, TransportBroker};
use crate::error::Result;
use crate::net::SwitchId;
use crate::routing::{RingRouting, RoutingPolicy};
use crate::slice::SliceInfo;

/// 环形拓扑配置选项
#[derive(Debug, Clone)]
pub struct RingOpts {
    pub switches: usize,
    pub link_mbps: u64,
    pub policy: RoutingPolicy,
}

impl Default for RingOpts {
    fn default() -> Self {
        Self {
            switches: 4,
            link_mbps: 1000,
            policy: RoutingPolicy::ShortestFirst,
        }
    }
}

/// 在空控制器上构建环形拓扑
///
/// 拓扑结构：sw0 <-> sw1 <-> ... <-> sw{n-1} <-> sw0，顺时针即下标递增方向。
/// 返回：按环序排列的交换机
pub fn build_ring(broker: &mut TransportBroker, opts: &RingOpts) -> Result<Vec<SwitchId>> {
    let capacity = opts.link_mbps.saturating_mul(1_000_000);
    let ids: Vec<SwitchId> = (0..opts.switches).map(|_| broker.add_switch()).collect();
    for (i, &a) in ids.iter().enumerate() {
        let b = ids[(i + 1) % ids.len()];
        broker.connect(a, b, capacity)?;
    }
    Ok(ids)
}

/// 创建使用环形路由的控制器并构建拓扑
pub fn ring_broker(
    opts: &RingOpts,
    cfg: BrokerConfig,
    slices: Vec<SliceInfo>,
    channel: Box<dyn SwitchChannel>,
) -> Result<TransportBroker> {
    let routing = Box::new(RingRouting::new(opts.switches, opts.policy));
    let mut broker = TransportBroker::new(cfg, slices, routing, channel);
    build_ring(&mut broker, opts)?;
    Ok(broker)
}
