//! 环形拓扑路由
//!
//! 交换机按下标顺时针排列成环：顺时针下一跳为 `(i + 1) % n`，逆时针为 `(i + n - 1) % n`。

use serde::{Deserialize, Serialize};

use super::RoutingStrategy;
use crate::bearer::Route;
use crate::net::{SwitchId, SwitchRegistry};

/// 环形路由策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// 只使用最短路径
    ShortestOnly,
    /// 最短路径优先，资源不足时尝试一次反向路径
    #[default]
    ShortestFirst,
}

#[derive(Debug, Clone)]
pub struct RingRouting {
    size: usize,
    policy: RoutingPolicy,
}

impl RingRouting {
    pub fn new(size: usize, policy: RoutingPolicy) -> Self {
        Self { size, policy }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    fn next(&self, sw: SwitchId, route: &Route) -> SwitchId {
        match route {
            Route::Clockwise => SwitchId((sw.0 + 1) % self.size),
            _ => SwitchId((sw.0 + self.size - 1) % self.size),
        }
    }

    /// 沿给定方向从 src 到 dst 的跳数
    pub fn hops(&self, src: SwitchId, dst: SwitchId, route: &Route) -> usize {
        if self.size == 0 {
            return 0;
        }
        let n = self.size;
        match route {
            Route::Clockwise => (dst.0 + n - src.0 % n) % n,
            Route::CounterClockwise => (src.0 + n - dst.0 % n) % n,
            _ => 0,
        }
    }

    /// 最短方向：src == dst 为本地；顺时针跳数不超过 n/2 时取顺时针（平局取顺时针）。
    pub fn shortest_path(&self, src: SwitchId, dst: SwitchId) -> Route {
        if src == dst {
            return Route::Local;
        }
        if self.hops(src, dst, &Route::Clockwise) <= self.size / 2 {
            Route::Clockwise
        } else {
            Route::CounterClockwise
        }
    }
}

impl RoutingStrategy for RingRouting {
    fn name(&self) -> &'static str {
        "ring"
    }

    fn find_path(&self, _switches: &SwitchRegistry, src: SwitchId, dst: SwitchId, _key: u64) -> Option<Route> {
        if src.0 >= self.size || dst.0 >= self.size {
            return None;
        }
        Some(self.shortest_path(src, dst))
    }

    fn path_hops(&self, route: &Route, src: SwitchId, dst: SwitchId) -> Vec<(SwitchId, SwitchId)> {
        if !matches!(route, Route::Clockwise | Route::CounterClockwise) || src == dst {
            return Vec::new();
        }
        let mut hops = Vec::with_capacity(self.hops(src, dst, route));
        let mut cur = src;
        while cur != dst && hops.len() < self.size {
            let next = self.next(cur, route);
            hops.push((cur, next));
            cur = next;
        }
        hops
    }

    fn allows_fallback(&self) -> bool {
        self.policy == RoutingPolicy::ShortestFirst
    }
}
