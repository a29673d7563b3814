//! 任意拓扑（网状）路由
//!
//! 为每个 (from, dst) 预计算所有等价最短路径的下一跳集合，
//! 再按承载 TEID 做稳定的 ECMP 选择，得到显式跳列表。
//! 无反向路径可言，因此不支持回退。

use std::collections::{HashMap, VecDeque};

use super::RoutingStrategy;
use crate::bearer::Route;
use crate::net::{SwitchId, SwitchRegistry};

#[derive(Debug, Default, Clone)]
pub struct MeshRouting {
    /// (from, dst) -> 多个等价最短路径下一跳
    next_hops: HashMap<(SwitchId, SwitchId), Vec<SwitchId>>,
    /// 用于 ECMP hashing 的盐
    hash_salt: u64,
}

impl MeshRouting {
    pub fn new(hash_salt: u64) -> Self {
        Self {
            next_hops: HashMap::new(),
            hash_salt,
        }
    }

    /// 基于当前交换机邻接关系重建下一跳表（链路均为双向）。
    pub fn rebuild(&mut self, switches: &SwitchRegistry) {
        let n = switches.len();
        let adj: Vec<Vec<SwitchId>> = switches.iter().map(|s| s.neighbors().collect()).collect();
        self.next_hops.clear();

        // 对每个 dst 做 BFS 得到跳数距离 dist[*]，
        // 再为每个 from 选出所有满足 dist[next] = dist[from] - 1 的邻居。
        let mut dist: Vec<usize> = vec![usize::MAX; n];
        let mut q: VecDeque<SwitchId> = VecDeque::new();

        for dst_idx in 0..n {
            dist.fill(usize::MAX);
            q.clear();
            dist[dst_idx] = 0;
            q.push_back(SwitchId(dst_idx));

            while let Some(v) = q.pop_front() {
                let dv = dist[v.0];
                for &nb in &adj[v.0] {
                    if dist[nb.0] == usize::MAX {
                        dist[nb.0] = dv + 1;
                        q.push_back(nb);
                    }
                }
            }

            for from_idx in 0..n {
                let df = dist[from_idx];
                if from_idx == dst_idx || df == usize::MAX {
                    continue;
                }
                let cands: Vec<SwitchId> = adj[from_idx]
                    .iter()
                    .copied()
                    .filter(|nh| dist[nh.0] == df - 1)
                    .collect();
                if !cands.is_empty() {
                    self.next_hops.insert((SwitchId(from_idx), SwitchId(dst_idx)), cands);
                }
            }
        }
    }

    /// (from, dst) 的等价下一跳候选
    pub fn next_hops(&self, from: SwitchId, dst: SwitchId) -> Option<&[SwitchId]> {
        self.next_hops.get(&(from, dst)).map(|v| v.as_slice())
    }

    fn pick(&self, from: SwitchId, dst: SwitchId, key: u64, cands: &[SwitchId]) -> SwitchId {
        let h = mix64(
            key ^ (from.0 as u64).wrapping_mul(0x9E3779B97F4A7C15) ^ (dst.0 as u64) ^ self.hash_salt,
        );
        cands[(h as usize) % cands.len()]
    }
}

impl RoutingStrategy for MeshRouting {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn find_path(&self, switches: &SwitchRegistry, src: SwitchId, dst: SwitchId, key: u64) -> Option<Route> {
        if switches.get(src).is_none() || switches.get(dst).is_none() {
            return None;
        }
        if src == dst {
            return Some(Route::Local);
        }
        let mut hops = vec![src];
        let mut cur = src;
        while cur != dst {
            let cands = self.next_hops(cur, dst)?;
            cur = self.pick(cur, dst, key, cands);
            hops.push(cur);
            if hops.len() > switches.len() {
                return None;
            }
        }
        Some(Route::Explicit(hops))
    }

    fn path_hops(&self, route: &Route, _src: SwitchId, _dst: SwitchId) -> Vec<(SwitchId, SwitchId)> {
        match route {
            Route::Explicit(hops) => hops.windows(2).map(|w| (w[0], w[1])).collect(),
            _ => Vec::new(),
        }
    }

    fn allows_fallback(&self) -> bool {
        false
    }

    fn topology_changed(&mut self, switches: &SwitchRegistry) {
        self.rebuild(switches);
    }
}

/// splitmix64：确定性的 64-bit mixing
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
