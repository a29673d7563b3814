//! 仿真场景描述
//!
//! 从 JSON 加载：环形拓扑、控制器配置、切片与承载到达序列。

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bearer::BearerQos;
use crate::broker::BrokerConfig;
use crate::routing::RoutingPolicy;
use crate::slice::{SliceId, SliceInfo};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed scenario JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSpec {
    pub ring: RingSpec,
    pub broker: BrokerConfig,
    pub slices: Vec<SliceSpec>,
    pub bearers: Vec<BearerSpec>,
    /// 给定负载注入周期（毫秒）
    pub traffic_interval_ms: u64,
    /// 运行截止时间（毫秒）
    pub until_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSpec {
    pub switches: usize,
    pub link_mbps: u64,
    pub policy: RoutingPolicy,
}

impl Default for RingSpec {
    fn default() -> Self {
        Self {
            switches: 4,
            link_mbps: 1000,
            policy: RoutingPolicy::ShortestFirst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceSpec {
    pub id: u8,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    pub quota: u8,
    #[serde(default = "default_sharing")]
    pub sharing: bool,
}

fn default_sharing() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BearerSpec {
    pub slice: u8,
    pub start_ms: u64,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub enb: usize,
    pub sgw: usize,
    pub pgw: usize,
    #[serde(default)]
    pub qos: BearerQos,
    /// 给定下行负载（bps）
    #[serde(default)]
    pub dl_bps: u64,
    /// 给定上行负载（bps）
    #[serde(default)]
    pub ul_bps: u64,
    #[serde(default)]
    pub handovers: Vec<HandoverSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverSpec {
    pub at_ms: u64,
    pub enb: usize,
}

impl Default for ScenarioSpec {
    /// 4 交换机环、1 Gbps 链路、两个切片（60/40）与少量 GBR 承载
    fn default() -> Self {
        let gbr = |dl: u64, ul: u64| BearerQos {
            gbr_dl: dl,
            gbr_ul: ul,
            mbr_dl: dl * 2,
            mbr_ul: ul * 2,
        };
        let bearer = |slice: u8, start_ms: u64, enb: usize, qos: BearerQos| BearerSpec {
            slice,
            start_ms,
            duration_ms: None,
            enb,
            sgw: 0,
            pgw: 0,
            qos,
            dl_bps: qos.gbr_dl,
            ul_bps: qos.gbr_ul,
            handovers: Vec::new(),
        };
        let mut bearers = vec![
            bearer(1, 100, 2, gbr(200_000_000, 20_000_000)),
            bearer(1, 200, 1, gbr(150_000_000, 10_000_000)),
            bearer(2, 300, 3, gbr(100_000_000, 10_000_000)),
            bearer(1, 400, 2, gbr(300_000_000, 10_000_000)),
            bearer(2, 500, 2, BearerQos::default()),
        ];
        bearers[2].handovers.push(HandoverSpec { at_ms: 2_000, enb: 1 });
        bearers[4].dl_bps = 50_000_000;
        Self {
            ring: RingSpec::default(),
            broker: BrokerConfig::default(),
            slices: vec![
                SliceSpec {
                    id: 1,
                    name: "mbb".to_string(),
                    priority: 1,
                    quota: 60,
                    sharing: true,
                },
                SliceSpec {
                    id: 2,
                    name: "iot".to_string(),
                    priority: 2,
                    quota: 40,
                    sharing: true,
                },
            ],
            bearers,
            traffic_interval_ms: 100,
            until_ms: 5_000,
        }
    }
}

impl ScenarioSpec {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        let spec: ScenarioSpec = serde_json::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |msg: String| Err(ScenarioError::Invalid(msg));
        if self.ring.switches < 3 {
            return invalid(format!("ring needs at least 3 switches, got {}", self.ring.switches));
        }
        if self.ring.link_mbps == 0 {
            return invalid("link_mbps must be positive".to_string());
        }
        if self.slices.is_empty() {
            return invalid("at least one slice is required".to_string());
        }
        let mut ids = BTreeSet::new();
        let mut total = 0u32;
        for s in &self.slices {
            if !SliceId(s.id).is_real() {
                return invalid(format!("slice id {} is reserved", s.id));
            }
            if !ids.insert(s.id) {
                return invalid(format!("duplicate slice id {}", s.id));
            }
            total += u32::from(s.quota);
        }
        if total > 100 {
            return invalid(format!("slice quotas sum to {total}% (> 100%)"));
        }
        if !(0.0..=1.0).contains(&self.broker.block_threshold) {
            return invalid(format!("block_threshold {} outside 0..=1", self.broker.block_threshold));
        }
        let n = self.ring.switches;
        for (i, b) in self.bearers.iter().enumerate() {
            if !ids.contains(&b.slice) {
                return invalid(format!("bearer #{i} references unknown slice {}", b.slice));
            }
            let ends = [b.enb, b.sgw, b.pgw]
                .into_iter()
                .chain(b.handovers.iter().map(|h| h.enb));
            if let Some(bad) = ends.into_iter().find(|&sw| sw >= n) {
                return invalid(format!("bearer #{i} references switch {bad} outside a ring of {n}"));
            }
        }
        Ok(())
    }

    pub fn slice_infos(&self) -> Vec<SliceInfo> {
        self.slices
            .iter()
            .map(|s| SliceInfo::new(SliceId(s.id), s.name.clone(), s.priority, s.sharing, s.quota))
            .collect()
    }
}
