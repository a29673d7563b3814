//! 控制器配置

use serde::{Deserialize, Serialize};

use crate::net::EwmaConfig;
use crate::sharing::SharingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// GBR 预留、CPU 与流表占用的阻塞阈值（0.8..=1.0）
    pub block_threshold: f64,
    /// 每张流表的容量（条目数）
    pub table_size: u32,
    pub sharing: SharingConfig,
    pub ewma: EwmaConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            block_threshold: 0.9,
            table_size: 8192,
            sharing: SharingConfig::default(),
            ewma: EwmaConfig::default(),
        }
    }
}
