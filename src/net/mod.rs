//! 回传网络资源模块
//!
//! 此模块包含链路带宽账本、链路注册表、交换机资源以及统计快照。

// 子模块声明
mod id;
mod link;
mod link_registry;
mod stats;
mod switch;

// 重新导出公共接口
pub use id::{LinkDir, LinkKey, SwitchId};
pub use link::{EwmaConfig, EwmaTerm, LinkInfo, SliceMetadata};
pub use link_registry::LinkRegistry;
pub use stats::LinkSnapshot;
pub use switch::{FlowTable, SwitchInfo, SwitchRegistry};
