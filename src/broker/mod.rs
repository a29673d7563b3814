//! 传输网络控制器
//!
//! 承载生命周期编排、OpenFlow 流水线与 meter 编程、事件订阅，以及驱动
//! 控制器的仿真世界与周期事件。

mod broker;
mod channel;
mod config;
mod events;
mod tables;
mod world;

pub use broker::TransportBroker;
pub use channel::{NullChannel, RecordingChannel, SwitchChannel};
pub use config::BrokerConfig;
pub use events::{BrokerEvent, BrokerObserver, BrokerStats};
pub use tables::{Cookie, FlowMod, MeterMod, ModCmd, OfCommand, TableLayout, mbr_meter_id, slice_meter_id};
pub use world::{
    BackhaulWorld, BearerOutcome, BearerStart, BearerStop, EwmaTick, Handover, OfferedLoad, SharingTick,
    TrafficTick, start_timers,
};
