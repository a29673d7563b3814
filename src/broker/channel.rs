//! 交换机编程通道
//!
//! 把命令文本转换为 OpenFlow 消息的代理不在本 crate 内，控制器只通过
//! 该 trait 向它下发命令。

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use super::tables::OfCommand;
use crate::net::SwitchId;

/// 交换机编程命令的接收端
pub trait SwitchChannel: Send {
    fn send(&mut self, switch: SwitchId, cmd: OfCommand);
}

type Log = Arc<Mutex<Vec<(SwitchId, OfCommand)>>>;

/// 按顺序记录全部命令。克隆共享同一份日志，测试持有一个句柄，控制器持有另一个。
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    sent: Log,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<(SwitchId, OfCommand)>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn sent(&self) -> Vec<(SwitchId, OfCommand)> {
        self.log().clone()
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    /// 以 `"<交换机> <命令文本>"` 形式逐行输出
    pub fn lines(&self) -> Vec<String> {
        self.log()
            .iter()
            .map(|(sw, cmd)| format!("{sw} {cmd}"))
            .collect()
    }

    pub fn clear(&self) {
        self.log().clear();
    }
}

impl SwitchChannel for RecordingChannel {
    fn send(&mut self, switch: SwitchId, cmd: OfCommand) {
        trace!(%switch, %cmd, "交换机命令");
        self.log().push((switch, cmd));
    }
}

/// 丢弃全部命令，用于只关心账本的运行
#[derive(Debug, Default)]
pub struct NullChannel;

impl SwitchChannel for NullChannel {
    fn send(&mut self, _switch: SwitchId, _cmd: OfCommand) {}
}
