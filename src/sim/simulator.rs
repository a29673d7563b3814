//! 仿真器
//!
//! 定义事件驱动仿真器，维护当前时间与事件队列。
//! 单线程执行：同一时刻只有一个回调运行，控制器状态无需加锁。

use super::event::{Event, EventId};
use super::scheduled_event::ScheduledEvent;
use super::time::SimTime;
use super::world::World;
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, info, trace};

/// 事件驱动仿真器：维护当前时间与事件队列。
#[derive(Default)]
pub struct Simulator {
    now: SimTime,
    next_seq: u64,
    q: BinaryHeap<ScheduledEvent>,
    /// 尚未触发的事件序列号
    live: HashSet<u64>,
}

impl Simulator {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 队列中尚未触发（且未取消）的事件数
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// 调度事件在指定时间执行
    #[tracing::instrument(skip(self, ev), fields(event_type = std::any::type_name::<E>(), schedule_at = ?at))]
    pub fn schedule<E: Event>(&mut self, at: SimTime, ev: E) -> EventId {
        let seq = self.next_seq;
        trace!(now = ?self.now, seq, "调度事件");

        self.next_seq = self.next_seq.wrapping_add(1);
        self.live.insert(seq);
        self.q.push(ScheduledEvent {
            at,
            seq,
            ev: Box::new(ev),
        });

        debug!(queue_size = self.q.len(), "事件已加入队列");
        EventId(seq)
    }

    /// 调度事件在 `delay` 之后执行
    pub fn schedule_in<E: Event>(&mut self, delay: SimTime, ev: E) -> EventId {
        self.schedule(self.now.saturating_add(delay), ev)
    }

    /// 取消尚未触发的事件。事件已触发或已取消时返回 false。
    pub fn cancel(&mut self, id: EventId) -> bool {
        let removed = self.live.remove(&id.0);
        if removed {
            debug!(seq = id.0, "取消事件");
        }
        removed
    }

    fn pop_live(&mut self) -> Option<ScheduledEvent> {
        while let Some(item) = self.q.pop() {
            if self.live.remove(&item.id().0) {
                return Some(item);
            }
            trace!(seq = item.seq, "跳过已取消事件");
        }
        None
    }

    /// 运行直到事件队列为空或到达 `until`。
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) {
        loop {
            // 先丢弃队首已取消的事件，再判断时间
            while let Some(top) = self.q.peek() {
                if self.live.contains(&top.seq) {
                    break;
                }
                self.q.pop();
            }
            match self.q.peek() {
                Some(top) if top.at <= until => {}
                _ => break,
            }
            let Some(item) = self.pop_live() else {
                break;
            };
            self.now = item.at;
            item.ev.execute(self, world);
            world.on_tick(self);
        }
        self.now = self.now.max(until);
    }

    /// 运行所有事件直到队列为空。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) {
        info!("▶️  开始运行仿真");
        debug!(now = ?self.now, queue_size = self.q.len(), "初始状态");

        let mut event_count = 0;
        while let Some(item) = self.pop_live() {
            event_count += 1;
            self.now = item.at;

            debug!(
                event_num = event_count,
                now = ?self.now,
                seq = item.seq,
                remaining_queue = self.q.len(),
                "执行事件"
            );

            item.ev.execute(self, world);
            world.on_tick(self);
        }

        info!(
            total_events = event_count,
            final_time = ?self.now,
            "✅ 仿真完成"
        );
    }
}
