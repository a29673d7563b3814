//! 承载路径状态
//!
//! 记录承载每个逻辑接口（接入段、核心段）选定的路由、是否为最短路径，
//! 以及是否已为其预留带宽。

use std::fmt;

use serde::Serialize;

use crate::net::SwitchId;

/// 承载的逻辑接口。下行方向：核心段 PGW → SGW，接入段 SGW → eNB。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    Access,
    Core,
}

impl Interface {
    /// 准入评估顺序
    pub const ALL: [Interface; 2] = [Interface::Access, Interface::Core];

    pub(crate) fn code(self) -> u8 {
        match self {
            Interface::Access => 1,
            Interface::Core => 2,
        }
    }

    fn index(self) -> usize {
        match self {
            Interface::Access => 0,
            Interface::Core => 1,
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interface::Access => f.write_str("access"),
            Interface::Core => f.write_str("core"),
        }
    }
}

/// 下行路由。环形拓扑使用方向，任意拓扑使用显式跳列表（含首尾交换机）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[default]
    Undefined,
    Local,
    Clockwise,
    CounterClockwise,
    Explicit(Vec<SwitchId>),
}

impl Route {
    /// 环形方向取反；其它路由保持不变
    pub fn inverse(&self) -> Route {
        match self {
            Route::Clockwise => Route::CounterClockwise,
            Route::CounterClockwise => Route::Clockwise,
            other => other.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Route::Local)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Undefined => f.write_str("undefined"),
            Route::Local => f.write_str("local"),
            Route::Clockwise => f.write_str("clockwise"),
            Route::CounterClockwise => f.write_str("counterclockwise"),
            Route::Explicit(hops) => {
                let hops: Vec<String> = hops.iter().map(|h| h.to_string()).collect();
                f.write_str(&hops.join("->"))
            }
        }
    }
}

/// 单个接口的路径状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathState {
    pub route: Route,
    pub shortest: bool,
    pub reserved: bool,
}

impl Default for PathState {
    fn default() -> Self {
        Self {
            route: Route::Undefined,
            shortest: true,
            reserved: false,
        }
    }
}

impl PathState {
    /// 反转路由方向，并同步翻转“是否最短”标记。本地路由不变。
    pub fn invert(&mut self) {
        if matches!(self.route, Route::Clockwise | Route::CounterClockwise) {
            self.route = self.route.inverse();
            self.shortest = !self.shortest;
        }
    }
}

/// 承载在各接口上的路径状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BearerPathState {
    paths: [PathState; 2],
}

impl BearerPathState {
    pub fn get(&self, iface: Interface) -> &PathState {
        &self.paths[iface.index()]
    }

    pub fn get_mut(&mut self, iface: Interface) -> &mut PathState {
        &mut self.paths[iface.index()]
    }

    /// 设置为最短路径
    pub fn set_shortest(&mut self, iface: Interface, route: Route) {
        let p = self.get_mut(iface);
        p.route = route;
        p.shortest = true;
    }

    pub fn route(&self, iface: Interface) -> &Route {
        &self.get(iface).route
    }

    pub fn is_shortest(&self, iface: Interface) -> bool {
        self.get(iface).shortest
    }

    pub fn is_reserved(&self, iface: Interface) -> bool {
        self.get(iface).reserved
    }

    /// 释放后复位：清除预留标记
    pub fn reset(&mut self, iface: Interface) {
        self.get_mut(iface).reserved = false;
    }
}
