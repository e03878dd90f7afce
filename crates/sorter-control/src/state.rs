//! 状态机骨架
//!
//! 每条流水线的状态是一个枚举，每个变体持有该状态自己的数据。
//! 状态只通过返回值请求转移；[`StateMachine`] 负责调用旧状态的 `cleanup`
//! 并构造新状态，所以进入新状态时它的数据总是新的。

use crate::context::SharedContext;
use std::fmt;
use tracing::info;

/// 单个状态的行为
pub trait Stateful {
    type Id: Copy + Eq + fmt::Display;
    type Deps;

    /// 执行一次；返回 `Some(next)` 请求转移
    fn step(&mut self, shared: &mut SharedContext, deps: &mut Self::Deps) -> Option<Self::Id>;

    /// 离开状态时调用
    fn cleanup(&mut self, _shared: &mut SharedContext, _deps: &mut Self::Deps) {}
}

/// 状态枚举
pub trait MachineState: Stateful + Sized {
    /// 状态机名称（日志用）
    const NAME: &'static str;

    fn id(&self) -> Self::Id;

    /// 构造处于 `id` 的新状态
    fn enter(id: Self::Id) -> Self;
}

pub struct StateMachine<S: MachineState> {
    state: S,
    deps: S::Deps,
    transitions: u64,
}

impl<S: MachineState> StateMachine<S> {
    pub fn new(initial: S::Id, deps: S::Deps) -> Self {
        Self {
            state: S::enter(initial),
            deps,
            transitions: 0,
        }
    }

    pub fn current(&self) -> S::Id {
        self.state.id()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn deps(&self) -> &S::Deps {
        &self.deps
    }

    pub fn deps_mut(&mut self) -> &mut S::Deps {
        &mut self.deps
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn step(&mut self, shared: &mut SharedContext) {
        let Some(next) = self.state.step(shared, &mut self.deps) else {
            return;
        };
        let current = self.state.id();
        if next == current {
            return;
        }
        info!("{}: {} -> {}", S::NAME, current, next);
        self.state.cleanup(shared, &mut self.deps);
        self.state = S::enter(next);
        self.transitions += 1;
    }

    /// 关闭时调用当前状态的 `cleanup`
    pub fn cleanup(&mut self, shared: &mut SharedContext) {
        self.state.cleanup(shared, &mut self.deps);
    }
}

/// 等待日志限频器
#[derive(Debug, Default, Clone)]
pub struct WaitLog {
    started_ms: Option<u64>,
    last_log_ms: Option<u64>,
}

impl WaitLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次等待；距上次输出超过 `interval_ms` 时返回已等待的毫秒数
    pub fn waiting(&mut self, now_ms: u64, interval_ms: u64) -> Option<u64> {
        let started = *self.started_ms.get_or_insert(now_ms);
        let due = match self.last_log_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= interval_ms,
        };
        if !due {
            return None;
        }
        self.last_log_ms = Some(now_ms);
        Some(now_ms.saturating_sub(started))
    }

    /// 结束等待；返回总等待时长
    pub fn finish(&mut self, now_ms: u64) -> Option<u64> {
        self.last_log_ms = None;
        self.started_ms
            .take()
            .map(|started| now_ms.saturating_sub(started))
    }

    pub fn is_waiting(&self) -> bool {
        self.started_ms.is_some()
    }
}
