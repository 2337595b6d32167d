//! 事件驱动状态机
//!
//! 所有状态在构造时放入状态机自己的 arena，以 [`StateId`] 引用，生命周期与状态机相同。
//! 每个状态持有一张 `Event → Transition` 转换表。
//!
//! # 转换
//!
//! - **同步转换**：立即提交 `current = target`，然后在调用线程上执行入口回调
//! - **异步转换**：记录 `requested = target`，在新线程中执行动作。动作结束后通过通道
//!   投递完成消息（可附带后续事件）；下一次 [`StateMachine::current_state`] 读取该消息，
//!   提交请求的状态并处理后续事件
//!
//! 动作执行期间到达的事件只更新 `requested`（排队一层），不会启动新的动作。
//! 动作的目标状态另外记录，[`StateMachine::reported_state`] 在动作执行期间返回它，
//! 供上层对外报告（例如 "calibrating"）。
//!
//! # 内部回调
//!
//! 转换可以安装一个内部回调。每次查询当前状态时执行一次，返回的事件立即处理。
//! 用于轮询硬件（例如检测运动结束）。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, trace};

use super::event::Event;

/// 状态在 arena 中的索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(usize);

/// 入口回调（同步）
pub type EntryCallback = Arc<dyn Fn() + Send + Sync>;

/// 后台动作，返回完成后要处理的事件
pub type AsyncAction = Arc<dyn Fn() -> Option<Event> + Send + Sync>;

/// 内部回调，返回要处理的事件
pub type InternalCallback = Arc<dyn Fn() -> Option<Event> + Send + Sync>;

#[derive(Clone, Default)]
enum Action {
    #[default]
    None,
    Entry(EntryCallback),
    Async(AsyncAction),
}

/// 一条转换
#[derive(Clone)]
pub struct Transition {
    target: StateId,
    action: Action,
    internal: Option<InternalCallback>,
}

impl Transition {
    pub fn to(target: StateId) -> Self {
        Self {
            target,
            action: Action::None,
            internal: None,
        }
    }

    /// 提交后在调用线程上执行的入口回调
    pub fn with_entry<F>(mut self, entry: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.action = Action::Entry(Arc::new(entry));
        self
    }

    /// 在后台线程执行的动作（完成后才提交目标状态）
    pub fn with_async<F>(mut self, action: F) -> Self
    where
        F: Fn() -> Option<Event> + Send + Sync + 'static,
    {
        self.action = Action::Async(Arc::new(action));
        self
    }

    pub fn with_internal<F>(mut self, internal: F) -> Self
    where
        F: Fn() -> Option<Event> + Send + Sync + 'static,
    {
        self.internal = Some(Arc::new(internal));
        self
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    pub fn is_async(&self) -> bool {
        matches!(self.action, Action::Async(_))
    }
}

struct State {
    name: String,
    transitions: BTreeMap<Event, Transition>,
}

/// 状态机构造器
#[derive(Default)]
pub struct StateMachineBuilder {
    states: Vec<State>,
}

impl StateMachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self, name: impl Into<String>) -> StateId {
        self.states.push(State {
            name: name.into(),
            transitions: BTreeMap::new(),
        });
        StateId(self.states.len() - 1)
    }

    /// 添加转换；同一状态上同一事件的旧转换被替换
    pub fn add_transition(&mut self, from: StateId, event: Event, transition: Transition) -> &mut Self {
        if let Some(state) = self.states.get_mut(from.0) {
            state.transitions.insert(event, transition);
        }
        self
    }

    pub fn build(self, name: impl Into<String>, initial: StateId) -> StateMachine {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        StateMachine {
            name: name.into(),
            states: self.states,
            inner: Mutex::new(Inner {
                current: initial,
                requested: None,
                action_target: None,
                in_flight: false,
                internal: None,
            }),
            completion_tx,
            completion_rx,
        }
    }
}

struct Inner {
    current: StateId,
    requested: Option<StateId>,
    /// 执行中的异步转换的目标，不受排队事件影响
    action_target: Option<StateId>,
    in_flight: bool,
    internal: Option<InternalCallback>,
}

/// 事件驱动状态机
///
/// 内部字段只在状态机锁内修改。后台动作不取该锁，只通过通道投递完成消息。
pub struct StateMachine {
    name: String,
    states: Vec<State>,
    inner: Mutex<Inner>,
    completion_tx: Sender<Option<Event>>,
    completion_rx: Receiver<Option<Event>>,
}

impl StateMachine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state_name(&self, id: StateId) -> &str {
        self.states.get(id.0).map(|s| s.name.as_str()).unwrap_or("unknown")
    }

    /// 处理用户事件
    ///
    /// 返回当前状态的转换表中是否有该事件。没有匹配的转换时状态不变。
    pub fn set_and_process_user_event(&self, event: Event) -> bool {
        let mut inner = self.inner.lock();
        self.process_event(&mut inner, event)
    }

    /// 当前状态
    ///
    /// 先处理已完成的后台动作，再执行当前安装的内部回调。
    pub fn current_state(&self) -> StateId {
        let mut inner = self.inner.lock();
        self.poll(&mut inner);
        inner.current
    }

    pub fn current_state_name(&self) -> &str {
        self.state_name(self.current_state())
    }

    /// 对外报告的状态
    ///
    /// 后台动作执行期间是启动该动作的转换的目标（尚未提交），否则与
    /// [`current_state`](Self::current_state) 相同。
    pub fn reported_state(&self) -> StateId {
        let mut inner = self.inner.lock();
        self.poll(&mut inner);
        inner.action_target.unwrap_or(inner.current)
    }

    pub fn reported_state_name(&self) -> &str {
        self.state_name(self.reported_state())
    }

    /// 等待中的目标状态（只在后台动作执行期间为 `Some`）
    pub fn requested_state(&self) -> Option<StateId> {
        self.inner.lock().requested
    }

    pub fn is_action_in_flight(&self) -> bool {
        self.inner.lock().in_flight
    }

    /// 轮询直到没有后台动作在执行
    pub fn wait_until_settled(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let start = Instant::now();
        loop {
            {
                let mut inner = self.inner.lock();
                self.poll(&mut inner);
                if !inner.in_flight {
                    return true;
                }
            }
            if start.elapsed() > timeout {
                return false;
            }
            thread::sleep(poll_interval);
        }
    }

    fn poll(&self, inner: &mut Inner) {
        while let Ok(follow_up) = self.completion_rx.try_recv() {
            self.move_to_requested_state(inner);
            if let Some(event) = follow_up {
                self.process_event(inner, event);
            }
        }

        if let Some(internal) = inner.internal.clone()
            && let Some(event) = internal()
        {
            self.process_event(inner, event);
        }
    }

    /// 提交后台动作请求的状态
    fn move_to_requested_state(&self, inner: &mut Inner) {
        if let Some(requested) = inner.requested.take() {
            trace!(
                "{}: {} -> {} (action complete)",
                self.name,
                self.state_name(inner.current),
                self.state_name(requested)
            );
            inner.current = requested;
        }
        inner.action_target = None;
        inner.in_flight = false;
        inner.internal = None;
    }

    fn process_event(&self, inner: &mut Inner, event: Event) -> bool {
        let Some(transition) = self
            .states
            .get(inner.current.0)
            .and_then(|state| state.transitions.get(&event))
            .cloned()
        else {
            trace!(
                "{}: event '{}' ignored in state {}",
                self.name,
                event,
                self.state_name(inner.current)
            );
            return false;
        };

        if inner.in_flight {
            trace!(
                "{}: event '{}' deferred, requested state {}",
                self.name,
                event,
                self.state_name(transition.target)
            );
            inner.requested = Some(transition.target);
            return true;
        }

        match transition.action {
            Action::Async(action) => {
                let tx = self.completion_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", self.name, event))
                    .spawn(move || {
                        let follow_up = action();
                        let _ = tx.send(follow_up);
                    });
                if let Err(e) = spawned {
                    error!("{}: failed to start action for '{}': {}", self.name, event, e);
                    return false;
                }

                trace!(
                    "{}: event '{}' started action, requested state {}",
                    self.name,
                    event,
                    self.state_name(transition.target)
                );
                inner.requested = Some(transition.target);
                inner.action_target = Some(transition.target);
                inner.in_flight = true;
                inner.internal = None;
            },
            action => {
                trace!(
                    "{}: {} -> {} on '{}'",
                    self.name,
                    self.state_name(inner.current),
                    self.state_name(transition.target),
                    event
                );
                inner.current = transition.target;
                inner.requested = None;
                inner.internal = transition.internal;
                if let Action::Entry(entry) = action {
                    entry();
                }
            },
        }
        true
    }
}
