//! 状态机引擎

mod event;
mod machine;

pub use event::Event;
pub use machine::{
    AsyncAction, EntryCallback, InternalCallback, StateId, StateMachine, StateMachineBuilder,
    Transition,
};
