#![doc = r"Incremental tree reconciler with lane-based cooperative scheduling."]

pub extern crate self as trellis_core;

mod begin_work;
pub mod child_reconciler;
pub mod collections;
mod commit_work;
mod complete_work;
pub mod element;
pub mod fiber;
pub mod hooks;
pub mod host;
pub mod lane;
pub mod platform;
pub mod root;
pub mod scheduler;
mod task_heap;
pub mod update_queue;
mod work_loop;

#[cfg(test)]
#[path = "tests/harness.rs"]
mod test_harness;

pub use element::{
    component, fragment, host, Component, Element, ElementKind, ElementNode, Event, Key,
    Listener, NodeRef, PropValue, Props,
};
pub use fiber::{FiberId, FiberTag, Flags};
pub use hooks::{Cleanup, Deps, Dispatch, Hooks, ReducerDispatch, Transition};
pub use host::{HostConfig, HostId, HostOp, MemoryHost};
pub use lane::{
    event_priority, run_with_priority, start_transition, Lane, LanePriorityTable, Lanes,
};
pub use platform::{Clock, Priority, Scheduler, Task, TaskHandle, TaskOutcome};
pub use root::{Root, RootConfig};
pub use scheduler::{CooperativeScheduler, ManualClock, SchedulerConfig};

use thiserror::Error;

/// Failure reported by a host adapter operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host node {handle} does not exist")]
    MissingNode { handle: String },
    #[error("host node {child} is not a child of {parent}")]
    NotAChild { parent: String, child: String },
    #[error("host operation `{operation}` failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },
}

/// Aborts the render attempt it is raised in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("component `{component}` called {found} hooks but its previous render called {expected}")]
    HookCountMismatch {
        component: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("component `{component}` expected a {expected} hook at position {index} but found {found}")]
    HookKindMismatch {
        component: &'static str,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("component `{component}` failed to render: {message}")]
    Raised {
        component: &'static str,
        message: String,
    },
    #[error(transparent)]
    Host(#[from] HostError),
}

impl RenderError {
    /// Error a component body returns to abort the current render.
    pub fn raised(component: &'static str, message: impl Into<String>) -> Self {
        RenderError::Raised {
            component,
            message: message.into(),
        }
    }

    /// Contract violations are not fixed by retrying.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RenderError::HookCountMismatch { .. } | RenderError::HookKindMismatch { .. }
        )
    }
}

/// Failure surfaced by a root after its recovery policy ran out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RootError {
    #[error("render of {lane:?} failed after {attempts} attempts")]
    RenderFailed {
        lane: Lane,
        attempts: u32,
        #[source]
        source: RenderError,
    },
    #[error("commit of {lane:?} failed")]
    CommitFailed {
        lane: Lane,
        #[source]
        source: HostError,
    },
    #[error("more than {limit} consecutive commits re-scheduled {lane:?}")]
    UpdateDepthExceeded { lane: Lane, limit: u32 },
}
