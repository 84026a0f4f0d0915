mod bus;
mod event;

pub use bus::EventBus;
pub use event::{
    EventKind, ExecutionEvent, ExecutionId, NodeErrorRecord, Progress, RunState,
};
