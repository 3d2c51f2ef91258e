//! Client streaming sessions fed by the change bus

mod queue;
mod session;

pub use queue::{FrameQueue, OverflowPolicy, Pushed};
pub use session::{
    Session, SessionConfig, SessionHandle, SessionManager, SessionState, DEFAULT_QUEUE_CAPACITY,
};
