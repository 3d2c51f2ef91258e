//! Change event system for real-time stream notifications
//!
//! This module provides:
//! - `MutationEvent` / `WireEvent`: decoded log entries and their client form
//! - `codec`: log entry normalization and SSE framing
//! - `ChangeBus`: handle-based fan-out registry feeding streaming sessions

mod bus;
pub mod codec;
mod types;

pub use bus::{ChangeBus, DeliveryError, SubscriptionId};
pub use codec::{CodecError, CONNECTED_FRAME};
pub use types::{MutationEvent, OperationKind, WireEvent, UNKNOWN_OPERATION};
