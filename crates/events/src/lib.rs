//! Cross-process event relay abstraction.
//!
//! Job-state changes are computed by whichever worker process owns a job,
//! but real-time subscribers may be connected to any API process. The
//! [`MessageBus`] contract decouples the two: every store mutation publishes
//! an [`EventFrame`] onto the bus, and every API process subscribes and
//! re-emits frames to its locally-connected clients whose subscription
//! channel matches.
//!
//! Delivery is best-effort, at-most-once, with no replay buffer: a client
//! connecting after an event fires must fetch current state first.

pub mod bus;
pub mod frame;
pub mod in_memory_bus;

pub use bus::{MessageBus, RelayError, Subscription};
pub use frame::{inspection_channel, EventFrame};
pub use in_memory_bus::InMemoryBus;
