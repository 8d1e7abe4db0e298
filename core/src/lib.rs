//! TCP conversation tracker, detection engine, and Chebyshev evaluator.
//!
//! Synchronous by design (see the concurrency note in the workspace design
//! doc): every public entry point here runs to completion on the caller's
//! thread. The binary crate is responsible for scheduling calls into this
//! crate one at a time.

pub mod engine;
pub mod evaluator;
pub mod packet_buffer;
pub mod statemachine;
pub mod wire;

pub use engine::{AnomalyReport, Engine, Mode};
pub use evaluator::Evaluator;
pub use packet_buffer::PacketBuffer;
pub use statemachine::tcp::TcpStateMachine;
pub use statemachine::StateMachine;

/// The default timeslot schedule used when no configuration overrides it.
pub const DEFAULT_TIMESLOT_SCHEDULE_US: [u64; 7] = [1, 10, 100, 1_000, 10_000, 100_000, 1_000_000];

pub const DEFAULT_THRESHOLD: f64 = 0.95;
pub const DEFAULT_LEARN_SECONDS: u64 = 90;
pub const DEFAULT_REORDER_WINDOW: usize = 20;
