//! Synchronization primitives usable alongside the pool.

pub mod gate;

pub use gate::{GateState, StageGate};
