//! Deterministic, pure logic shared by the supervisor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod dispatch;
pub mod events;
pub mod intent;
pub mod policy;
pub mod types;
