//! Core application primitives (HTTP surface, wiring, scheduling)

pub mod http;
pub mod runtime;
pub mod scheduler;

pub use http::*;
pub use runtime::*;
pub use scheduler::*;
