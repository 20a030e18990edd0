//! Process-wide tracing setup shared by the binaries.

pub mod tracing;

pub use crate::tracing::{DEFAULT_FILTER, init};
