//! Work task domain: lifecycle, dependency graph, weather gate, comments.
//!
//! Pure, deterministic domain logic (no IO, no HTTP, no storage). Ledger side
//! effects of a transition are reported to the caller, never performed here.

pub mod comment;
pub mod dependency;
pub mod lifecycle;
pub mod task;
pub mod weather;

pub use comment::TaskComment;
pub use dependency::{DependencyEdge, DependencyGraph, NewDependency, DEFAULT_DEPENDENCY_KIND};
pub use lifecycle::Transition;
pub use task::{NewTask, Task, TaskPatch, TaskPriority, TaskRecord, TaskStatus};
pub use weather::{WeatherConditions, WeatherConstraints, WeatherVerdict, ViolatedConstraint};
