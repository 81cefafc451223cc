//! Dependency tracking and time-grant computation.

pub mod coordinator;
pub mod dependency;

pub use coordinator::{CoordinatorKind, CoordinatorOutput, TimeCoordinator};
pub use dependency::{DependencyInfo, TimeDependencies, TimeState};
