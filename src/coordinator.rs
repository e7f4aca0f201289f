//! Shared coordination state crossing the worker boundary: the global pause
//! gate and the single-flight rotation coordinator.

pub mod pause;
pub mod rotation;

pub use pause::PauseGate;
pub use rotation::{IdentityRotator, RotationCoordinator, RotationError, TorControlRotator};
