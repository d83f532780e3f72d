//! Scheduler layer for the controller
//!
//! The run controller actor owns the queue and the in-flight step; everything
//! else talks to it through a [`ControllerHandle`].

mod controller;
mod handle;

pub use controller::RunController;
pub use handle::ControllerHandle;
