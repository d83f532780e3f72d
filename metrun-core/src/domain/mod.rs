//! Core domain types
//!
//! Shared between the controller (which owns and persists them) and clients
//! (which read them back from protocol replies).

pub mod controller;
pub mod history;
pub mod process;
pub mod queue;
