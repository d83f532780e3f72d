//! Metrun Controller
//!
//! Long-lived background process that runs pipeline steps one at a time.
//!
//! Architecture:
//! - Configuration: socket, store and timeouts from the environment
//! - Store: sqlite-backed project/step/path history with an in-memory fallback
//! - Supervisor: one child process per step
//! - Scheduler: the run controller actor and its handle
//! - Server: the Unix socket request/reply front end

pub mod config;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod supervisor;

pub use config::ControllerConfig;
pub use scheduler::{ControllerHandle, RunController};
pub use server::ControlServer;
