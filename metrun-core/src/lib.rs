//! Metrun Core
//!
//! Core types shared by the metrun pipeline controller and its clients.
//!
//! This crate contains:
//! - Domain types: controller/process states, queue items, run history records
//! - Protocol: the line-oriented request/reply format spoken over the control socket
//! - Path helpers for anchoring relative paths

pub mod domain;
pub mod paths;
pub mod protocol;
