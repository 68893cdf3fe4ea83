//! PartsFlow server library.
//!
//! HTTP API, persistence and workflow services for parts-issue requests.
//! The binary in `main.rs` wires these together; the library split keeps
//! the pieces testable.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
