//! # Ember Common Library
//!
//! Shared infrastructure for the ember engine crates:
//! - Worker thread pool with pollable task handles
//! - Millisecond/frame timing conversions
//! - Logging bootstrap

pub mod logging;
pub mod threadpool;
pub mod timing;

pub use threadpool::{TaskHandle, ThreadPool};
