//! Testing utilities for brokers and pipelines.
//!
//! This module provides:
//! - A shared call recorder and a concurrency probe for handlers
//! - An `eventually` poller for asynchronous assertions
//! - Test tracing setup

mod harness;
mod recorder;

pub use harness::{eventually, init_test_tracing};
pub use recorder::{ConcurrencyProbe, Entry, ProbeGuard, Recorder};
