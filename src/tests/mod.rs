//! Tests for top-down chains.
//!
//! ## Test Organization
//!
//! - `common`: Shared stages, errors, the `Probe` full stage and helpers
//! - `basic`: Direct returns, phases, failure classification
//! - `retry`: Catch wrappers calling a retry stage
//! - `compensation`: Finally and completion wrappers, closing hooks
//! - `pause`: Suspend/resume through pool, timer and one-shot redirectors
//! - `strategies`: Timeout races, fan-out joins, configured strategies
//!
//! ## Test Stages
//!
//! Most tests run a `Probe` whose body calls `BodyStage` (returns
//! `"Body value"` or fails with `BodyExc`) and whose wrapper may call
//! `RetryStage` (returns `"Retry value"` or fails with `RetryExc`). Every
//! combination runs once locally and once with the body moved to a pool.

mod common;

mod basic;
mod retry;
