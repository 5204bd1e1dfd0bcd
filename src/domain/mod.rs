//! Core domain types and logic.
//!
//! Positions flow through [`resample`] and [`aggregate`] into an aligned
//! frame, market data flows through [`market_data`] and [`returns`], and
//! [`attribution`] joins the two. [`job`] wires one complete run.

pub mod aggregate;
pub mod attribution;
pub mod config_validation;
pub mod error;
pub mod job;
pub mod market_data;
pub mod ohlcv;
pub mod output;
pub mod position;
pub mod resample;
pub mod returns;

/// All instants are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
