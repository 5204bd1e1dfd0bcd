//! alphapool-analyzer: aligns model positions onto a common time grid and
//! attributes realized market returns to each model.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
