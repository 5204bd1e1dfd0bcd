//! Port traits: the engine's boundaries to positions, market data, results and configuration.

pub mod config_port;
pub mod market_data_port;
pub mod position_port;
pub mod result_port;
