//! Exchange integration: wire types, the gateway contract, a live REST
//! client, and an in-memory mock for tests and dry-runs.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::BinanceClient;
pub use mock::MockExchangeGateway;
pub use traits::{ExchangeGateway, GatewayError, GatewayResult};
pub use types::*;
