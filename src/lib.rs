//! # Account Guardian
//!
//! An autonomous risk-management agent for an exchange account that holds
//! spot balances, linear/inverse perpetual futures, a unified
//! portfolio-margin account, and outstanding over-collateralised loans.
//! The agent polls the exchange, classifies loan/futures/portfolio-margin
//! risk, and rebalances collateral and positions to pull the account back
//! toward a configured safe band.
//!
//! ## Architecture
//!
//! - `config`: configuration loading and validation.
//! - `constants`: the exchange's own collateral/margin program (LTV
//!   bands, the marginable-spot whitelist) as fixed constants, not
//!   per-deployment config.
//! - `exchange`: the exchange gateway contract, wire types, a live REST
//!   client, and an in-memory mock.
//! - `account`: immutable, pre-indexed account snapshots (classic and
//!   portfolio-margin variants).
//! - `watcher`: periodic single-flight polling with deadline-bounded
//!   subscriber fan-out.
//! - `risk`: pure snapshot-to-demand classification.
//! - `remediation`: plans and executes transfers, LTV adjustments, and
//!   hedged position trades.
//! - `utils`: shared decimal-arithmetic helpers.

pub mod account;
pub mod config;
pub mod constants;
pub mod exchange;
pub mod remediation;
pub mod risk;
pub mod utils;
pub mod watcher;

pub use config::Config;
