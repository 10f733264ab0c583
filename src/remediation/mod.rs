//! Remediation: turns analyzer output into exchange mutations. Split into
//! the classic-account engine, the portfolio-margin engine, and the
//! paired-trade executor the classic engine's Phase 3 policies can reach
//! for when opening a hedge is the right response.

mod engine;
mod paired_trade;
mod pm_engine;

use thiserror::Error;

pub use engine::{AdjustResult, RemediationEngine};
pub use paired_trade::{
    size_position, LegRecord, LegStatus, PairedTradeExecutor, PairedTradeParams, PositionMsg,
    PositionMsger, PositionStatus,
};
pub use pm_engine::PmRemediationEngine;

use crate::exchange::GatewayError;

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("futures exposure is zero, cannot size the hedge leg")]
    FuturesExposureZero,

    #[error("{symbol} order quantity {qty} is at or below its minimum trade quantity")]
    QtyTooSmall { symbol: String, qty: rust_decimal::Decimal },

    #[error("available USDT exhausted with equity_need={equity_need} still outstanding")]
    LowEquityExhausted { equity_need: rust_decimal::Decimal },

    #[error("uni_mmr={uni_mmr} is too low to safely withdraw portfolio-margin collateral")]
    UniMmrTooLowToWithdraw { uni_mmr: rust_decimal::Decimal },

    #[error("paired trade did not reach a safe terminal state: {status}")]
    PairedTradeFailed { status: String },
}
