//! Risk analysis: pure functions that turn an account snapshot into
//! typed risk demands, consumed by [`crate::remediation`].

mod analyzer;
mod demand;

pub use analyzer::{analyze_account, analyze_futures_margin, analyze_futures_usdt, classify_loans};
pub use demand::{
    AccountAnalysis, FuturesAnalysis, FuturesMarginAnalysis, FuturesUsdtAnalysis, LoanClassification,
    LowLtvLoan, MarginableSpotBal, RiskyLoanDemand,
};
