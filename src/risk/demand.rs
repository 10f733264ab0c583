//! Typed outputs of the analyzer. Produced by [`crate::risk::analyzer`],
//! consumed by [`crate::remediation`], never mutated afterward.

use rust_decimal::Decimal;

use crate::exchange::CryptoLoanFlexibleOngoingOrder;

/// A loan order flagged as risky (out of its LTV band), with the
/// collateral/USDT additions needed to bring it back to target.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskyLoanDemand {
    pub order: CryptoLoanFlexibleOngoingOrder,
    pub target_ltv: Decimal,
    pub collateral_demand: Decimal,
    pub additional_collateral: Decimal,
    pub additional_usd: Decimal,
}

/// Low-LTV (excess collateral) classification, paired with the amount of
/// collateral this order can safely release.
#[derive(Debug, Clone, PartialEq)]
pub struct LowLtvLoan {
    pub order: CryptoLoanFlexibleOngoingOrder,
    pub current_ltv: Decimal,
    pub redundant_collateral: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoanClassification {
    /// Ascending by LTV.
    pub low: Vec<LowLtvLoan>,
    /// Descending by LTV.
    pub high: Vec<RiskyLoanDemand>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuturesUsdtAnalysis {
    pub wallet_balance: Decimal,
    pub risky: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginableSpotBal {
    pub coin: String,
    pub qty: Decimal,
    pub price: Decimal,
    pub margin_available: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuturesMarginAnalysis {
    pub current_ratio: Decimal,
    pub target_ratio: Decimal,
    pub margin_shortfall: Decimal,
    pub marginable_spot_balances: Vec<MarginableSpotBal>,
    pub total_marginable_value: Decimal,
    pub risky: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuturesAnalysis {
    pub usdt: FuturesUsdtAnalysis,
    pub margin: FuturesMarginAnalysis,
}

impl FuturesAnalysis {
    pub fn risky(&self) -> bool {
        self.usdt.risky || self.margin.risky
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountAnalysis {
    pub loans: LoanClassification,
    pub futures: FuturesAnalysis,
}

impl AccountAnalysis {
    pub fn loan_risky(&self) -> bool {
        !self.loans.high.is_empty()
    }

    pub fn futures_risky(&self) -> bool {
        self.futures.risky()
    }
}
