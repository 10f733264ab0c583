//! Global constants shared by the analyzer and remediation engine. These
//! are deliberately not part of [`crate::config::Config`]: they describe
//! the exchange's own collateral/margin program, not a per-deployment
//! tuning knob.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Collateral coins treated as "quality" for loan-LTV banding. Everything
/// else is "subordinate".
pub const QUALITY_COLLATERAL: [&str; 2] = ["BTC", "ETH"];

pub fn is_quality_collateral(coin: &str) -> bool {
    QUALITY_COLLATERAL.contains(&coin)
}

/// A loan-to-value band: below `min` is excess collateral (release some),
/// above `max` is risky (add collateral / repay), `mid` is the target LTV
/// remediation aims for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LtvBand {
    pub min: Decimal,
    pub mid: Decimal,
    pub max: Decimal,
}

/// Quality and subordinate collateral share the same live band. A disabled
/// alternate subordinate band (0.40/0.45/0.50) exists upstream but is not
/// wired in; see DESIGN.md for the rationale.
pub const QUALITY_LTV_BAND: LtvBand = LtvBand {
    min: dec!(0.55),
    mid: dec!(0.60),
    max: dec!(0.65),
};

pub const SUBORDINATE_LTV_BAND: LtvBand = QUALITY_LTV_BAND;

pub fn ltv_band_for(collateral_coin: &str) -> LtvBand {
    if is_quality_collateral(collateral_coin) {
        QUALITY_LTV_BAND
    } else {
        SUBORDINATE_LTV_BAND
    }
}

/// Futures margin-ratio band.
pub const FUTURES_MARGIN_BAND: LtvBand = LtvBand {
    min: dec!(0.25),
    mid: dec!(0.30),
    max: dec!(0.35),
};

/// USD floor below which a risky loan's computed `additional_usd` demand is
/// rounded to zero rather than reported as actionable. Distinct from
/// [`LOAN_CLASSIFICATION_MIN_DEBT`], which gates which loans get analyzed in
/// the first place.
pub const RISKY_LOAN_MIN_ADDITIONAL_USD: Decimal = dec!(10);

/// `total_debt` floor for `ClassifyLoanOrds`-equivalent low/high-LTV
/// partitioning. Deliberately distinct from [`RISKY_LOAN_MIN_ADDITIONAL_USD`].
pub const LOAN_CLASSIFICATION_MIN_DEBT: Decimal = dec!(20);

pub const FUTURES_USDT_RISKY_THRESHOLD: Decimal = dec!(-5000);

/// One entry in the marginable-spot-balance whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginCoin {
    pub coin: &'static str,
    pub pledge_ratio: Decimal,
    pub max_num: Decimal,
}

pub const VALID_MARGIN_COINS: [MarginCoin; 3] = [
    MarginCoin {
        coin: "BTC",
        pledge_ratio: dec!(0.95),
        max_num: dec!(10),
    },
    MarginCoin {
        coin: "ETH",
        pledge_ratio: dec!(0.95),
        max_num: dec!(100),
    },
    MarginCoin {
        coin: "BNB",
        pledge_ratio: dec!(0.95),
        max_num: dec!(500),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subordinate_band_matches_quality_band() {
        assert_eq!(SUBORDINATE_LTV_BAND, QUALITY_LTV_BAND);
    }

    #[test]
    fn ltv_band_for_picks_quality_for_btc_eth() {
        assert_eq!(ltv_band_for("BTC"), QUALITY_LTV_BAND);
        assert_eq!(ltv_band_for("ETH"), QUALITY_LTV_BAND);
        assert_eq!(ltv_band_for("DOGE"), SUBORDINATE_LTV_BAND);
    }
}
