//! Wire types for the exchange's spot, futures, portfolio-margin, and loan
//! endpoints, plus the order and transfer types the core submits.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable `base/quote` pair and its precision/eligibility metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub asset: String,
    pub quote: String,
    pub symbol: String,
    pub qty_precision: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_trade_qty: Decimal,
    pub tradable: bool,
}

impl Pair {
    pub fn new(asset: &str, quote: &str, qty_precision: u32, min_trade_qty: Decimal) -> Self {
        Self {
            asset: asset.to_string(),
            quote: quote.to_string(),
            symbol: format!("{asset}{quote}"),
            qty_precision,
            min_trade_qty,
            tradable: true,
        }
    }
}

// ---------------------------------------------------------------------
// Spot account
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotAccount {
    pub balances: Vec<SpotBalance>,
}

// ---------------------------------------------------------------------
// Classic futures (USD-margined) account
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAsset {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub wallet_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_profit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub margin_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_withdraw_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesPosition {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_initial_margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maint_margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAccount {
    #[serde(with = "rust_decimal::serde::str")]
    pub total_margin_balance: Decimal,
    pub assets: Vec<FuturesAsset>,
    pub positions: Vec<FuturesPosition>,
}

// ---------------------------------------------------------------------
// Simple-earn flexible positions (count as available collateral, "LD"
// balances)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleEarnFlexiblePosition {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
}

// ---------------------------------------------------------------------
// Flexible crypto loans
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoLoanFlexibleOngoingOrder {
    pub loan_coin: String,
    pub collateral_coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_debt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_ltv: Decimal,
}

impl CryptoLoanFlexibleOngoingOrder {
    pub fn pair_key(&self) -> String {
        format!("{}_{}", self.loan_coin, self.collateral_coin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustLtvMode {
    Additional,
    Reduced,
}

// ---------------------------------------------------------------------
// Portfolio margin (PM)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmBalance {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmAccountDetail {
    pub balances: Vec<PmBalance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketType {
    Um,
    Cm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmPosition {
    pub symbol: String,
    pub market_type: MarketType,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_initial_margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maint_margin: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmAccountInformation {
    #[serde(with = "rust_decimal::serde::str")]
    pub uni_mmr: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub account_equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub account_maint_margin: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub virtual_max_withdraw_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PmCollateralRate {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipLoanOngoingOrder {
    pub order_id: i64,
    pub loan_coin: String,
    pub collateral_coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_debt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub collateral_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub current_ltv: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipLoanApplicationStatus {
    pub loan_coin: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_collateral_value_after_haircut: Decimal,
}

// ---------------------------------------------------------------------
// Price data
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTicker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

// ---------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub avg_price: Option<Decimal>,
}

// ---------------------------------------------------------------------
// Universal transfer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    UmfutureMain,
    MainUmfuture,
    MainPortfolioMargin,
    PortfolioMarginMain,
    MainMargin,
    MarginMain,
}

impl TransferType {
    pub fn as_binance_code(self) -> &'static str {
        match self {
            TransferType::UmfutureMain => "UMFUTURE_MAIN",
            TransferType::MainUmfuture => "MAIN_UMFUTURE",
            TransferType::MainPortfolioMargin => "MAIN_PORTFOLIO_MARGIN",
            TransferType::PortfolioMarginMain => "PORTFOLIO_MARGIN_MAIN",
            TransferType::MainMargin => "MAIN_MARGIN",
            TransferType::MarginMain => "MARGIN_MAIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub transfer_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_matches_loan_collateral_pairing() {
        let order = CryptoLoanFlexibleOngoingOrder {
            loan_coin: "USDT".into(),
            collateral_coin: "BTC".into(),
            total_debt: Decimal::new(30000, 0),
            collateral_amount: Decimal::new(1, 0),
            current_ltv: Decimal::new(50, 2),
        };
        assert_eq!(order.pair_key(), "USDT_BTC");
    }

    #[test]
    fn order_status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn order_side_opposite_is_involutive() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite().opposite(), OrderSide::Sell);
    }
}
