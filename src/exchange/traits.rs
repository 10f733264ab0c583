//! The exchange gateway contract this crate depends on.
//!
//! Everything downstream of this trait (snapshots, the watcher, the
//! analyzer, remediation) is written against `ExchangeGateway` only, so a
//! live REST client and an in-memory mock are equally valid backends.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::types::*;

/// Errors an `ExchangeGateway` call can surface. Matches the taxonomy this
/// crate applies uniformly: transport/request failures are distinct from
/// the semantic absence of data (which callers see as `Option::None`, never
/// as an error).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request to {endpoint} failed with status {status}: {body}")]
    Request {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("waiting for order {order_id} on {symbol} failed: {reason}")]
    OrderWaitAmbiguous {
        symbol: String,
        order_id: i64,
        reason: String,
    },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Every query and mutation the core issues against the exchange.
///
/// Object-safe (`Send + Sync`) so it can be shared behind an `Arc<dyn
/// ExchangeGateway>` across the watcher, the analyzer's callers, and the
/// remediation engine.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    // ---- classic account ----
    async fn spot_account(&self) -> GatewayResult<SpotAccount>;
    async fn futures_account(&self) -> GatewayResult<FuturesAccount>;
    async fn simple_earn_flexible_positions(&self) -> GatewayResult<Vec<SimpleEarnFlexiblePosition>>;
    async fn crypto_loan_flexible_ongoing_orders(
        &self,
    ) -> GatewayResult<Vec<CryptoLoanFlexibleOngoingOrder>>;

    // ---- portfolio margin account ----
    async fn portfolio_margin_account_detail(&self) -> GatewayResult<PmAccountDetail>;
    async fn portfolio_margin_account_information(&self) -> GatewayResult<PmAccountInformation>;
    async fn portfolio_margin_positions(&self) -> GatewayResult<Vec<PmPosition>>;
    async fn portfolio_margin_collateral_rates(&self) -> GatewayResult<Vec<PmCollateralRate>>;
    async fn vip_loan_ongoing_orders(&self) -> GatewayResult<Vec<VipLoanOngoingOrder>>;
    async fn vip_loan_application_status(&self) -> GatewayResult<Vec<VipLoanApplicationStatus>>;
    async fn vip_loan_collateral_asset_list(&self) -> GatewayResult<Vec<String>>;

    // ---- prices ----
    async fn spot_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>>;
    async fn futures_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>>;
    async fn cm_premium_index(&self) -> GatewayResult<Vec<PriceTicker>>;
    async fn futures_order_book(&self, symbol: &str, depth: u32) -> GatewayResult<OrderBook>;

    // ---- mutations ----
    async fn crypto_loan_flexible_adjust_ltv(
        &self,
        loan_coin: &str,
        collateral_coin: &str,
        qty: Decimal,
        mode: AdjustLtvMode,
    ) -> GatewayResult<()>;

    async fn universal_transfer(
        &self,
        transfer_type: TransferType,
        coin: &str,
        qty: Decimal,
    ) -> GatewayResult<TransferResult>;

    // ---- order submission ----
    async fn new_spot_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order>;

    async fn new_futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order>;

    async fn new_futures_cm_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order>;

    /// Blocks until `order` reaches a terminal status, returning the final
    /// snapshot, or an `OrderWaitAmbiguous` error if the wait itself failed
    /// (the fill state is then unknown, not "not filled").
    async fn wait_order(&self, symbol: &str, order_id: i64) -> GatewayResult<Order>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_type_codes_match_binance_naming() {
        assert_eq!(TransferType::UmfutureMain.as_binance_code(), "UMFUTURE_MAIN");
        assert_eq!(
            TransferType::MainPortfolioMargin.as_binance_code(),
            "MAIN_PORTFOLIO_MARGIN"
        );
    }
}
