//! In-memory [`ExchangeGateway`] used by unit tests and the CLI's dry-run
//! subcommand. Lets the rest of the crate be exercised deterministically
//! without a live account.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::exchange::traits::{ExchangeGateway, GatewayError, GatewayResult};
use crate::exchange::types::*;

#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub spot: HashMap<String, SpotBalance>,
    pub futures_assets: HashMap<String, FuturesAsset>,
    pub futures_positions: HashMap<String, FuturesPosition>,
    pub futures_total_margin_balance: Decimal,
    pub earn: HashMap<String, SimpleEarnFlexiblePosition>,
    pub loans: Vec<CryptoLoanFlexibleOngoingOrder>,
    pub pm_balances: HashMap<String, PmBalance>,
    pub pm_positions: HashMap<String, PmPosition>,
    pub pm_info: PmAccountInformation,
    pub pm_collateral_rates: HashMap<String, Decimal>,
    pub vip_loans: Vec<VipLoanOngoingOrder>,
    pub vip_loan_status: Vec<VipLoanApplicationStatus>,
    pub vip_loan_collateral_assets: Vec<String>,
    pub spot_prices: HashMap<String, Decimal>,
    pub futures_prices: HashMap<String, Decimal>,
    pub cm_prices: HashMap<String, Decimal>,
    pub order_books: HashMap<String, OrderBook>,
    pub adjust_ltv_calls: Vec<(String, String, Decimal, AdjustLtvMode)>,
    pub transfers: Vec<(TransferType, String, Decimal)>,
    pub orders: HashMap<i64, Order>,
    /// When set, the next order submitted on this symbol is rejected instead
    /// of accepted, to exercise the failure/unwind paths.
    pub fail_next_order_on: Option<String>,
    /// When set, the next `wait_order` call on this symbol returns
    /// `OrderWaitAmbiguous` instead of the order's terminal state, to
    /// exercise the ambiguous-fill-state paths.
    pub fail_next_wait_on: Option<String>,
}

impl MockState {
    pub fn put_spot(&mut self, asset: &str, free: Decimal) {
        self.spot.insert(
            asset.to_string(),
            SpotBalance {
                asset: asset.to_string(),
                free,
                locked: Decimal::ZERO,
            },
        );
    }
}

/// A fully in-memory stand-in for the live exchange, backed by a single
/// shared, lock-guarded state blob and an atomic order-id counter.
pub struct MockExchangeGateway {
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicI64,
}

impl Default for MockExchangeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchangeGateway {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicI64::new(1),
        }
    }

    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, MockState> {
        self.state.read().await
    }

    pub async fn with_state_mut<F: FnOnce(&mut MockState)>(&self, f: F) {
        let mut guard = self.state.write().await;
        f(&mut guard);
    }

    fn next_order_id(&self) -> i64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// A small, internally-consistent fixture: one risky USDT/BTC loan, a
    /// slightly-negative-but-not-risky futures wallet, and healthy margin.
    pub fn with_fixture() -> Self {
        let mut state = MockState::default();
        state.put_spot("BTC", dec!(0.5));
        state.put_spot("USDT", dec!(1000));
        state.earn.insert(
            "BTC".to_string(),
            SimpleEarnFlexiblePosition {
                asset: "BTC".to_string(),
                total_amount: dec!(0),
            },
        );
        state.loans.push(CryptoLoanFlexibleOngoingOrder {
            loan_coin: "USDT".to_string(),
            collateral_coin: "BTC".to_string(),
            total_debt: dec!(42000),
            collateral_amount: dec!(1.0),
            current_ltv: dec!(0.70),
        });
        state.futures_assets.insert(
            "USDT".to_string(),
            FuturesAsset {
                asset: "USDT".to_string(),
                wallet_balance: dec!(10000),
                unrealized_profit: dec!(0),
                margin_balance: dec!(10000),
                max_withdraw_amount: dec!(5000),
            },
        );
        state.futures_total_margin_balance = dec!(10000);
        state.spot_prices.insert("BTCUSDT".to_string(), dec!(60000));
        state.futures_prices.insert("BTCUSDT".to_string(), dec!(60000));
        Self {
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockExchangeGateway {
    async fn spot_account(&self) -> GatewayResult<SpotAccount> {
        let state = self.state.read().await;
        Ok(SpotAccount {
            balances: state.spot.values().cloned().collect(),
        })
    }

    async fn futures_account(&self) -> GatewayResult<FuturesAccount> {
        let state = self.state.read().await;
        Ok(FuturesAccount {
            total_margin_balance: state.futures_total_margin_balance,
            assets: state.futures_assets.values().cloned().collect(),
            positions: state.futures_positions.values().cloned().collect(),
        })
    }

    async fn simple_earn_flexible_positions(&self) -> GatewayResult<Vec<SimpleEarnFlexiblePosition>> {
        let state = self.state.read().await;
        Ok(state.earn.values().cloned().collect())
    }

    async fn crypto_loan_flexible_ongoing_orders(
        &self,
    ) -> GatewayResult<Vec<CryptoLoanFlexibleOngoingOrder>> {
        let state = self.state.read().await;
        Ok(state.loans.clone())
    }

    async fn portfolio_margin_account_detail(&self) -> GatewayResult<PmAccountDetail> {
        let state = self.state.read().await;
        Ok(PmAccountDetail {
            balances: state.pm_balances.values().cloned().collect(),
        })
    }

    async fn portfolio_margin_account_information(&self) -> GatewayResult<PmAccountInformation> {
        let state = self.state.read().await;
        Ok(state.pm_info.clone())
    }

    async fn portfolio_margin_positions(&self) -> GatewayResult<Vec<PmPosition>> {
        let state = self.state.read().await;
        Ok(state.pm_positions.values().cloned().collect())
    }

    async fn portfolio_margin_collateral_rates(&self) -> GatewayResult<Vec<PmCollateralRate>> {
        let state = self.state.read().await;
        Ok(state
            .pm_collateral_rates
            .iter()
            .map(|(asset, rate)| PmCollateralRate {
                asset: asset.clone(),
                collateral_rate: *rate,
            })
            .collect())
    }

    async fn vip_loan_ongoing_orders(&self) -> GatewayResult<Vec<VipLoanOngoingOrder>> {
        let state = self.state.read().await;
        Ok(state.vip_loans.clone())
    }

    async fn vip_loan_application_status(&self) -> GatewayResult<Vec<VipLoanApplicationStatus>> {
        let state = self.state.read().await;
        Ok(state.vip_loan_status.clone())
    }

    async fn vip_loan_collateral_asset_list(&self) -> GatewayResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state.vip_loan_collateral_assets.clone())
    }

    async fn spot_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>> {
        let state = self.state.read().await;
        Ok(state
            .spot_prices
            .iter()
            .map(|(symbol, price)| PriceTicker {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect())
    }

    async fn futures_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>> {
        let state = self.state.read().await;
        Ok(state
            .futures_prices
            .iter()
            .map(|(symbol, price)| PriceTicker {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect())
    }

    async fn cm_premium_index(&self) -> GatewayResult<Vec<PriceTicker>> {
        let state = self.state.read().await;
        Ok(state
            .cm_prices
            .iter()
            .map(|(symbol, price)| PriceTicker {
                symbol: symbol.clone(),
                price: *price,
            })
            .collect())
    }

    async fn futures_order_book(&self, symbol: &str, _depth: u32) -> GatewayResult<OrderBook> {
        let state = self.state.read().await;
        state
            .order_books
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::Request {
                endpoint: "futures_order_book".to_string(),
                status: 404,
                body: format!("no book configured for {symbol}"),
            })
    }

    async fn crypto_loan_flexible_adjust_ltv(
        &self,
        loan_coin: &str,
        collateral_coin: &str,
        qty: Decimal,
        mode: AdjustLtvMode,
    ) -> GatewayResult<()> {
        let mut state = self.state.write().await;
        state
            .adjust_ltv_calls
            .push((loan_coin.to_string(), collateral_coin.to_string(), qty, mode));
        Ok(())
    }

    async fn universal_transfer(
        &self,
        transfer_type: TransferType,
        coin: &str,
        qty: Decimal,
    ) -> GatewayResult<TransferResult> {
        let mut state = self.state.write().await;
        state.transfers.push((transfer_type, coin.to_string(), qty));
        Ok(TransferResult {
            transfer_id: state.transfers.len() as i64,
        })
    }

    async fn new_spot_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.submit_order(symbol, side, qty).await
    }

    async fn new_futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.submit_order(symbol, side, qty).await
    }

    async fn new_futures_cm_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.submit_order(symbol, side, qty).await
    }

    async fn wait_order(&self, symbol: &str, order_id: i64) -> GatewayResult<Order> {
        let mut state = self.state.write().await;
        if state.fail_next_wait_on.as_deref() == Some(symbol) {
            state.fail_next_wait_on = None;
            return Err(GatewayError::OrderWaitAmbiguous {
                symbol: symbol.to_string(),
                order_id,
                reason: "simulated ambiguous wait".to_string(),
            });
        }
        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or_else(|| GatewayError::OrderWaitAmbiguous {
                symbol: symbol.to_string(),
                order_id,
                reason: "unknown order id in mock gateway".to_string(),
            })
    }
}

impl MockExchangeGateway {
    async fn submit_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> GatewayResult<Order> {
        let mut state = self.state.write().await;
        if state.fail_next_order_on.as_deref() == Some(symbol) {
            state.fail_next_order_on = None;
            return Err(GatewayError::Request {
                endpoint: "submit_order".to_string(),
                status: 400,
                body: "simulated rejection".to_string(),
            });
        }
        drop(state);

        let order_id = self.next_order_id();
        let order = Order {
            order_id,
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::Filled,
            orig_qty: qty,
            executed_qty: qty,
            avg_price: None,
        };
        self.state.write().await.orders.insert(order_id, order.clone());
        Ok(order)
    }
}
