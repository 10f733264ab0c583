//! The classic (non-portfolio-margin) account snapshot: spot balances,
//! futures wallet/positions, simple-earn flexible positions, and ongoing
//! flexible loan orders, fused into one queryable, pre-indexed record.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::account::{Clock, SystemClock};
use crate::exchange::{
    CryptoLoanFlexibleOngoingOrder, ExchangeGateway, FuturesAsset, FuturesPosition, GatewayError,
    SimpleEarnFlexiblePosition, SpotBalance,
};
use crate::watcher::SnapshotBuilder;

/// A fully-built classic account snapshot. Constructed once via
/// [`build_snapshot`] and shared behind an [`Arc`] from then on; never
/// mutated.
#[derive(Debug, Clone)]
pub struct Account {
    pub captured_at_millis: i64,
    pub total_margin_balance: Decimal,

    spot_by_asset: HashMap<String, SpotBalance>,
    futures_asset_by_asset: HashMap<String, FuturesAsset>,
    futures_pos_by_symbol: HashMap<String, FuturesPosition>,
    earn_by_asset: HashMap<String, SimpleEarnFlexiblePosition>,
    loan_by_pair: HashMap<String, CryptoLoanFlexibleOngoingOrder>,

    pub loan_orders: Vec<CryptoLoanFlexibleOngoingOrder>,
}

impl Account {
    pub fn spot_balance(&self, asset: &str) -> Option<&SpotBalance> {
        self.spot_by_asset.get(asset)
    }

    pub fn futures_asset(&self, asset: &str) -> Option<&FuturesAsset> {
        self.futures_asset_by_asset.get(asset)
    }

    pub fn futures_assets(&self) -> impl Iterator<Item = &FuturesAsset> {
        self.futures_asset_by_asset.values()
    }

    pub fn futures_position(&self, symbol: &str) -> Option<&FuturesPosition> {
        self.futures_pos_by_symbol.get(symbol)
    }

    pub fn earn_position(&self, asset: &str) -> Option<&SimpleEarnFlexiblePosition> {
        self.earn_by_asset.get(asset)
    }

    pub fn loan_order(&self, loan_coin: &str, collateral_coin: &str) -> Option<&CryptoLoanFlexibleOngoingOrder> {
        self.loan_by_pair.get(&format!("{loan_coin}_{collateral_coin}"))
    }

    /// `free` spot balance plus the matching LD (simple-earn-flexible)
    /// balance, which this exchange treats as equally available collateral.
    pub fn available_collateral(&self, asset: &str) -> Decimal {
        let spot_free = self.spot_balance(asset).map(|b| b.free).unwrap_or(Decimal::ZERO);
        let earn_free = self
            .earn_position(asset)
            .map(|p| p.total_amount)
            .unwrap_or(Decimal::ZERO);
        spot_free + earn_free
    }

    /// Σ(position_initial_margin * leverage) across every open futures
    /// position; the shared denominator behind [`Account::margin_ratio`]
    /// and the margin-shortfall sizing in [`crate::risk::analyzer`].
    pub fn futures_margin_base(&self) -> Decimal {
        self.futures_pos_by_symbol
            .values()
            .map(|p| p.position_initial_margin * p.leverage)
            .sum()
    }

    /// `total_margin_balance / Σ(position_initial_margin * leverage)`,
    /// defined as zero when the denominator is non-positive.
    pub fn margin_ratio(&self) -> Decimal {
        let denom = self.futures_margin_base();
        if denom <= Decimal::ZERO {
            Decimal::ZERO
        } else {
            self.total_margin_balance / denom
        }
    }
}

/// Builds one classic snapshot. Aborts on the first endpoint failure;
/// never returns a partially-built snapshot.
pub async fn build_snapshot(
    gateway: &dyn ExchangeGateway,
    clock: &dyn Clock,
) -> Result<Account, GatewayError> {
    let spot = gateway.spot_account().await?;
    let futures = gateway.futures_account().await?;
    let earn = gateway.simple_earn_flexible_positions().await?;
    let loans = gateway.crypto_loan_flexible_ongoing_orders().await?;

    let spot_by_asset = slice_to_map(spot.balances, |b| b.asset.clone());
    let futures_asset_by_asset = slice_to_map(futures.assets, |a| a.asset.clone());
    let futures_pos_by_symbol = slice_to_map(futures.positions, |p| p.symbol.clone());
    let earn_by_asset = slice_to_map(earn, |p| p.asset.clone());
    let loan_by_pair = slice_to_map(loans.clone(), |o| o.pair_key());

    Ok(Account {
        captured_at_millis: clock.now_millis(),
        total_margin_balance: futures.total_margin_balance,
        spot_by_asset,
        futures_asset_by_asset,
        futures_pos_by_symbol,
        earn_by_asset,
        loan_by_pair,
        loan_orders: loans,
    })
}

fn slice_to_map<T, K: std::hash::Hash + Eq>(items: Vec<T>, key: impl Fn(&T) -> K) -> HashMap<K, T> {
    items.into_iter().map(|item| (key(&item), item)).collect()
}

/// Build and immediately wrap in an `Arc`, the shape callers actually want
/// once the snapshot is handed to subscribers.
pub async fn build_snapshot_arc(
    gateway: &dyn ExchangeGateway,
    clock: &dyn Clock,
) -> Result<Arc<Account>, GatewayError> {
    build_snapshot(gateway, clock).await.map(Arc::new)
}

/// The concrete [`SnapshotBuilder`] the watcher polls in classic mode:
/// builds against a shared gateway using the live system clock.
pub struct ClassicSnapshotBuilder {
    gateway: Arc<dyn ExchangeGateway>,
}

impl ClassicSnapshotBuilder {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }
}

impl SnapshotBuilder<Account, GatewayError> for ClassicSnapshotBuilder {
    fn build<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Account, GatewayError>> + Send + 'a>> {
        Box::pin(async move { build_snapshot(self.gateway.as_ref(), &SystemClock).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FrozenClock;
    use crate::exchange::MockExchangeGateway;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn missing_keys_return_none_not_panic() {
        let gateway = MockExchangeGateway::new();
        let account = build_snapshot(&gateway, &FrozenClock(1000)).await.unwrap();

        assert!(account.spot_balance("ZZZ").is_none());
        assert!(account.futures_asset("ZZZ").is_none());
        assert!(account.loan_order("USDT", "ZZZ").is_none());
    }

    #[tokio::test]
    async fn present_keys_are_found_and_timestamp_is_frozen() {
        let gateway = MockExchangeGateway::with_fixture();
        let account = build_snapshot(&gateway, &FrozenClock(42)).await.unwrap();

        assert_eq!(account.captured_at_millis, 42);
        assert!(account.spot_balance("BTC").is_some());
        assert!(account.loan_order("USDT", "BTC").is_some());
        assert_eq!(account.loan_orders.len(), 1);
    }

    #[tokio::test]
    async fn margin_ratio_is_zero_with_no_positions() {
        let gateway = MockExchangeGateway::with_fixture();
        let account = build_snapshot(&gateway, &FrozenClock(0)).await.unwrap();
        assert_eq!(account.margin_ratio(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn available_collateral_sums_spot_and_earn() {
        let gateway = MockExchangeGateway::new();
        gateway
            .with_state_mut(|s| {
                s.put_spot("BTC", dec!(0.2));
                s.earn.insert(
                    "BTC".to_string(),
                    SimpleEarnFlexiblePosition {
                        asset: "BTC".to_string(),
                        total_amount: dec!(0.1),
                    },
                );
            })
            .await;
        let account = build_snapshot(&gateway, &FrozenClock(0)).await.unwrap();
        assert_eq!(account.available_collateral("BTC"), dec!(0.3));
    }
}
