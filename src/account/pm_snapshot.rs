//! The portfolio-margin (PM) account snapshot: cross-asset PM balances and
//! positions, unified maintenance-margin ratio, VIP-loan orders and
//! collateral whitelist, and the price tickers the remediation engine
//! needs to value collateral moves.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::account::{Clock, SystemClock};
use crate::exchange::{
    ExchangeGateway, GatewayError, MarketType, PmAccountInformation, PmPosition, SpotBalance,
    VipLoanOngoingOrder,
};
use crate::watcher::SnapshotBuilder;

#[derive(Debug, Clone)]
pub struct PmAccount {
    pub captured_at_millis: i64,
    pub info: PmAccountInformation,
    pub loan_orders: Vec<VipLoanOngoingOrder>,
    pub loan_collateral_assets: Vec<String>,
    pub total_collateral_value_after_haircut: Decimal,

    spot_by_asset: HashMap<String, SpotBalance>,
    pm_balance_by_asset: HashMap<String, Decimal>,
    pm_pos_by_symbol: HashMap<(String, MarketType), PmPosition>,
    pm_collateral_rate: HashMap<String, Decimal>,
    spot_price_by_symbol: HashMap<String, Decimal>,
    um_price_by_symbol: HashMap<String, Decimal>,
}

impl PmAccount {
    pub fn spot_balance(&self, asset: &str) -> Option<&SpotBalance> {
        self.spot_by_asset.get(asset)
    }

    pub fn spot_balances(&self) -> impl Iterator<Item = &SpotBalance> {
        self.spot_by_asset.values()
    }

    pub fn pm_balance(&self, asset: &str) -> Decimal {
        self.pm_balance_by_asset.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn pm_position(&self, symbol: &str, market: MarketType) -> Option<&PmPosition> {
        self.pm_pos_by_symbol.get(&(symbol.to_string(), market))
    }

    pub fn collateral_rate(&self, asset: &str) -> Option<Decimal> {
        self.pm_collateral_rate.get(asset).copied()
    }

    pub fn spot_price(&self, symbol: &str) -> Option<Decimal> {
        self.spot_price_by_symbol.get(symbol).copied()
    }

    pub fn um_price(&self, symbol: &str) -> Option<Decimal> {
        self.um_price_by_symbol.get(symbol).copied()
    }

    /// Only the single-USDT-VIP-loan case is supported, matching the
    /// upstream prototype this is grounded on.
    pub fn single_vip_loan(&self) -> Option<&VipLoanOngoingOrder> {
        self.loan_orders.first()
    }
}

pub async fn build_pm_snapshot(
    gateway: &dyn ExchangeGateway,
    clock: &dyn Clock,
) -> Result<PmAccount, GatewayError> {
    let spot = gateway.spot_account().await?;
    let detail = gateway.portfolio_margin_account_detail().await?;
    let info = gateway.portfolio_margin_account_information().await?;
    let positions = gateway.portfolio_margin_positions().await?;
    let collateral_rates = gateway.portfolio_margin_collateral_rates().await?;
    let loan_orders = gateway.vip_loan_ongoing_orders().await?;
    let loan_status = gateway.vip_loan_application_status().await?;
    let loan_collateral_assets = gateway.vip_loan_collateral_asset_list().await?;
    let spot_prices = gateway.spot_price_tickers().await?;
    let futures_prices = gateway.futures_price_tickers().await?;

    let spot_by_asset = spot
        .balances
        .into_iter()
        .map(|b| (b.asset.clone(), b))
        .collect();
    let pm_balance_by_asset = detail
        .balances
        .into_iter()
        .map(|b| (b.asset, b.total_wallet_balance))
        .collect();
    let pm_pos_by_symbol = positions
        .into_iter()
        .map(|p| ((p.symbol.clone(), p.market_type), p))
        .collect();
    let pm_collateral_rate = collateral_rates
        .into_iter()
        .map(|r| (r.asset, r.collateral_rate))
        .collect();
    let spot_price_by_symbol = spot_prices.into_iter().map(|t| (t.symbol, t.price)).collect();
    let um_price_by_symbol = futures_prices.into_iter().map(|t| (t.symbol, t.price)).collect();

    let total_collateral_value_after_haircut = loan_status
        .first()
        .map(|s| s.total_collateral_value_after_haircut)
        .unwrap_or(Decimal::ZERO);

    Ok(PmAccount {
        captured_at_millis: clock.now_millis(),
        info,
        loan_orders,
        loan_collateral_assets,
        total_collateral_value_after_haircut,
        spot_by_asset,
        pm_balance_by_asset,
        pm_pos_by_symbol,
        pm_collateral_rate,
        spot_price_by_symbol,
        um_price_by_symbol,
    })
}

pub async fn build_pm_snapshot_arc(
    gateway: &dyn ExchangeGateway,
    clock: &dyn Clock,
) -> Result<Arc<PmAccount>, GatewayError> {
    build_pm_snapshot(gateway, clock).await.map(Arc::new)
}

/// The concrete [`SnapshotBuilder`] the watcher polls in portfolio-margin
/// mode: builds against a shared gateway using the live system clock.
pub struct PmSnapshotBuilder {
    gateway: Arc<dyn ExchangeGateway>,
}

impl PmSnapshotBuilder {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }
}

impl SnapshotBuilder<PmAccount, GatewayError> for PmSnapshotBuilder {
    fn build<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<PmAccount, GatewayError>> + Send + 'a>> {
        Box::pin(async move { build_pm_snapshot(self.gateway.as_ref(), &SystemClock).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::FrozenClock;
    use crate::exchange::MockExchangeGateway;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn missing_lookups_return_none_or_zero() {
        let gateway = MockExchangeGateway::new();
        let account = build_pm_snapshot(&gateway, &FrozenClock(7)).await.unwrap();

        assert_eq!(account.captured_at_millis, 7);
        assert!(account.spot_balance("BTC").is_none());
        assert_eq!(account.pm_balance("BTC"), Decimal::ZERO);
        assert!(account.collateral_rate("BTC").is_none());
        assert!(account.single_vip_loan().is_none());
    }

    #[tokio::test]
    async fn pm_balance_and_collateral_rate_are_indexed() {
        let gateway = MockExchangeGateway::new();
        gateway
            .with_state_mut(|s| {
                s.pm_balances.insert(
                    "ETH".to_string(),
                    crate::exchange::PmBalance {
                        asset: "ETH".to_string(),
                        total_wallet_balance: dec!(2.5),
                    },
                );
                s.pm_collateral_rates.insert("ETH".to_string(), dec!(0.9));
            })
            .await;
        let account = build_pm_snapshot(&gateway, &FrozenClock(0)).await.unwrap();
        assert_eq!(account.pm_balance("ETH"), dec!(2.5));
        assert_eq!(account.collateral_rate("ETH"), Some(dec!(0.9)));
    }
}
