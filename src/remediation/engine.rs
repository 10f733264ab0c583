//! Classic-account remediation: low-LTV collateral release, futures
//! collateral repatriation, and risk-class dispatch. Grounded on
//! `Main.handle`/`handleRedundant`/`handleAnalysis` in the upstream
//! prototype this crate generalizes.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::account::Account;
use crate::exchange::{AdjustLtvMode, ExchangeGateway};
use crate::remediation::RemediationError;
use crate::risk::{analyze_account, AccountAnalysis, LowLtvLoan};
use crate::utils::decimal::floor_dp;
use crate::watcher::{Refresh, Watcher};

const RATE_LIMIT_SLEEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustResult {
    pub loan_coin: String,
    pub collateral_coin: String,
    pub qty: Decimal,
}

/// Drives Phase 1 through Phase 3 for the classic (non-PM) account. A
/// `handling` try-lock mirrors the upstream `muxHandling`: an overlapping
/// tick is dropped, not queued.
pub struct RemediationEngine {
    gateway: Arc<dyn ExchangeGateway>,
    watcher: Arc<Watcher<Account, crate::exchange::GatewayError>>,
    handling: AsyncMutex<()>,
}

impl RemediationEngine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        watcher: Arc<Watcher<Account, crate::exchange::GatewayError>>,
    ) -> Self {
        Self {
            gateway,
            watcher,
            handling: AsyncMutex::new(()),
        }
    }

    /// Entry point fed by the watcher's fan-out. Drops this tick if a
    /// remediation pass is already in flight.
    #[instrument(skip(self, account))]
    pub async fn handle(&self, account: Arc<Account>) {
        let Ok(_guard) = self.handling.try_lock() else {
            info!("remediation already in progress, dropping this tick");
            return;
        };

        self.handle_redundant(&account).await;

        let latest = self.watcher.peek().await.unwrap_or(account);
        let analysis = analyze_account(&latest);
        self.handle_analysis(&latest, &analysis).await;
    }

    async fn handle_redundant(&self, account: &Account) {
        self.handle_low_ltv_orders(account).await;
        self.adjust_low_risk_future_account(account).await;
    }

    #[instrument(skip(self, account))]
    async fn handle_low_ltv_orders(&self, account: &Account) {
        let classification = crate::risk::classify_loans(account);
        if classification.low.is_empty() {
            return;
        }

        let results = self.adjust_low_ltv_orders(&classification.low).await;
        for result in &results {
            match result {
                Ok(adjusted) => info!(?adjusted, "low-LTV order adjusted"),
                Err(e) => error!(error = %e, "cannot adjust low-LTV order"),
            }
        }

        match self.watcher.update().await {
            Refresh::Err(e) => error!(error = ?e, "cannot refresh account after low-LTV release"),
            Refresh::Updating => {
                warn!("account is updating, retrying refresh");
                sleep(Duration::from_secs(1)).await;
                if let Refresh::Err(e) = self.watcher.update().await {
                    error!(error = ?e, "cannot refresh account after low-LTV release");
                }
            }
            Refresh::Ok(_) => {}
        }
    }

    /// Phase 1. One `Result` per input order, in input order — recovers
    /// the upstream's `(results, errs)` pair via `partition` in tests.
    pub async fn adjust_low_ltv_orders(
        &self,
        orders: &[LowLtvLoan],
    ) -> Vec<Result<AdjustResult, RemediationError>> {
        let mut results = Vec::with_capacity(orders.len());
        for (i, low) in orders.iter().enumerate() {
            let order = &low.order;
            let qty = low.redundant_collateral;
            let outcome = self
                .gateway
                .crypto_loan_flexible_adjust_ltv(&order.loan_coin, &order.collateral_coin, qty, AdjustLtvMode::Reduced)
                .await
                .map(|_| AdjustResult {
                    loan_coin: order.loan_coin.clone(),
                    collateral_coin: order.collateral_coin.clone(),
                    qty,
                })
                .map_err(RemediationError::from);
            results.push(outcome);

            if i != orders.len() - 1 {
                sleep(RATE_LIMIT_SLEEP).await;
            }
        }
        results
    }

    /// Phase 2. Opportunistic futures-to-spot collateral repatriation,
    /// executed only when the caller isn't already in a futures-margin
    /// shortfall (Phase 3 handles that case by raising, not withdrawing).
    #[instrument(skip(self, account))]
    async fn adjust_low_risk_future_account(&self, account: &Account) {
        let margin_base = account.futures_margin_base();
        if margin_base <= Decimal::ZERO {
            info!("futures total position is 0, nothing to repatriate");
            return;
        }

        let current_ratio = account.margin_ratio();
        let margin_gap = margin_base * (current_ratio - crate::constants::FUTURES_MARGIN_BAND.mid).abs();

        let mut remaining_gap = margin_gap;
        let mut current = account.clone();

        for coin in candidate_withdraw_coins(&current) {
            let Some(asset) = current.futures_asset(&coin) else {
                continue;
            };
            let (withdrawn_value, withdrawn_qty) = match self.reduce_futures_collateral(&current, asset, remaining_gap).await {
                Ok(v) => v,
                Err(e) => {
                    error!(coin = %coin, error = %e, "cannot reduce futures collateral");
                    continue;
                }
            };

            info!(coin = %coin, qty = %withdrawn_qty, value = %withdrawn_value, "futures collateral withdrawn");
            remaining_gap -= withdrawn_value;
            if remaining_gap <= dec!(10) {
                break;
            }

            if withdrawn_qty > Decimal::ZERO {
                sleep(RATE_LIMIT_SLEEP).await;
                match self.watcher.update().await {
                    Refresh::Ok(fresh) => current = (*fresh).clone(),
                    Refresh::Err(e) => {
                        error!(error = ?e, "cannot refresh account mid-repatriation");
                        continue;
                    }
                    Refresh::Updating => continue,
                }
            }
        }

        if remaining_gap > dec!(10) {
            error!(remaining_gap = %remaining_gap, "futures collateral remaining value > 10 after repatriation pass");
        }
    }

    async fn reduce_futures_collateral(
        &self,
        account: &Account,
        asset: &crate::exchange::FuturesAsset,
        should_withdraw_value: Decimal,
    ) -> Result<(Decimal, Decimal), RemediationError> {
        let max_withdraw = asset.max_withdraw_amount;
        if max_withdraw <= Decimal::ZERO {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }

        let price = self.futures_price(account, &asset.asset).await?;
        if price <= Decimal::ZERO {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }

        let withdraw_qty = floor_dp(max_withdraw.min(should_withdraw_value / price) * dec!(0.99), 5);
        if withdraw_qty <= Decimal::ZERO {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }

        self.gateway
            .universal_transfer(crate::exchange::TransferType::UmfutureMain, &asset.asset, withdraw_qty)
            .await?;

        Ok((withdraw_qty * price, withdraw_qty))
    }

    /// USDT is always 1:1; other coins price from their matching futures
    /// position, falling back to the order book's top bid.
    async fn futures_price(&self, account: &Account, coin: &str) -> Result<Decimal, RemediationError> {
        if coin == "USDT" {
            return Ok(Decimal::ONE);
        }
        let symbol = format!("{coin}USDT");
        if let Some(pos) = account.futures_position(&symbol) {
            if !pos.position_amt.is_zero() {
                return Ok(pos.position_initial_margin * pos.leverage / pos.position_amt.abs());
            }
        }
        let book = self.gateway.futures_order_book(&symbol, 5).await?;
        Ok(book.bids.first().map(|l| l.price).unwrap_or(Decimal::ZERO))
    }

    #[instrument(skip(self, account, analysis))]
    async fn handle_analysis(&self, account: &Account, analysis: &AccountAnalysis) {
        let loan_risky = analysis.loan_risky();
        let futures_risky = analysis.futures_risky();
        match (loan_risky, futures_risky) {
            (true, true) => self.handle_both_risky(account, analysis).await,
            (true, false) => self.handle_loan_risky(account, analysis).await,
            (false, true) => self.handle_futures_risky(account, analysis).await,
            (false, false) => {}
        }
    }

    /// Loan-risky alone: re-run the redundant-release passes (in case the
    /// snapshot changed since Phase 1/2) and raise for operator attention.
    async fn handle_loan_risky(&self, account: &Account, analysis: &AccountAnalysis) {
        warn!(risky_loans = analysis.loans.high.len(), "loan risk detected, re-running redundant release");
        self.handle_redundant(account).await;
    }

    /// Futures-risky alone: nothing left to opportunistically repatriate
    /// (Phase 2 already ran); raise an immediate margin-call alert.
    async fn handle_futures_risky(&self, _account: &Account, analysis: &AccountAnalysis) {
        error!(
            margin_ratio = %analysis.futures.margin.current_ratio,
            shortfall = %analysis.futures.margin.margin_shortfall,
            "futures margin ratio below alert threshold, margin call"
        );
    }

    /// Both risky: do both, and flag the account for operator attention —
    /// this combination is the one the upstream prototype left as a bare
    /// `// TODO`.
    async fn handle_both_risky(&self, account: &Account, analysis: &AccountAnalysis) {
        error!("both loan and futures risk detected, account needs operator attention");
        self.handle_loan_risky(account, analysis).await;
        self.handle_futures_risky(account, analysis).await;
    }
}

/// USDT goes first if its max-withdraw exceeds 1 (matching the upstream
/// "here must be 0, because is asset amount, not USDT" ordering), then
/// every other asset with a positive max-withdraw.
fn candidate_withdraw_coins(account: &Account) -> Vec<String> {
    let mut usdt_first = false;
    let mut rest = Vec::new();
    for asset in account.futures_assets() {
        if asset.max_withdraw_amount <= Decimal::ZERO {
            continue;
        }
        if asset.asset == "USDT" {
            usdt_first = asset.max_withdraw_amount > Decimal::ONE;
        } else {
            rest.push(asset.asset.clone());
        }
    }
    if usdt_first {
        let mut coins = vec!["USDT".to_string()];
        coins.extend(rest);
        coins
    } else {
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{build_snapshot, FrozenClock};
    use crate::exchange::MockExchangeGateway;
    use crate::risk::LowLtvLoan;
    use crate::watcher::SnapshotBuilder;
    use rust_decimal_macros::dec;
    use std::future::Future;
    use std::pin::Pin;

    struct FixtureBuilder {
        gateway: Arc<MockExchangeGateway>,
    }

    impl SnapshotBuilder<Account, crate::exchange::GatewayError> for FixtureBuilder {
        fn build<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Account, crate::exchange::GatewayError>> + Send + 'a>> {
            Box::pin(async move { build_snapshot(self.gateway.as_ref(), &FrozenClock(0)).await })
        }
    }

    fn test_engine(gateway: Arc<MockExchangeGateway>) -> RemediationEngine {
        let watcher = Arc::new(Watcher::new(Arc::new(FixtureBuilder { gateway: gateway.clone() })));
        RemediationEngine::new(gateway, watcher)
    }

    #[tokio::test]
    async fn adjust_low_ltv_orders_returns_one_result_per_order() {
        let gateway = Arc::new(MockExchangeGateway::new());
        let engine = test_engine(gateway.clone());

        let orders = vec![
            LowLtvLoan {
                order: crate::exchange::CryptoLoanFlexibleOngoingOrder {
                    loan_coin: "USDT".into(),
                    collateral_coin: "BTC".into(),
                    total_debt: dec!(30000),
                    collateral_amount: dec!(1.0),
                    current_ltv: dec!(0.50),
                },
                current_ltv: dec!(0.50),
                redundant_collateral: dec!(0.16666),
            },
            LowLtvLoan {
                order: crate::exchange::CryptoLoanFlexibleOngoingOrder {
                    loan_coin: "USDT".into(),
                    collateral_coin: "ETH".into(),
                    total_debt: dec!(3000),
                    collateral_amount: dec!(2.0),
                    current_ltv: dec!(0.45),
                },
                current_ltv: dec!(0.45),
                redundant_collateral: dec!(0.5),
            },
        ];

        let results = engine.adjust_low_ltv_orders(&orders).await;
        assert_eq!(results.len(), 2);
        let (ok, err): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        assert_eq!(ok.len(), 2);
        assert!(err.is_empty());

        let calls = gateway.state().await.adjust_ltv_calls.clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "USDT");
        assert_eq!(calls[0].1, "BTC");
    }

    #[tokio::test]
    async fn zero_futures_position_skips_repatriation() {
        let gateway = Arc::new(MockExchangeGateway::new());
        let account = build_snapshot(gateway.as_ref(), &FrozenClock(0)).await.unwrap();
        let engine = test_engine(gateway.clone());

        engine.adjust_low_risk_future_account(&account).await;
        assert!(gateway.state().await.transfers.is_empty());
    }
}
