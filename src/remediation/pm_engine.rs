//! Portfolio-margin (PM) account remediation: low-UniMMR collateral
//! top-up and high-VIP-loan-LTV collateral withdrawal. Grounded on
//! `VIPPortmarAcctSimple.handleLowMMR`/`handleHighLtv` in the upstream
//! prototype, where the high-LTV handler is a stub filled out here from
//! the system's own worked formulae.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::account::PmAccount;
use crate::config::PmRiskConfig;
use crate::exchange::{ExchangeGateway, TransferType};
use crate::remediation::RemediationError;
use crate::utils::decimal::floor_dp;

const TRANSFER_SLEEP: Duration = Duration::from_secs(1);
const MIN_USDT_VALUE: Decimal = dec!(10);

pub struct PmRemediationEngine {
    gateway: Arc<dyn ExchangeGateway>,
    config: PmRiskConfig,
}

impl PmRemediationEngine {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, config: PmRiskConfig) -> Self {
        Self { gateway, config }
    }

    /// Runs both PM remediation state machines for one tick: low-UniMMR
    /// collateral top-up, then high-VIP-loan-LTV collateral withdrawal.
    /// Errors from each are logged and do not prevent the other from
    /// running, matching the classic engine's per-action error handling.
    #[instrument(skip(self, account))]
    pub async fn handle(&self, account: &PmAccount) {
        if let Err(e) = self.handle_low_uni_mmr(account).await {
            error!(error = %e, "cannot remediate low uni_mmr");
        }
        if let Err(e) = self.handle_high_vip_loan_ltv(account).await {
            error!(error = %e, "cannot remediate high vip-loan LTV");
        }
    }

    /// `equity_need = account_maint_margin * (balanced_uni_mmr - uni_mmr)`.
    /// See DESIGN.md for why this formula was chosen over the alternate
    /// candidate in the source material.
    pub fn equity_need(&self, account: &PmAccount) -> Decimal {
        account.info.account_maint_margin * (self.config.balanced_uni_mmr - account.info.uni_mmr)
    }

    #[instrument(skip(self, account))]
    pub async fn handle_low_uni_mmr(&self, account: &PmAccount) -> Result<(), RemediationError> {
        if account.info.uni_mmr > self.config.min_uni_mmr {
            return Ok(());
        }

        let mut equity_need = self.equity_need(account);
        if equity_need < MIN_USDT_VALUE {
            return Ok(());
        }

        let mut avail_usdt = account.spot_balance("USDT").map(|b| b.free).unwrap_or(Decimal::ZERO);

        for asset in collateral_candidates(account) {
            if equity_need < MIN_USDT_VALUE || avail_usdt <= Decimal::ZERO {
                break;
            }

            let Some((qty, usd_value, rate)) = size_transfer(account, &asset, avail_usdt, equity_need) else {
                continue;
            };

            self.gateway
                .universal_transfer(TransferType::MainPortfolioMargin, &asset, qty)
                .await?;
            info!(asset = %asset, qty = %qty, usd_value = %usd_value, "spot collateral moved to portfolio margin");

            avail_usdt -= usd_value;
            equity_need -= usd_value * rate;
            sleep(TRANSFER_SLEEP).await;
        }

        if equity_need > dec!(1000) && avail_usdt <= Decimal::ZERO {
            error!(equity_need = %equity_need, "exhausted available USDT while UniMMR is still low");
            return Err(RemediationError::LowEquityExhausted { equity_need });
        }
        Ok(())
    }

    /// Only the single-USDT-VIP-loan case is supported, matching the
    /// prototype this is grounded on.
    #[instrument(skip(self, account))]
    pub async fn handle_high_vip_loan_ltv(&self, account: &PmAccount) -> Result<(), RemediationError> {
        let Some(loan) = account.single_vip_loan() else {
            return Ok(());
        };
        if loan.current_ltv <= self.config.max_vip_loan_ltv {
            return Ok(());
        }
        if account.info.uni_mmr < dec!(10) {
            warn!(uni_mmr = %account.info.uni_mmr, "aborting VIP-loan collateral withdrawal, uni_mmr too low");
            return Err(RemediationError::UniMmrTooLowToWithdraw {
                uni_mmr: account.info.uni_mmr,
            });
        }

        let mut need = account.total_collateral_value_after_haircut
            * (loan.current_ltv / self.config.balanced_vip_loan_ltv - Decimal::ONE);
        if need < MIN_USDT_VALUE {
            return Ok(());
        }

        let mut avail_usdt = account.info.virtual_max_withdraw_amount;

        for asset in account.loan_collateral_assets.clone() {
            if need < MIN_USDT_VALUE || avail_usdt <= Decimal::ZERO {
                break;
            }

            let Some(rate) = account.collateral_rate(&asset) else {
                continue;
            };
            if rate <= Decimal::ZERO {
                continue;
            }
            let bal = account.pm_balance(&asset);
            if bal <= Decimal::ZERO {
                continue;
            }
            let Some(price) = account.spot_price(&format!("{asset}USDT")) else {
                continue;
            };
            if price <= Decimal::ZERO {
                continue;
            }

            let qty = floor_dp(bal.min(avail_usdt / price).min(need / (rate * price)), 6);
            let usd_value = qty * price;
            if usd_value < MIN_USDT_VALUE {
                continue;
            }

            self.gateway
                .universal_transfer(TransferType::PortfolioMarginMain, &asset, qty)
                .await?;
            info!(asset = %asset, qty = %qty, usd_value = %usd_value, "portfolio-margin collateral withdrawn to main");

            avail_usdt -= usd_value;
            need -= usd_value * rate;
            sleep(TRANSFER_SLEEP).await;
        }

        Ok(())
    }
}

/// ETH and BTC are pinned first regardless of collateral rate; everything
/// else follows, ranked by descending collateral rate.
fn collateral_candidates(account: &PmAccount) -> Vec<String> {
    let mut pinned = Vec::new();
    for coin in ["ETH", "BTC"] {
        if account.collateral_rate(coin).is_some() {
            pinned.push(coin.to_string());
        }
    }

    let mut rest: Vec<(String, Decimal)> = account
        .spot_balances()
        .filter_map(|b| {
            if pinned.contains(&b.asset) {
                return None;
            }
            account.collateral_rate(&b.asset).map(|rate| (b.asset.clone(), rate))
        })
        .collect();
    rest.sort_by(|a, b| b.1.cmp(&a.1));

    pinned.extend(rest.into_iter().map(|(asset, _)| asset));
    pinned
}

fn size_transfer(
    account: &PmAccount,
    asset: &str,
    avail_usdt: Decimal,
    equity_need: Decimal,
) -> Option<(Decimal, Decimal, Decimal)> {
    let rate = account.collateral_rate(asset)?;
    if rate <= Decimal::ZERO {
        return None;
    }
    let free = account.spot_balance(asset)?.free;
    if free <= Decimal::ZERO {
        return None;
    }
    let price = account.spot_price(&format!("{asset}USDT"))?;
    if price <= Decimal::ZERO {
        return None;
    }

    let qty = floor_dp(free.min(avail_usdt / price).min(equity_need / (rate * price)), 6);
    let usd_value = qty * price;
    if usd_value < MIN_USDT_VALUE {
        return None;
    }
    Some((qty, usd_value, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{build_pm_snapshot, FrozenClock};
    use crate::exchange::{MockExchangeGateway, PmAccountInformation};

    fn test_config() -> PmRiskConfig {
        PmRiskConfig {
            min_uni_mmr: dec!(2.0),
            balanced_uni_mmr: dec!(2.5),
            max_uni_mmr: dec!(3.0),
            min_vip_loan_ltv: dec!(0.55),
            balanced_vip_loan_ltv: dec!(0.60),
            max_vip_loan_ltv: dec!(0.65),
        }
    }

    #[tokio::test]
    async fn healthy_uni_mmr_is_a_no_op() {
        let gateway = Arc::new(MockExchangeGateway::new());
        gateway
            .with_state_mut(|s| {
                s.pm_info = PmAccountInformation {
                    uni_mmr: dec!(5.0),
                    account_equity: dec!(10000),
                    account_maint_margin: dec!(2000),
                    virtual_max_withdraw_amount: dec!(1000),
                };
            })
            .await;
        let account = build_pm_snapshot(gateway.as_ref(), &FrozenClock(0)).await.unwrap();
        let engine = PmRemediationEngine::new(gateway.clone(), test_config());

        engine.handle_low_uni_mmr(&account).await.unwrap();
        assert!(gateway.state().await.transfers.is_empty());
    }

    #[tokio::test]
    async fn low_uni_mmr_transfers_pinned_collateral_first() {
        let gateway = Arc::new(MockExchangeGateway::new());
        gateway
            .with_state_mut(|s| {
                s.pm_info = PmAccountInformation {
                    uni_mmr: dec!(1.5),
                    account_equity: dec!(10000),
                    account_maint_margin: dec!(4000),
                    virtual_max_withdraw_amount: dec!(1000),
                };
                s.put_spot("BTC", dec!(1));
                s.put_spot("USDT", dec!(100000));
                s.pm_collateral_rates.insert("BTC".to_string(), dec!(0.95));
                s.spot_prices.insert("BTCUSDT".to_string(), dec!(60000));
            })
            .await;
        let account = build_pm_snapshot(gateway.as_ref(), &FrozenClock(0)).await.unwrap();
        let engine = PmRemediationEngine::new(gateway.clone(), test_config());

        engine.handle_low_uni_mmr(&account).await.unwrap();
        let transfers = gateway.state().await.transfers.clone();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].1, "BTC");
    }

    #[tokio::test]
    async fn abort_high_ltv_withdrawal_when_uni_mmr_too_low() {
        let gateway = Arc::new(MockExchangeGateway::new());
        gateway
            .with_state_mut(|s| {
                s.pm_info = PmAccountInformation {
                    uni_mmr: dec!(5.0),
                    account_equity: dec!(10000),
                    account_maint_margin: dec!(2000),
                    virtual_max_withdraw_amount: dec!(1000),
                };
                s.vip_loans.push(crate::exchange::VipLoanOngoingOrder {
                    order_id: 1,
                    loan_coin: "USDT".to_string(),
                    collateral_coin: "BTC".to_string(),
                    total_debt: dec!(60000),
                    collateral_amount: dec!(1),
                    current_ltv: dec!(0.70),
                });
            })
            .await;
        let account = build_pm_snapshot(gateway.as_ref(), &FrozenClock(0)).await.unwrap();
        let engine = PmRemediationEngine::new(gateway.clone(), test_config());

        let err = engine.handle_high_vip_loan_ltv(&account).await;
        assert!(matches!(err, Err(RemediationError::UniMmrTooLowToWithdraw { .. })));
    }
}
