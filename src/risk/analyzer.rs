//! Pure classification of an account snapshot into typed risk demands.
//! No I/O: every function here takes a snapshot (plus, where the formula
//! needs it, a price already present on the snapshot) and returns a value.
//! Price lookups that require a live order-book fallback belong to
//! [`crate::remediation`], which does I/O; this module only uses prices
//! already captured on the snapshot.

use rust_decimal::Decimal;

use crate::account::Account;
use crate::constants::{
    ltv_band_for, FUTURES_MARGIN_BAND, FUTURES_USDT_RISKY_THRESHOLD, LOAN_CLASSIFICATION_MIN_DEBT,
    RISKY_LOAN_MIN_ADDITIONAL_USD, VALID_MARGIN_COINS,
};
use crate::risk::demand::{
    AccountAnalysis, FuturesAnalysis, FuturesMarginAnalysis, FuturesUsdtAnalysis, LoanClassification,
    LowLtvLoan, MarginableSpotBal, RiskyLoanDemand,
};
use crate::utils::decimal::floor_dp;

/// Price derived from a futures position the same way remediation derives
/// it: `position_initial_margin * leverage / |position_amt|`. `None` if
/// there is no position (or it's flat) to derive a price from.
fn position_derived_price(account: &Account, symbol: &str) -> Option<Decimal> {
    let pos = account.futures_position(symbol)?;
    if pos.position_amt.is_zero() {
        return None;
    }
    Some(pos.position_initial_margin * pos.leverage / pos.position_amt.abs())
}

/// Classifies every ongoing USDT flexible loan with `total_debt >= 20`
/// into low-LTV (excess collateral, ascending by LTV) and high-LTV (risky,
/// descending by LTV).
pub fn classify_loans(account: &Account) -> LoanClassification {
    let mut low = Vec::new();
    let mut high = Vec::new();

    for order in &account.loan_orders {
        if order.loan_coin != "USDT" || order.total_debt < LOAN_CLASSIFICATION_MIN_DEBT {
            continue;
        }
        let band = ltv_band_for(&order.collateral_coin);

        if order.current_ltv < band.min {
            let redundant_collateral =
                floor_dp(order.collateral_amount * (Decimal::ONE - order.current_ltv / band.mid), 5);
            low.push(LowLtvLoan {
                order: order.clone(),
                current_ltv: order.current_ltv,
                redundant_collateral,
            });
        } else if order.current_ltv > band.max {
            if let Some(demand) = risky_loan_demand(account, order, band.mid) {
                high.push(demand);
            }
        }
    }

    low.sort_by(|a, b| a.current_ltv.cmp(&b.current_ltv));
    high.sort_by(|a, b| b.order.current_ltv.cmp(&a.order.current_ltv));

    LoanClassification { low, high }
}

fn risky_loan_demand(
    account: &Account,
    order: &crate::exchange::CryptoLoanFlexibleOngoingOrder,
    target_ltv: Decimal,
) -> Option<RiskyLoanDemand> {
    let c = order.collateral_amount;
    let l0 = order.current_ltv;
    let d = order.total_debt;
    if c <= Decimal::ZERO || l0 <= Decimal::ZERO {
        return None;
    }

    let collateral_demand = c * (l0 / target_ltv - Decimal::ONE);
    let available = account.available_collateral(&order.collateral_coin);
    let additional_collateral = floor_dp(collateral_demand.min(available) * Decimal::new(9999, 4), 6);

    let implied_price = d / (l0 * c);
    let mut additional_usd = d - (c + additional_collateral) * implied_price * target_ltv;
    if additional_usd < RISKY_LOAN_MIN_ADDITIONAL_USD {
        additional_usd = Decimal::ZERO;
    }

    if additional_collateral <= Decimal::ZERO && additional_usd <= Decimal::ZERO {
        return None;
    }

    Some(RiskyLoanDemand {
        order: order.clone(),
        target_ltv,
        collateral_demand,
        additional_collateral,
        additional_usd,
    })
}

/// risky iff the USDT futures wallet balance is deeply negative. A
/// missing USDT asset in the futures wallet is treated as zero here (the
/// snapshot builder would already have failed if the endpoint errored).
pub fn analyze_futures_usdt(account: &Account) -> FuturesUsdtAnalysis {
    let wallet_balance = account
        .futures_asset("USDT")
        .map(|a| a.wallet_balance)
        .unwrap_or(Decimal::ZERO);
    FuturesUsdtAnalysis {
        wallet_balance,
        risky: wallet_balance < FUTURES_USDT_RISKY_THRESHOLD,
    }
}

/// risky iff `margin_ratio <= 0.25`. When actionable, ranks the
/// marginable-spot whitelist by available margin value (descending).
pub fn analyze_futures_margin(account: &Account) -> FuturesMarginAnalysis {
    let current_ratio = account.margin_ratio();
    let risky = current_ratio <= FUTURES_MARGIN_BAND.min;

    let margin_base = account.futures_margin_base();
    let mut margin_shortfall = (FUTURES_MARGIN_BAND.mid - current_ratio) * margin_base;
    if margin_shortfall <= Decimal::ONE {
        margin_shortfall = Decimal::ZERO;
    }

    let mut marginable_spot_balances: Vec<MarginableSpotBal> = Vec::new();
    let mut total_marginable_value = Decimal::ZERO;
    if risky && margin_shortfall > Decimal::ZERO {
        for mc in VALID_MARGIN_COINS.iter() {
            let qty = account
                .spot_balance(mc.coin)
                .map(|b| b.free)
                .unwrap_or(Decimal::ZERO);
            if qty <= Decimal::ZERO {
                continue;
            }
            let Some(price) = position_derived_price(account, &format!("{}USDT", mc.coin)) else {
                continue;
            };
            let margin_available = qty.min(mc.max_num) * price * mc.pledge_ratio;
            total_marginable_value += margin_available;
            marginable_spot_balances.push(MarginableSpotBal {
                coin: mc.coin.to_string(),
                qty,
                price,
                margin_available,
            });
        }
        marginable_spot_balances.sort_by(|a, b| b.margin_available.cmp(&a.margin_available));
    }

    FuturesMarginAnalysis {
        current_ratio,
        target_ratio: FUTURES_MARGIN_BAND.mid,
        margin_shortfall,
        marginable_spot_balances,
        total_marginable_value,
        risky,
    }
}

pub fn analyze_account(account: &Account) -> AccountAnalysis {
    AccountAnalysis {
        loans: classify_loans(account),
        futures: FuturesAnalysis {
            usdt: analyze_futures_usdt(account),
            margin: analyze_futures_margin(account),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{build_snapshot, FrozenClock};
    use crate::exchange::{FuturesAsset, FuturesPosition, MockExchangeGateway};
    use rust_decimal_macros::dec;

    async fn account_with(
        f: impl FnOnce(&mut crate::exchange::mock::MockState),
    ) -> Account {
        let gateway = MockExchangeGateway::new();
        gateway.with_state_mut(f).await;
        build_snapshot(&gateway, &FrozenClock(0)).await.unwrap()
    }

    #[tokio::test]
    async fn scenario_1_low_ltv_release_quality_collateral() {
        let account = account_with(|s| {
            s.loans.push(crate::exchange::CryptoLoanFlexibleOngoingOrder {
                loan_coin: "USDT".into(),
                collateral_coin: "BTC".into(),
                total_debt: dec!(30000),
                collateral_amount: dec!(1.0),
                current_ltv: dec!(0.50),
            });
        })
        .await;

        let classification = classify_loans(&account);
        assert_eq!(classification.low.len(), 1);
        assert!(classification.high.is_empty());
        let low = &classification.low[0];
        assert_eq!(low.redundant_collateral, dec!(0.16666));
    }

    #[tokio::test]
    async fn scenario_2_high_ltv_additional_usd_rounds_to_zero_under_ten() {
        let account = account_with(|s| {
            s.put_spot("BTC", dec!(0.5));
            s.loans.push(crate::exchange::CryptoLoanFlexibleOngoingOrder {
                loan_coin: "USDT".into(),
                collateral_coin: "BTC".into(),
                total_debt: dec!(42000),
                collateral_amount: dec!(1.0),
                current_ltv: dec!(0.70),
            });
        })
        .await;

        let classification = classify_loans(&account);
        assert!(classification.low.is_empty());
        assert_eq!(classification.high.len(), 1);
        let demand = &classification.high[0];
        assert_eq!(demand.additional_collateral, dec!(0.16665));
        assert_eq!(demand.additional_usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn futures_usdt_risky_below_negative_5000() {
        let account = account_with(|s| {
            s.futures_assets.insert(
                "USDT".to_string(),
                FuturesAsset {
                    asset: "USDT".to_string(),
                    wallet_balance: dec!(-6000),
                    unrealized_profit: dec!(0),
                    margin_balance: dec!(-6000),
                    max_withdraw_amount: dec!(0),
                },
            );
        })
        .await;

        let analysis = analyze_futures_usdt(&account);
        assert!(analysis.risky);
        assert_eq!(analysis.wallet_balance, dec!(-6000));
    }

    #[tokio::test]
    async fn futures_margin_not_risky_above_band_min() {
        let account = account_with(|s| {
            s.futures_positions.insert(
                "BTCUSDT".to_string(),
                FuturesPosition {
                    symbol: "BTCUSDT".to_string(),
                    position_amt: dec!(1),
                    entry_price: dec!(60000),
                    leverage: dec!(1),
                    position_initial_margin: dec!(30000),
                    maint_margin: dec!(1000),
                },
            );
            s.futures_total_margin_balance = dec!(15000);
        })
        .await;

        let analysis = analyze_futures_margin(&account);
        assert_eq!(analysis.current_ratio, dec!(0.5));
        assert!(!analysis.risky);
        assert_eq!(analysis.margin_shortfall, Decimal::ZERO);
    }
}
