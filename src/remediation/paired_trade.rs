//! The paired-trade executor: a two-leg (futures-then-spot) market-order
//! state machine that automatically reverses the futures leg if the spot
//! hedge fails to submit. Grounded on
//! `VIPPortmarPosTrader`/`VIPPortmarMarketTraderFunc` in the upstream
//! prototype (state shape, status-precedence derivation, `SendMsg`-under-
//! lock) and `NewPos`/`NewPosSlowly` (sizing, slicing).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::exchange::{ExchangeGateway, Order, OrderSide, Pair};
use crate::remediation::RemediationError;
use crate::utils::decimal::floor_dp;

const SLICE_SLEEP: Duration = Duration::from_secs(1);
const MSG_BUFFER: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegStatus {
    #[default]
    None,
    Opening,
    Opened,
    Failed,
    WaiterFailed,
}

/// One leg's submission/wait outcome. `order` is the last snapshot seen,
/// even on `WaiterFailed` — the fill state is unknown, not absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegRecord {
    pub order: Option<Order>,
    pub status: LegStatus,
    pub err: Option<String>,
}

impl LegRecord {
    fn opening() -> Self {
        Self {
            status: LegStatus::Opening,
            ..Default::default()
        }
    }
}

/// Overall position status, derived from the three legs with the
/// precedence `re_fu > sp > fu` — matches the upstream `Status()` method,
/// which checks the reverse-futures leg first since it's the most recent
/// transition once it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    New,
    FuOpening,
    FuOpened,
    FuFailed,
    FuWaiterFailed,
    SpOpening,
    SpOpened,
    SpFailed,
    SpWaiterFailed,
    ReFuOpening,
    ReFuOpened,
    ReFuFailed,
    ReFuWaiterFailed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::New => "NEW",
            PositionStatus::FuOpening => "FU_OPENING",
            PositionStatus::FuOpened => "FU_OPENED",
            PositionStatus::FuFailed => "FU_FAILED",
            PositionStatus::FuWaiterFailed => "FU_WAITER_FAILED",
            PositionStatus::SpOpening => "SP_OPENING",
            PositionStatus::SpOpened => "SP_OPENED",
            PositionStatus::SpFailed => "SP_FAILED",
            PositionStatus::SpWaiterFailed => "SP_WAITER_FAILED",
            PositionStatus::ReFuOpening => "RE_FU_OPENING",
            PositionStatus::ReFuOpened => "RE_FU_OPENED",
            PositionStatus::ReFuFailed => "RE_FU_FAILED",
            PositionStatus::ReFuWaiterFailed => "RE_FU_WAITER_FAILED",
        };
        f.write_str(s)
    }
}

/// One state transition. Carries the latest leg records cumulatively, so
/// a subscriber reading any single message sees the full history so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionMsg {
    pub fu: LegRecord,
    pub sp: LegRecord,
    pub re_fu: LegRecord,
    pub errs: Vec<String>,
}

impl PositionMsg {
    pub fn status(&self) -> PositionStatus {
        match self.re_fu.status {
            LegStatus::Opened => return PositionStatus::ReFuOpened,
            LegStatus::Opening => return PositionStatus::ReFuOpening,
            LegStatus::Failed => return PositionStatus::ReFuFailed,
            LegStatus::WaiterFailed => return PositionStatus::ReFuWaiterFailed,
            LegStatus::None => {}
        }
        match self.sp.status {
            LegStatus::Opened => return PositionStatus::SpOpened,
            LegStatus::Opening => return PositionStatus::SpOpening,
            LegStatus::Failed => return PositionStatus::SpFailed,
            LegStatus::WaiterFailed => return PositionStatus::SpWaiterFailed,
            LegStatus::None => {}
        }
        match self.fu.status {
            LegStatus::Opened => return PositionStatus::FuOpened,
            LegStatus::Opening => return PositionStatus::FuOpening,
            LegStatus::Failed => return PositionStatus::FuFailed,
            LegStatus::WaiterFailed => return PositionStatus::FuWaiterFailed,
            LegStatus::None => {}
        }
        PositionStatus::New
    }
}

/// Publishes state transitions under a single critical section: a write
/// to `latest` and the matching channel send happen together, so a reader
/// calling `latest_msg()` never observes a state older than the most
/// recently delivered message.
#[derive(Clone)]
pub struct PositionMsger {
    latest: Arc<RwLock<PositionMsg>>,
    tx: mpsc::Sender<PositionMsg>,
}

impl PositionMsger {
    fn new() -> (Self, mpsc::Receiver<PositionMsg>) {
        let (tx, rx) = mpsc::channel(MSG_BUFFER);
        (
            Self {
                latest: Arc::new(RwLock::new(PositionMsg::default())),
                tx,
            },
            rx,
        )
    }

    async fn send_msg(&self, msg: PositionMsg) {
        let guard = self.latest.write().await;
        let mut guard = guard;
        *guard = msg.clone();
        let _ = self.tx.send(msg).await;
    }

    pub async fn latest_msg(&self) -> PositionMsg {
        self.latest.read().await.clone()
    }

    pub async fn status(&self) -> PositionStatus {
        self.latest.read().await.status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegMarket {
    Spot,
    FuturesUm,
    FuturesCm,
}

/// Parameters for one hedged position attempt. `sp_qty`/`fu_qty` are
/// already sized (see [`size_position`]) by the time they reach the
/// executor.
#[derive(Debug, Clone)]
pub struct PairedTradeParams {
    pub sp_symbol: String,
    pub fu_symbol: String,
    pub sp_side: OrderSide,
    pub is_cm: bool,
    pub sp_qty: Decimal,
    pub fu_qty: Decimal,
}

/// `fuQty = spQty / fuExposure`, both floored to the coarser of the two
/// pairs' quantity precisions. Rejected if either side is at or below its
/// own minimum trade quantity.
pub fn size_position(
    sp_qty: Decimal,
    fu_exposure: Decimal,
    sp_pair: &Pair,
    fu_pair: &Pair,
) -> Result<(Decimal, Decimal), RemediationError> {
    if fu_exposure.is_zero() {
        return Err(RemediationError::FuturesExposureZero);
    }

    let precision = sp_pair.qty_precision.min(fu_pair.qty_precision);
    let sp_qty = floor_dp(sp_qty, precision);
    let fu_qty = floor_dp(sp_qty / fu_exposure, precision);

    if sp_qty <= sp_pair.min_trade_qty {
        return Err(RemediationError::QtyTooSmall {
            symbol: sp_pair.symbol.clone(),
            qty: sp_qty,
        });
    }
    if fu_qty <= fu_pair.min_trade_qty {
        return Err(RemediationError::QtyTooSmall {
            symbol: fu_pair.symbol.clone(),
            qty: fu_qty,
        });
    }

    Ok((sp_qty, fu_qty))
}

/// Two-leg (futures-then-spot) market-order state machine with automatic
/// compensating action. Futures submission strictly precedes spot
/// submission: the futures leg is the hedge, and opening spot without it
/// is forbidden.
pub struct PairedTradeExecutor {
    gateway: Arc<dyn ExchangeGateway>,
}

impl PairedTradeExecutor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Spawns the state machine in the background and returns a handle to
    /// observe it: a status-queryable [`PositionMsger`] and the raw
    /// message channel.
    #[instrument(skip(self, params), fields(sp_symbol = %params.sp_symbol, fu_symbol = %params.fu_symbol))]
    pub fn new_position(&self, params: PairedTradeParams) -> (PositionMsger, mpsc::Receiver<PositionMsg>) {
        let (msger, rx) = PositionMsger::new();
        let gateway = self.gateway.clone();
        let task_msger = msger.clone();
        tokio::spawn(async move {
            run(gateway, params, task_msger).await;
        });
        (msger, rx)
    }

    /// Issues `times` equal slices of `sp_qty / times` (floored to the
    /// spot pair's precision), sleeping 1 second between slices, aborting
    /// the batch on any hard failure (anything that doesn't reach
    /// `SP_OPENED` or `RE_FU_OPENED`).
    pub async fn new_position_slowly(
        &self,
        mut params: PairedTradeParams,
        sp_precision: u32,
        times: u32,
    ) -> Result<Vec<PositionMsg>, RemediationError> {
        let mut results = Vec::with_capacity(times as usize);
        if times == 0 {
            return Ok(results);
        }

        let slice_qty = floor_dp(params.sp_qty / Decimal::from(times), sp_precision);
        params.sp_qty = slice_qty;

        for i in 0..times {
            let (msger, _rx) = PositionMsger::new();
            let final_msg = run(self.gateway.clone(), params.clone(), msger).await;
            let status = final_msg.status();
            let hard_failure = !matches!(status, PositionStatus::SpOpened | PositionStatus::ReFuOpened);
            results.push(final_msg);

            if hard_failure {
                error!(slice = i, %status, "paired-trade slice did not reach a safe terminal state, aborting batch");
                return Err(RemediationError::PairedTradeFailed {
                    status: status.to_string(),
                });
            }

            if i + 1 != times {
                sleep(SLICE_SLEEP).await;
            }
        }

        Ok(results)
    }
}

async fn submit(
    gateway: &Arc<dyn ExchangeGateway>,
    market: LegMarket,
    symbol: &str,
    side: OrderSide,
    qty: Decimal,
) -> Result<Order, crate::exchange::GatewayError> {
    match market {
        LegMarket::Spot => gateway.new_spot_market_order(symbol, side, qty).await,
        LegMarket::FuturesUm => gateway.new_futures_market_order(symbol, side, qty).await,
        LegMarket::FuturesCm => gateway.new_futures_cm_market_order(symbol, side, qty).await,
    }
}

/// One leg's full lifecycle: submit, then wait for a terminal order
/// state. A submission error produces `Failed`; a wait error produces
/// `WaiterFailed` and preserves the submitted order, since its actual
/// fill state is unknown, not "not filled".
async fn leg(gateway: &Arc<dyn ExchangeGateway>, market: LegMarket, symbol: &str, side: OrderSide, qty: Decimal) -> LegRecord {
    let order = match submit(gateway, market, symbol, side, qty).await {
        Ok(order) => order,
        Err(e) => {
            return LegRecord {
                order: None,
                status: LegStatus::Failed,
                err: Some(e.to_string()),
            }
        }
    };

    match gateway.wait_order(symbol, order.order_id).await {
        Ok(final_order) => LegRecord {
            order: Some(final_order),
            status: LegStatus::Opened,
            err: None,
        },
        Err(e) => LegRecord {
            order: Some(order),
            status: LegStatus::WaiterFailed,
            err: Some(e.to_string()),
        },
    }
}

fn futures_market(is_cm: bool) -> LegMarket {
    if is_cm {
        LegMarket::FuturesCm
    } else {
        LegMarket::FuturesUm
    }
}

/// Drives one attempt through `NEW -> FU_OPENING -> ... -> terminal`,
/// publishing each transition to `msger`, and returns the final message.
async fn run(gateway: Arc<dyn ExchangeGateway>, params: PairedTradeParams, msger: PositionMsger) -> PositionMsg {
    let mut msg = PositionMsg::default();

    let fu_side = params.sp_side.opposite();

    msg.fu = LegRecord::opening();
    msger.send_msg(msg.clone()).await;

    msg.fu = leg(&gateway, futures_market(params.is_cm), &params.fu_symbol, fu_side, params.fu_qty).await;
    if msg.fu.status != LegStatus::Opened {
        if let Some(e) = &msg.fu.err {
            warn!(error = %e, status = ?msg.fu.status, "futures leg did not open");
            msg.errs.push(e.clone());
        }
        msger.send_msg(msg.clone()).await;
        return msg;
    }
    info!("futures leg opened");
    msger.send_msg(msg.clone()).await;

    msg.sp = LegRecord::opening();
    msger.send_msg(msg.clone()).await;

    msg.sp = leg(&gateway, LegMarket::Spot, &params.sp_symbol, params.sp_side, params.sp_qty).await;
    if msg.sp.status == LegStatus::Opened {
        info!("spot leg opened, hedge complete");
        msger.send_msg(msg.clone()).await;
        return msg;
    }

    if let Some(e) = &msg.sp.err {
        error!(error = %e, status = ?msg.sp.status, "spot leg did not open");
        msg.errs.push(e.clone());
    }
    msger.send_msg(msg.clone()).await;

    // The spot leg's fill state is ambiguous after a waiter failure; the
    // futures hedge must not be unwound against an unknown spot outcome.
    if msg.sp.status == LegStatus::WaiterFailed {
        warn!("spot leg status ambiguous, not unwinding the futures hedge");
        return msg;
    }

    // Spot submission cleanly failed: reverse the futures leg.
    msg.re_fu = LegRecord::opening();
    msger.send_msg(msg.clone()).await;

    let re_fu_side = fu_side.opposite();
    msg.re_fu = leg(&gateway, futures_market(params.is_cm), &params.fu_symbol, re_fu_side, params.fu_qty).await;
    if msg.re_fu.status != LegStatus::Opened {
        if let Some(e) = &msg.re_fu.err {
            error!(error = %e, status = ?msg.re_fu.status, "reverse-futures unwind did not open");
            msg.errs.push(e.clone());
        }
    } else {
        info!("reverse-futures unwind opened");
    }
    msger.send_msg(msg.clone()).await;
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeGateway;
    use rust_decimal_macros::dec;
    use tokio::time::timeout;

    fn test_pair(symbol: &str, qty_precision: u32, min_trade_qty: Decimal) -> Pair {
        Pair {
            asset: symbol.trim_end_matches("USDT").to_string(),
            quote: "USDT".to_string(),
            symbol: symbol.to_string(),
            qty_precision,
            min_trade_qty,
            tradable: true,
        }
    }

    #[test]
    fn size_position_floors_to_coarser_precision() {
        let sp = test_pair("ETHUSDT", 3, dec!(0.01));
        let fu = test_pair("ETHUSDT", 2, dec!(0.01));
        let (sp_qty, fu_qty) = size_position(dec!(1.2345), dec!(1.0), &sp, &fu).unwrap();
        assert_eq!(sp_qty, dec!(1.23));
        assert_eq!(fu_qty, dec!(1.23));
    }

    #[test]
    fn size_position_rejects_zero_exposure() {
        let sp = test_pair("ETHUSDT", 3, dec!(0.01));
        let fu = test_pair("ETHUSDT", 3, dec!(0.01));
        let err = size_position(dec!(1), Decimal::ZERO, &sp, &fu).unwrap_err();
        assert!(matches!(err, RemediationError::FuturesExposureZero));
    }

    #[test]
    fn size_position_rejects_qty_below_minimum() {
        let sp = test_pair("ETHUSDT", 3, dec!(5));
        let fu = test_pair("ETHUSDT", 3, dec!(0.01));
        let err = size_position(dec!(1), dec!(1), &sp, &fu).unwrap_err();
        assert!(matches!(err, RemediationError::QtyTooSmall { .. }));
    }

    #[tokio::test]
    async fn scenario_5_spot_submit_failure_unwinds_with_one_reverse_leg() {
        let gateway = Arc::new(MockExchangeGateway::new());
        gateway
            .with_state_mut(|s| {
                s.fail_next_order_on = Some("ETHUSDT".to_string());
            })
            .await;

        let executor = PairedTradeExecutor::new(gateway.clone());

        // Distinct spot/futures symbols so the mock's one-shot
        // `fail_next_order_on` only fires for the spot leg's submit, not the
        // futures leg's (which runs first).
        let params = PairedTradeParams {
            sp_symbol: "ETHUSDT".to_string(),
            fu_symbol: "ETHUSD_PERP".to_string(),
            sp_side: OrderSide::Buy,
            is_cm: false,
            sp_qty: dec!(1.0),
            fu_qty: dec!(1.0),
        };

        let (msger, mut rx) = executor.new_position(params);

        let final_msg = loop {
            let msg = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("should not hang")
                .expect("channel open until task completes");
            if msg.status() == PositionStatus::ReFuOpened || msg.status() == PositionStatus::ReFuFailed {
                break msg;
            }
        };

        assert_eq!(final_msg.status(), PositionStatus::ReFuOpened);
        assert_eq!(final_msg.errs.len(), 1);
        assert_eq!(msger.latest_msg().await.status(), PositionStatus::ReFuOpened);

        let orders = gateway.state().await.orders.clone();
        // futures open + reverse futures == 2 orders; spot never opened.
        assert_eq!(orders.len(), 2);
    }

    #[tokio::test]
    async fn waiter_failure_on_spot_does_not_unwind() {
        let gateway = Arc::new(MockExchangeGateway::new());
        gateway
            .with_state_mut(|s| {
                s.fail_next_wait_on = Some("ETHUSDT".to_string());
            })
            .await;
        let executor = PairedTradeExecutor::new(gateway.clone());

        // Distinct spot/futures symbols so the mock's one-shot
        // `fail_next_wait_on` only fires for the spot leg's wait, not the
        // futures leg's (which runs first).
        let params = PairedTradeParams {
            sp_symbol: "ETHUSDT".to_string(),
            fu_symbol: "ETHUSD_PERP".to_string(),
            sp_side: OrderSide::Buy,
            is_cm: false,
            sp_qty: dec!(1.0),
            fu_qty: dec!(1.0),
        };

        let (_msger, mut rx) = executor.new_position(params);

        let final_msg = loop {
            let msg = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("should not hang")
                .expect("channel open until task completes");
            if matches!(msg.status(), PositionStatus::SpWaiterFailed | PositionStatus::SpOpened) {
                break msg;
            }
        };

        assert_eq!(final_msg.status(), PositionStatus::SpWaiterFailed);
        assert!(final_msg.re_fu.status == LegStatus::None);
    }
}
