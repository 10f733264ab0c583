//! Account Guardian - Main Entry Point
//!
//! Thin CLI wiring: `run` starts the live watcher + remediation loop,
//! `dry-run` exercises one analyzer pass against an in-memory mock
//! gateway fixture without touching the exchange.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use account_guardian::account::{
    build_snapshot, Account, ClassicSnapshotBuilder, PmSnapshotBuilder, SystemClock,
};
use account_guardian::config::Config;
use account_guardian::exchange::{BinanceClient, ExchangeGateway, MockExchangeGateway};
use account_guardian::remediation::{PmRemediationEngine, RemediationEngine};
use account_guardian::risk::analyze_account;
use account_guardian::watcher::Watcher;

/// Account Guardian CLI
#[derive(Parser)]
#[command(name = "account-guardian")]
#[command(version, about = "Autonomous risk-management agent for a multi-mode exchange account")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live watcher + remediation loop against the exchange.
    Run {
        /// Operate the portfolio-margin account instead of the classic
        /// spot/futures/loan account.
        #[arg(long)]
        pm: bool,
    },
    /// Run one analyzer pass against an in-memory mock gateway fixture,
    /// for operational smoke-testing without a live account.
    DryRun,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    info!("account guardian v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run { pm: false }) {
        Commands::Run { pm } => run_live(pm).await,
        Commands::DryRun => run_dry_run().await,
    }
}

async fn run_live(pm: bool) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let gateway: Arc<dyn ExchangeGateway> = Arc::new(BinanceClient::new(&config.exchange)?);
    let poll_period = Duration::from_secs(config.runtime.poll_period_secs);

    if config.runtime.dry_run {
        warn!("dry_run is set in config but `run` issues live calls; use the `dry-run` subcommand instead");
    }

    if pm {
        run_pm_loop(gateway, config, poll_period).await
    } else {
        run_classic_loop(gateway, poll_period).await
    }
}

async fn run_classic_loop(gateway: Arc<dyn ExchangeGateway>, poll_period: Duration) -> Result<()> {
    let builder = Arc::new(ClassicSnapshotBuilder::new(gateway.clone()));
    let watcher = Arc::new(Watcher::<Account, _>::with_poll_period(builder, poll_period));
    watcher.start()?;

    let engine = Arc::new(RemediationEngine::new(gateway.clone(), watcher.clone()));
    let (_subscriber_id, mut rx) = watcher.subscribe(1);

    info!("account guardian started in classic mode");
    while let Some(msg) = rx.recv().await {
        match msg {
            Ok(account) => engine.handle(account).await,
            Err(e) => error!(error = ?e, "snapshot refresh failed"),
        }
    }
    Ok(())
}

async fn run_pm_loop(gateway: Arc<dyn ExchangeGateway>, config: Config, poll_period: Duration) -> Result<()> {
    let builder = Arc::new(PmSnapshotBuilder::new(gateway.clone()));
    let watcher = Arc::new(Watcher::with_poll_period(builder, poll_period));
    watcher.start()?;

    let engine = Arc::new(PmRemediationEngine::new(gateway, config.pm_risk));
    let (_subscriber_id, mut rx) = watcher.subscribe(1);

    info!("account guardian started in portfolio-margin mode");
    while let Some(msg) = rx.recv().await {
        match msg {
            Ok(account) => engine.handle(&account).await,
            Err(e) => error!(error = ?e, "snapshot refresh failed"),
        }
    }
    Ok(())
}

async fn run_dry_run() -> Result<()> {
    info!("dry run: analyzing a mock gateway fixture, no live calls will be made");

    let gateway = MockExchangeGateway::with_fixture();
    let account = build_snapshot(&gateway, &SystemClock).await?;
    let analysis = analyze_account(&account);

    info!(
        low_ltv_orders = analysis.loans.low.len(),
        risky_loans = analysis.loans.high.len(),
        "loan classification"
    );
    info!(
        futures_usdt_risky = analysis.futures.usdt.risky,
        futures_margin_risky = analysis.futures.margin.risky,
        margin_ratio = %analysis.futures.margin.current_ratio,
        "futures risk"
    );

    for demand in &analysis.loans.high {
        warn!(
            loan_coin = %demand.order.loan_coin,
            collateral_coin = %demand.order.collateral_coin,
            additional_collateral = %demand.additional_collateral,
            additional_usd = %demand.additional_usd,
            "risky loan demand"
        );
    }
    for low in &analysis.loans.low {
        info!(
            loan_coin = %low.order.loan_coin,
            collateral_coin = %low.order.collateral_coin,
            current_ltv = %low.current_ltv,
            redundant_collateral = %low.redundant_collateral,
            "low-LTV release candidate"
        );
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "account-guardian.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the guard must outlive the program, which exits
    // only via process termination.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("account_guardian=info".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}
