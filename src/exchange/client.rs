//! Live REST implementation of [`ExchangeGateway`] against Binance-style
//! spot/futures/portfolio-margin/loan endpoints.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::config::ExchangeConfig;
use crate::exchange::traits::{ExchangeGateway, GatewayError, GatewayResult};
use crate::exchange::types::*;

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";
const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";
const PAPI_BASE_URL: &str = "https://papi.binance.com";

/// Authenticated REST client for the live exchange.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    futures_base_url: String,
    spot_base_url: String,
    papi_base_url: String,
}

impl BinanceClient {
    pub fn new(config: &ExchangeConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let (futures_base_url, spot_base_url) = if config.testnet {
            (FUTURES_TESTNET_URL.to_string(), SPOT_TESTNET_URL.to_string())
        } else {
            (FUTURES_BASE_URL.to_string(), SPOT_BASE_URL.to_string())
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            futures_base_url,
            spot_base_url,
            papi_base_url: PAPI_BASE_URL.to_string(),
        })
    }

    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_millis() as u64
    }

    async fn get_public<T: DeserializeOwned>(&self, endpoint: &str) -> GatewayResult<T> {
        let response = self
            .http
            .get(endpoint)
            .send()
            .await
            .map_err(|e| transport_err(endpoint, e))?;
        parse_response(endpoint, response).await
    }

    async fn get_signed<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> GatewayResult<T> {
        params.push(("timestamp".to_string(), Self::timestamp().to_string()));
        let query = build_query(&params);
        let signature = self.sign(&query);
        let url = format!("{base_url}{path}?{query}&signature={signature}");

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| transport_err(path, e))?;
        parse_response(path, response).await
    }

    async fn post_signed<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> GatewayResult<T> {
        params.push(("timestamp".to_string(), Self::timestamp().to_string()));
        let query = build_query(&params);
        let signature = self.sign(&query);
        let url = format!("{base_url}{path}?{query}&signature={signature}");

        debug!(path, "submitting signed request");
        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| transport_err(path, e))?;
        parse_response(path, response).await
    }

    fn market_side(side: OrderSide) -> &'static str {
        match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

fn build_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn transport_err(endpoint: &str, source: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        endpoint: endpoint.to_string(),
        source: source.into(),
    }
}

async fn parse_response<T: DeserializeOwned>(endpoint: &str, response: Response) -> GatewayResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Request {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| transport_err(endpoint, e))
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    #[instrument(skip(self))]
    async fn spot_account(&self) -> GatewayResult<SpotAccount> {
        self.get_signed(&self.spot_base_url, "/api/v3/account", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn futures_account(&self) -> GatewayResult<FuturesAccount> {
        self.get_signed(&self.futures_base_url, "/fapi/v2/account", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn simple_earn_flexible_positions(&self) -> GatewayResult<Vec<SimpleEarnFlexiblePosition>> {
        self.get_signed(
            &self.spot_base_url,
            "/sapi/v1/simple-earn/flexible/position",
            vec![],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn crypto_loan_flexible_ongoing_orders(
        &self,
    ) -> GatewayResult<Vec<CryptoLoanFlexibleOngoingOrder>> {
        self.get_signed(
            &self.spot_base_url,
            "/sapi/v2/loan/flexible/ongoing/orders",
            vec![],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn portfolio_margin_account_detail(&self) -> GatewayResult<PmAccountDetail> {
        self.get_signed(&self.papi_base_url, "/papi/v1/balance", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn portfolio_margin_account_information(&self) -> GatewayResult<PmAccountInformation> {
        self.get_signed(&self.papi_base_url, "/papi/v1/account", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn portfolio_margin_positions(&self) -> GatewayResult<Vec<PmPosition>> {
        self.get_signed(&self.papi_base_url, "/papi/v1/um/positionRisk", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn portfolio_margin_collateral_rates(&self) -> GatewayResult<Vec<PmCollateralRate>> {
        self.get_public(&format!(
            "{}/papi/v1/portfolio/collateralRate",
            self.papi_base_url
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn vip_loan_ongoing_orders(&self) -> GatewayResult<Vec<VipLoanOngoingOrder>> {
        self.get_signed(&self.spot_base_url, "/sapi/v1/loan/vip/ongoing/orders", vec![])
            .await
    }

    #[instrument(skip(self))]
    async fn vip_loan_application_status(&self) -> GatewayResult<Vec<VipLoanApplicationStatus>> {
        self.get_signed(
            &self.spot_base_url,
            "/sapi/v1/loan/vip/request/data",
            vec![],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn vip_loan_collateral_asset_list(&self) -> GatewayResult<Vec<String>> {
        self.get_public(&format!(
            "{}/sapi/v1/loan/vip/collateral/data",
            self.spot_base_url
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn spot_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>> {
        self.get_public(&format!("{}/api/v3/ticker/price", self.spot_base_url))
            .await
    }

    #[instrument(skip(self))]
    async fn futures_price_tickers(&self) -> GatewayResult<Vec<PriceTicker>> {
        self.get_public(&format!("{}/fapi/v1/ticker/price", self.futures_base_url))
            .await
    }

    #[instrument(skip(self))]
    async fn cm_premium_index(&self) -> GatewayResult<Vec<PriceTicker>> {
        self.get_public(&format!("{}/dapi/v1/premiumIndex", self.futures_base_url))
            .await
    }

    #[instrument(skip(self))]
    async fn futures_order_book(&self, symbol: &str, depth: u32) -> GatewayResult<OrderBook> {
        self.get_public(&format!(
            "{}/fapi/v1/depth?symbol={}&limit={}",
            self.futures_base_url, symbol, depth
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn crypto_loan_flexible_adjust_ltv(
        &self,
        loan_coin: &str,
        collateral_coin: &str,
        qty: Decimal,
        mode: AdjustLtvMode,
    ) -> GatewayResult<()> {
        let direction = match mode {
            AdjustLtvMode::Additional => "ADDITIONAL",
            AdjustLtvMode::Reduced => "REDUCED",
        };
        let _: serde_json::Value = self
            .post_signed(
                &self.spot_base_url,
                "/sapi/v2/loan/flexible/adjust/ltv",
                vec![
                    ("loanCoin".to_string(), loan_coin.to_string()),
                    ("collateralCoin".to_string(), collateral_coin.to_string()),
                    ("adjustmentAmount".to_string(), qty.to_string()),
                    ("direction".to_string(), direction.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn universal_transfer(
        &self,
        transfer_type: TransferType,
        coin: &str,
        qty: Decimal,
    ) -> GatewayResult<TransferResult> {
        self.post_signed(
            &self.spot_base_url,
            "/sapi/v1/asset/transfer",
            vec![
                ("type".to_string(), transfer_type.as_binance_code().to_string()),
                ("asset".to_string(), coin.to_string()),
                ("amount".to_string(), qty.to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn new_spot_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.post_signed(
            &self.spot_base_url,
            "/api/v3/order",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("side".to_string(), Self::market_side(side).to_string()),
                ("type".to_string(), "MARKET".to_string()),
                ("quantity".to_string(), qty.to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn new_futures_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.post_signed(
            &self.futures_base_url,
            "/fapi/v1/order",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("side".to_string(), Self::market_side(side).to_string()),
                ("type".to_string(), "MARKET".to_string()),
                ("quantity".to_string(), qty.to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn new_futures_cm_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> GatewayResult<Order> {
        self.post_signed(
            &self.futures_base_url,
            "/dapi/v1/order",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("side".to_string(), Self::market_side(side).to_string()),
                ("type".to_string(), "MARKET".to_string()),
                ("quantity".to_string(), qty.to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn wait_order(&self, symbol: &str, order_id: i64) -> GatewayResult<Order> {
        const MAX_POLLS: u32 = 30;
        for _ in 0..MAX_POLLS {
            let order: Order = self
                .get_signed(
                    &self.futures_base_url,
                    "/fapi/v1/order",
                    vec![
                        ("symbol".to_string(), symbol.to_string()),
                        ("orderId".to_string(), order_id.to_string()),
                    ],
                )
                .await?;
            if order.status.is_terminal() {
                return Ok(order);
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Err(GatewayError::OrderWaitAmbiguous {
            symbol: symbol.to_string(),
            order_id,
            reason: "order did not reach a terminal status within the poll budget".to_string(),
        })
    }
}
