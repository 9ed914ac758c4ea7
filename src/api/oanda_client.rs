//! Oanda v20 REST client.
//!
//! Implements [`Broker`] against a single account:
//! - bearer-token authentication
//! - reads (balance, pricing, trades, orders) retried with exponential backoff
//! - mutations (orders, stop-loss changes, closes, cancels) sent exactly once

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::models::{BrokerOrder, BrokerTrade, CurrencyPair, TradeSide};

use super::types::*;
use super::Broker;

pub const PRACTICE_URL: &str = "https://api-fxpractice.oanda.com/v3";
pub const LIVE_URL: &str = "https://api-fxtrade.oanda.com/v3";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_RETRY_WINDOW: Duration = Duration::from_secs(10);

/// Which Oanda environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OandaEnvironment {
    Practice,
    Live,
}

impl OandaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            OandaEnvironment::Practice => PRACTICE_URL,
            OandaEnvironment::Live => LIVE_URL,
        }
    }
}

/// Credentials and endpoint selection.
#[derive(Debug, Clone)]
pub struct OandaConfig {
    pub api_token: String,
    pub account_id: String,
    pub environment: OandaEnvironment,
}

impl OandaConfig {
    /// Create from environment variables:
    /// - OANDA_API_TOKEN
    /// - OANDA_ACCOUNT_ID
    /// - OANDA_ENVIRONMENT (`practice` or `live`, defaults to practice)
    pub fn from_env() -> Result<Self> {
        let api_token = std::env::var("OANDA_API_TOKEN").context("OANDA_API_TOKEN not set")?;
        let account_id = std::env::var("OANDA_ACCOUNT_ID").context("OANDA_ACCOUNT_ID not set")?;
        let environment = match std::env::var("OANDA_ENVIRONMENT")
            .unwrap_or_else(|_| "practice".to_string())
            .to_lowercase()
            .as_str()
        {
            "practice" => OandaEnvironment::Practice,
            "live" => OandaEnvironment::Live,
            other => bail!("Invalid OANDA_ENVIRONMENT: {}", other),
        };

        Ok(Self {
            api_token,
            account_id,
            environment,
        })
    }
}

/// Client bound to one Oanda account.
pub struct OandaClient {
    http: Client,
    token: String,
    account_url: String,
}

impl OandaClient {
    pub fn new(config: &OandaConfig) -> Result<Self> {
        Self::with_base_url(config, config.environment.base_url())
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(config: &OandaConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            token: config.api_token.clone(),
            account_url: format!("{}/accounts/{}", base_url.trim_end_matches('/'), config.account_id),
        })
    }

    /// Idempotent GET with retry on transport errors, 429 and 5xx.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.account_url, path);
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(READ_RETRY_WINDOW),
            ..ExponentialBackoff::default()
        };

        debug!(url = %url, "Oanda GET");
        let url = url.as_str();

        retry(policy, move || async move {
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(anyhow::Error::new(e).context(format!("GET {} failed", path)))
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = anyhow!("GET {} failed: {} - {}", path, status, body);
                return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                });
            }

            response.json::<T>().await.map_err(|e| {
                backoff::Error::permanent(
                    anyhow::Error::new(e).context(format!("Failed to parse response of GET {}", path)),
                )
            })
        })
        .await
    }

    /// Single-shot mutation.
    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.account_url, path);
        debug!(url = %url, method = %method, "Oanda request");

        let mut request = self.http.request(method.clone(), &url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("{} {} failed: {} - {}", method, path, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response of {} {}", method, path))
    }

    async fn pricing(&self, pair: &CurrencyPair) -> Result<ClientPrice> {
        let response: PricingResponse = self
            .get_json("/pricing", &[("instruments", pair.instrument())])
            .await?;

        response
            .prices
            .into_iter()
            .find(|p| p.instrument == pair.instrument())
            .ok_or_else(|| anyhow!("No price returned for {}", pair.instrument()))
    }

    async fn account_summary(&self) -> Result<AccountSummary> {
        let response: AccountSummaryResponse = self.get_json("/summary", &[]).await?;
        Ok(response.account)
    }

    fn order_request(
        order_type: &str,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        price: Option<Decimal>,
    ) -> OrderRequestBody {
        let signed_units = i128::from(units) * i128::from(side.sign());
        let time_in_force = if price.is_some() { "GTC" } else { "FOK" };

        OrderRequestBody {
            order: OrderRequest {
                order_type: order_type.to_string(),
                instrument: pair.instrument(),
                units: signed_units.to_string(),
                price: price.map(|p| p.to_string()),
                time_in_force: time_in_force.to_string(),
                position_fill: "DEFAULT".to_string(),
                stop_loss_on_fill: None,
            },
        }
    }
}

/// Per-unit pip value when the broker does not report a conversion factor.
fn fallback_pip_value(
    pair: &CurrencyPair,
    account_currency: &str,
    price: Decimal,
) -> Result<Decimal> {
    if pair.quote() == account_currency {
        Ok(pair.pip_size())
    } else if pair.base() == account_currency && !price.is_zero() {
        Ok(pair.pip_size() / price)
    } else {
        bail!(
            "Cannot value a pip of {} in {} without a conversion factor",
            pair,
            account_currency
        )
    }
}

#[async_trait]
impl Broker for OandaClient {
    fn name(&self) -> &'static str {
        "oanda"
    }

    async fn account_balance(&self) -> Result<Decimal> {
        Ok(self.account_summary().await?.balance)
    }

    async fn current_price(&self, side: TradeSide, pair: &CurrencyPair) -> Result<Decimal> {
        let price = self.pricing(pair).await?;
        let book = match side {
            TradeSide::Buy => &price.asks,
            TradeSide::Sell => &price.bids,
        };
        book.first()
            .map(|b| b.price)
            .ok_or_else(|| anyhow!("Empty {} book for {}", side, pair))
    }

    async fn account_currency_per_pip(&self, pair: &CurrencyPair) -> Result<Decimal> {
        let price = self.pricing(pair).await?;
        if let Some(factors) = &price.quote_home_conversion_factors {
            return Ok(pair.pip_size() * factors.positive_units);
        }

        let summary = self.account_summary().await?;
        let mid = match (price.bids.first(), price.asks.first()) {
            (Some(bid), Some(ask)) => (bid.price + ask.price) / Decimal::TWO,
            _ => Decimal::ZERO,
        };
        fallback_pip_value(pair, &summary.currency, mid)
    }

    async fn open_trades(&self, pair: &CurrencyPair) -> Result<Vec<BrokerTrade>> {
        let response: TradesResponse = self
            .get_json(
                "/trades",
                &[("instrument", pair.instrument()), ("state", "OPEN".to_string())],
            )
            .await?;

        response
            .trades
            .into_iter()
            .filter(|t| t.instrument == pair.instrument())
            .map(|t| {
                let units = t
                    .current_units
                    .to_i64()
                    .ok_or_else(|| anyhow!("Trade {} units out of range", t.id))?;
                Ok(BrokerTrade {
                    id: t.id,
                    units,
                    open_price: t.price,
                    stop_loss: t.stop_loss_order.map(|o| o.price),
                })
            })
            .collect()
    }

    async fn pending_orders(&self, pair: &CurrencyPair) -> Result<Vec<BrokerOrder>> {
        let response: OrdersResponse = self
            .get_json(
                "/orders",
                &[("instrument", pair.instrument()), ("state", "PENDING".to_string())],
            )
            .await?;

        let instrument = pair.instrument();
        response
            .orders
            .into_iter()
            .filter(|o| o.is_entry_order() && o.instrument.as_deref() == Some(instrument.as_str()))
            .map(|o| {
                let stop_loss = match &o.stop_loss_on_fill {
                    Some(sl) => Some(
                        sl.price
                            .parse::<Decimal>()
                            .with_context(|| format!("Bad stop-loss price on order {}", o.id))?,
                    ),
                    None => None,
                };
                Ok(BrokerOrder {
                    bound_price: o.price.unwrap_or_default(),
                    stop_loss,
                    id: o.id,
                })
            })
            .collect()
    }

    async fn open_market_trade(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
    ) -> Result<String> {
        let body = Self::order_request("MARKET", side, units, pair, None);
        let response: OrderTransactionResponse =
            self.send_json(Method::POST, "/orders", Some(&body)).await?;

        if let Some(opened) = response.order_fill_transaction.and_then(|f| f.trade_opened) {
            return Ok(opened.trade_id);
        }
        match response.order_cancel_transaction {
            Some(cancel) => bail!("Market order for {} cancelled: {}", pair, cancel.reason),
            None => bail!("Market order for {} did not open a trade", pair),
        }
    }

    async fn create_limit_order(
        &self,
        side: TradeSide,
        units: u64,
        pair: &CurrencyPair,
        bound_price: Decimal,
    ) -> Result<String> {
        let body = Self::order_request("LIMIT", side, units, pair, Some(bound_price));
        let response: OrderTransactionResponse =
            self.send_json(Method::POST, "/orders", Some(&body)).await?;

        response
            .order_create_transaction
            .map(|t| t.id)
            .ok_or_else(|| anyhow!("Limit order for {} was not created", pair))
    }

    async fn set_trade_stop_loss(&self, trade_id: &str, price: Decimal) -> Result<()> {
        let body = TradeOrdersBody {
            stop_loss: StopLossDetails {
                price: price.to_string(),
                time_in_force: Some("GTC".to_string()),
            },
        };
        let _: serde_json::Value = self
            .send_json(Method::PUT, &format!("/trades/{}/orders", trade_id), Some(&body))
            .await?;
        Ok(())
    }

    async fn set_order_stop_loss(&self, order_id: &str, price: Decimal) -> Result<String> {
        // v20 has no partial order update: fetch the order and replace it whole.
        let current: OrderResponse = self.get_json(&format!("/orders/{}", order_id), &[]).await?;
        let order = current.order;

        let instrument = order
            .instrument
            .clone()
            .ok_or_else(|| anyhow!("Order {} has no instrument", order_id))?;
        let units = order
            .units
            .ok_or_else(|| anyhow!("Order {} has no units", order_id))?;

        let body = OrderRequestBody {
            order: OrderRequest {
                order_type: order.order_type.clone(),
                instrument,
                units: units.to_string(),
                price: order.price.map(|p| p.to_string()),
                time_in_force: order.time_in_force.clone().unwrap_or_else(|| "GTC".to_string()),
                position_fill: "DEFAULT".to_string(),
                stop_loss_on_fill: Some(StopLossDetails {
                    price: price.to_string(),
                    time_in_force: Some("GTC".to_string()),
                }),
            },
        };

        let response: OrderTransactionResponse = self
            .send_json(Method::PUT, &format!("/orders/{}", order_id), Some(&body))
            .await?;

        response
            .order_create_transaction
            .map(|t| t.id)
            .ok_or_else(|| anyhow!("Replacement of order {} was not created", order_id))
    }

    async fn close_trade(&self, trade_id: &str) -> Result<()> {
        let body = CloseTradeBody {
            units: "ALL".to_string(),
        };
        let _: serde_json::Value = self
            .send_json(Method::PUT, &format!("/trades/{}/close", trade_id), Some(&body))
            .await?;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_json::<(), _>(Method::PUT, &format!("/orders/{}/cancel", order_id), None)
            .await?;
        Ok(())
    }
}
