use super::types::*;
use crate::pipeline::types::{AccountSnapshot, Holding};
use crate::pipeline::{AccountSource, StageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use std::collections::BTreeMap;
use std::time::Duration;

/// Header-authenticated client for the brokerage trading API.
pub struct BrokerRest {
    client: Client,
    key_id: String,
    secret: String,
    base_url: String,
}

impl BrokerRest {
    pub fn new(key_id: String, secret: String, base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            key_id,
            secret,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret)
    }

    /// Market clock (open flag and next session times).
    pub async fn get_clock(&self) -> Result<Clock> {
        self.get_authed("/v2/clock").await
    }

    pub async fn get_account(&self) -> Result<Account> {
        self.get_authed("/v2/account").await
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        self.get_authed("/v2/positions").await
    }

    /// Place an order.
    pub async fn create_order(&self, order: &CreateOrderRequest) -> Result<Order> {
        let url = format!("{}/v2/orders", self.base_url);
        let resp = self
            .authed(self.client.post(&url).json(order))
            .send()
            .await
            .context("order request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or(body);
            anyhow::bail!("order failed ({}): {}", status, message);
        }
        resp.json().await.context("failed to parse order response")
    }

    /// Build the account snapshot the pipeline starts from. Skips the
    /// account and positions calls when the market is closed.
    pub async fn snapshot(&self) -> Result<AccountSnapshot> {
        let clock = self.get_clock().await?;
        if !clock.is_open {
            tracing::debug!(next_open = ?clock.next_open, "market clock reports closed");
            return Ok(AccountSnapshot {
                is_market_open: false,
                ..AccountSnapshot::default()
            });
        }

        let account = self.get_account().await?;
        let positions = self.get_positions().await?;

        let mut holdings = BTreeMap::new();
        for p in positions {
            let holding = Holding {
                quantity: parse_amount(&p.qty, "qty")?,
                market_value: parse_amount(&p.market_value, "market_value")?,
                avg_entry_price: parse_amount(&p.avg_entry_price, "avg_entry_price")?,
                current_price: parse_amount(&p.current_price, "current_price")?,
                unrealized_pl: parse_amount(&p.unrealized_pl, "unrealized_pl")?,
            };
            holdings.insert(p.symbol, holding);
        }

        Ok(AccountSnapshot {
            is_market_open: true,
            available_capital: parse_amount(&account.cash, "cash")?,
            portfolio_value: parse_amount(&account.portfolio_value, "portfolio_value")?,
            holdings,
        })
    }

    /// Authenticated GET request.
    async fn get_authed<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("GET request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {} failed ({}): {}", path, status, body);
        }
        resp.json().await.context("failed to parse response")
    }
}

#[async_trait]
impl AccountSource for BrokerRest {
    async fn status(&self) -> StageResult<AccountSnapshot> {
        Ok(self.snapshot().await?)
    }
}
