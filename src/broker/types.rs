use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: String,          // "buy" or "sell"
    #[serde(rename = "type")]
    pub order_type: String,    // "market"
    pub time_in_force: String, // "day"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub filled_qty: Option<String>,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
}

impl Order {
    pub fn fill_price(&self) -> Option<f64> {
        self.filled_avg_price.as_deref().and_then(|p| p.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct Clock {
    pub is_open: bool,
    #[serde(default)]
    pub next_open: Option<String>,
    #[serde(default)]
    pub next_close: Option<String>,
}

/// Money fields arrive as decimal strings.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub cash: String,
    pub portfolio_value: String,
    #[serde(default)]
    pub buying_power: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: String,
    pub market_value: String,
    pub avg_entry_price: String,
    pub current_price: String,
    pub unrealized_pl: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

pub fn parse_amount(value: &str, field: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("invalid {} value: {:?}", field, value))
}
