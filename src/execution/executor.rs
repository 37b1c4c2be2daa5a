use crate::broker::types::CreateOrderRequest;
use crate::broker::BrokerRest;
use crate::pipeline::types::{ActionKind, ActionResult, DirectedAction};
use crate::pipeline::ActionExecutor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct OrderExecutor {
    broker: Arc<BrokerRest>,
    dry_run: bool,
}

impl OrderExecutor {
    pub fn new(broker: Arc<BrokerRest>, dry_run: bool) -> Self {
        Self { broker, dry_run }
    }

    /// Submit a market order for one action.
    pub async fn submit_order(&self, action: &DirectedAction) -> Result<ActionResult> {
        let order = build_order(action)?;

        if self.dry_run {
            tracing::info!(
                symbol = %order.symbol,
                qty = %order.qty,
                side = %order.side,
                "DRY RUN: would submit order"
            );
            return Ok(ActionResult::success(action, None, None)); // No order ID in dry run
        }

        let response = self
            .broker
            .create_order(&order)
            .await
            .context("order submission failed")?;

        tracing::info!(
            symbol = %order.symbol,
            order_id = %response.id,
            status = %response.status,
            "order submitted"
        );

        Ok(ActionResult::success(action, response.fill_price(), Some(response.id)))
    }
}

fn build_order(action: &DirectedAction) -> Result<CreateOrderRequest> {
    // Validation
    if action.quantity() == 0 {
        anyhow::bail!("quantity must be > 0");
    }
    let symbol = action.subject_id().trim();
    if symbol.is_empty() {
        anyhow::bail!("order has no symbol");
    }

    Ok(CreateOrderRequest {
        symbol: symbol.to_uppercase(),
        qty: action.quantity().to_string(),
        side: match action.kind() {
            ActionKind::Acquire => "buy",
            ActionKind::Release => "sell",
        }
        .to_string(),
        order_type: "market".to_string(),
        time_in_force: "day".to_string(),
        client_order_id: None,
    })
}

#[async_trait]
impl ActionExecutor for OrderExecutor {
    async fn apply(&self, action: &DirectedAction) -> Result<ActionResult> {
        self.submit_order(action).await
    }
}
