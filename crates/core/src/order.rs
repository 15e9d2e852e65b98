//! Sandwich Order Tools
//!
//! The tool surface offered to the order assistant, served over the Model
//! Context Protocol (MCP). Each conversation owns one [`OrderService`] and the
//! [`SandwichOrder`] it mutates.

use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// One line of an order.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub item: String,
    pub quantity: i64,
}

/// The order being taken in one conversation.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Default, PartialEq, Eq)]
pub struct SandwichOrder {
    pub lines: Vec<OrderLine>,
    /// Summary the customer agreed to, once confirmed.
    pub confirmed: Option<String>,
}

impl SandwichOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct AddToOrderArgs {
    #[schemars(description = "The menu item to add, e.g. 'turkey sandwich with swiss'")]
    pub item: String,
    #[schemars(description = "How many of the item to add")]
    pub quantity: i64,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ConfirmOrderArgs {
    #[schemars(description = "A short summary of the complete order as agreed with the customer")]
    pub order_summary: String,
}

/// MCP tool server for taking a sandwich order.
#[derive(Clone)]
pub struct OrderService {
    pub order: Arc<Mutex<SandwichOrder>>,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for OrderService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl OrderService {
    pub fn new(order: Arc<Mutex<SandwichOrder>>) -> Self {
        Self {
            order,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Add an item to the customer's sandwich order.")]
    pub async fn add_to_order(&self, args: Parameters<AddToOrderArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'add_to_order'");
        let AddToOrderArgs { item, quantity } = args.0;
        if item.trim().is_empty() {
            return Err("Item must not be empty.".to_string());
        }

        let mut order = self.order.lock().await;
        let reply = format!("Added {} x {} to the order.", quantity, item);
        order.lines.push(OrderLine { item, quantity });
        Ok(reply)
    }

    #[tool(description = "Confirm the final order with the customer.")]
    pub async fn confirm_order(&self, args: Parameters<ConfirmOrderArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'confirm_order'");
        let summary = args.0.order_summary;
        let reply = format!("Order confirmed: {}. Sending to kitchen.", summary);
        self.order.lock().await.confirmed = Some(summary);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> OrderService {
        OrderService::new(Arc::new(Mutex::new(SandwichOrder::new())))
    }

    #[tokio::test]
    async fn add_to_order_records_the_line() {
        let service = service();
        let reply = service
            .add_to_order(Parameters(AddToOrderArgs {
                item: "turkey sandwich".to_string(),
                quantity: 1,
            }))
            .await;

        assert_eq!(reply, Ok("Added 1 x turkey sandwich to the order.".to_string()));
        let order = service.order.lock().await;
        assert_eq!(
            order.lines,
            vec![OrderLine {
                item: "turkey sandwich".to_string(),
                quantity: 1
            }]
        );
        assert!(!order.is_confirmed());
    }

    #[tokio::test]
    async fn blank_item_is_rejected() {
        let service = service();
        let reply = service
            .add_to_order(Parameters(AddToOrderArgs {
                item: "  ".to_string(),
                quantity: 2,
            }))
            .await;

        assert!(reply.is_err());
        assert!(service.order.lock().await.lines.is_empty());
    }

    #[tokio::test]
    async fn confirm_order_marks_the_order_confirmed() {
        let service = service();
        let reply = service
            .confirm_order(Parameters(ConfirmOrderArgs {
                order_summary: "1 turkey on rye".to_string(),
            }))
            .await;

        assert_eq!(
            reply,
            Ok("Order confirmed: 1 turkey on rye. Sending to kitchen.".to_string())
        );
        assert_eq!(
            service.order.lock().await.confirmed.as_deref(),
            Some("1 turkey on rye")
        );
    }
}
