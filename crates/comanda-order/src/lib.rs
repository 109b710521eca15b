//! Bridge between protocol confirmation intents and the external
//! cart/order system.
//!
//! The bridge performs no retries of its own: submit failures are
//! surfaced as retryable outcomes for the calling layer to decide on
//! retry or user notification.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use comanda_types::{CartSummary, ConfirmationAction, OrderItem, OrderReceipt};

/// Errors from the external order collaborator.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request could not be delivered.
    #[error("order request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The collaborator answered with a non-2xx status.
    #[error("order endpoint returned status {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("malformed order payload: {0}")]
    Malformed(String),
}

/// The external cart/order system, as consumed by the bridge.
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// Submits the given items as an order.
    async fn submit_order(&self, items: &[OrderItem]) -> Result<OrderReceipt, OrderError>;

    /// Empties the cart.
    async fn clear_cart(&self) -> Result<(), OrderError>;

    /// Item count and total of the current cart.
    async fn cart_summary(&self) -> Result<CartSummary, OrderError>;
}

/// Production client against the REST order collaborator.
pub struct HttpOrderClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpOrderClient {
    /// Creates a client rooted at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    async fn submit_order(&self, items: &[OrderItem]) -> Result<OrderReceipt, OrderError> {
        let response = self
            .http
            .post(self.url("orders"))
            .json(&items)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrderError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))
    }

    async fn clear_cart(&self) -> Result<(), OrderError> {
        let response = self.http.delete(self.url("cart")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrderError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn cart_summary(&self) -> Result<CartSummary, OrderError> {
        let response = self.http.get(self.url("cart/summary")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OrderError::Status(status.as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| OrderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl OrderClient for std::sync::Arc<dyn OrderClient> {
    async fn submit_order(&self, items: &[OrderItem]) -> Result<OrderReceipt, OrderError> {
        (**self).submit_order(items).await
    }

    async fn clear_cart(&self) -> Result<(), OrderError> {
        (**self).clear_cart().await
    }

    async fn cart_summary(&self) -> Result<CartSummary, OrderError> {
        (**self).cart_summary().await
    }
}

/// What a confirmation produced, reported back as a semantic event.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    /// The order was accepted by the order system.
    OrderSubmitted {
        /// Identifier assigned by the order system.
        order_id: Option<String>,
    },
    /// Submission failed; the caller decides on retry or notification.
    SubmitFailed {
        /// What went wrong.
        reason: String,
    },
    /// Checkout was requested with nothing in the cart.
    NothingToSubmit,
    /// Cart summary for a review request.
    OrderSummary {
        /// The current cart summary.
        summary: CartSummary,
    },
    /// The cart was cleared.
    CartCleared,
}

/// Translates confirmation intents into collaborator calls.
pub struct OrderBridge<C> {
    client: C,
}

impl<C: OrderClient> OrderBridge<C> {
    /// Wraps an order client.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Handles one confirmation intent.
    ///
    /// `Checkout` invokes the order-submission collaborator exactly
    /// once with the current item set; `Review` computes a summary
    /// without side effects; `Cancel` clears the cart.
    pub async fn on_confirmation(
        &self,
        action: ConfirmationAction,
        items: &[OrderItem],
    ) -> BridgeOutcome {
        match action {
            ConfirmationAction::Checkout => {
                if items.is_empty() {
                    info!("checkout requested with an empty cart");
                    return BridgeOutcome::NothingToSubmit;
                }
                match self.client.submit_order(items).await {
                    Ok(receipt) if receipt.success => {
                        info!(order_id = ?receipt.order_id, "order submitted");
                        BridgeOutcome::OrderSubmitted {
                            order_id: receipt.order_id,
                        }
                    }
                    Ok(_) => {
                        warn!("order system rejected the submission");
                        BridgeOutcome::SubmitFailed {
                            reason: "order rejected".to_string(),
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "order submission failed");
                        BridgeOutcome::SubmitFailed {
                            reason: err.to_string(),
                        }
                    }
                }
            }
            ConfirmationAction::Review => match self.client.cart_summary().await {
                Ok(summary) => BridgeOutcome::OrderSummary { summary },
                Err(err) => {
                    warn!(error = %err, "cart summary failed");
                    BridgeOutcome::SubmitFailed {
                        reason: err.to_string(),
                    }
                }
            },
            ConfirmationAction::Cancel => match self.client.clear_cart().await {
                Ok(()) => {
                    info!("cart cleared");
                    BridgeOutcome::CartCleared
                }
                Err(err) => {
                    warn!(error = %err, "cart clear failed");
                    BridgeOutcome::SubmitFailed {
                        reason: err.to_string(),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        submissions: Mutex<Vec<Vec<OrderItem>>>,
        clears: AtomicUsize,
        fail_submit: bool,
    }

    #[async_trait]
    impl OrderClient for RecordingClient {
        async fn submit_order(&self, items: &[OrderItem]) -> Result<OrderReceipt, OrderError> {
            self.submissions.lock().unwrap().push(items.to_vec());
            if self.fail_submit {
                return Err(OrderError::Status(503));
            }
            Ok(OrderReceipt {
                success: true,
                order_id: Some("ord-42".to_string()),
            })
        }

        async fn clear_cart(&self) -> Result<(), OrderError> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cart_summary(&self) -> Result<CartSummary, OrderError> {
            Ok(CartSummary {
                item_count: 2,
                total: 17.25,
            })
        }
    }

    fn items() -> Vec<OrderItem> {
        vec![
            OrderItem {
                name: "burger".into(),
                quantity: 1,
                unit_price: 8.00,
                notes: None,
            },
            OrderItem {
                name: "fries".into(),
                quantity: 1,
                unit_price: 3.50,
                notes: Some("large".into()),
            },
        ]
    }

    #[tokio::test]
    async fn checkout_submits_exactly_once_with_current_items() {
        let bridge = OrderBridge::new(RecordingClient::default());
        let outcome = bridge
            .on_confirmation(ConfirmationAction::Checkout, &items())
            .await;

        assert_eq!(
            outcome,
            BridgeOutcome::OrderSubmitted {
                order_id: Some("ord-42".to_string())
            }
        );
        let submissions = bridge.client.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0], items());
    }

    #[tokio::test]
    async fn checkout_with_empty_cart_skips_the_collaborator() {
        let bridge = OrderBridge::new(RecordingClient::default());
        let outcome = bridge
            .on_confirmation(ConfirmationAction::Checkout, &[])
            .await;
        assert_eq!(outcome, BridgeOutcome::NothingToSubmit);
        assert!(bridge.client.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn submit_failure_is_surfaced_not_swallowed() {
        let bridge = OrderBridge::new(RecordingClient {
            fail_submit: true,
            ..RecordingClient::default()
        });
        let outcome = bridge
            .on_confirmation(ConfirmationAction::Checkout, &items())
            .await;
        assert!(matches!(outcome, BridgeOutcome::SubmitFailed { .. }));
        // Exactly one attempt: the bridge never retries on its own.
        assert_eq!(bridge.client.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn review_reads_the_summary_without_side_effects() {
        let bridge = OrderBridge::new(RecordingClient::default());
        let outcome = bridge
            .on_confirmation(ConfirmationAction::Review, &items())
            .await;
        assert_eq!(
            outcome,
            BridgeOutcome::OrderSummary {
                summary: CartSummary {
                    item_count: 2,
                    total: 17.25
                }
            }
        );
        assert!(bridge.client.submissions.lock().unwrap().is_empty());
        assert_eq!(bridge.client.clears.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_clears_the_cart() {
        let bridge = OrderBridge::new(RecordingClient::default());
        let outcome = bridge
            .on_confirmation(ConfirmationAction::Cancel, &items())
            .await;
        assert_eq!(outcome, BridgeOutcome::CartCleared);
        assert_eq!(bridge.client.clears.load(Ordering::SeqCst), 1);
    }
}
