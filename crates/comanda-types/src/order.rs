//! Order-domain value types exchanged with the cart and order
//! collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line item in the current cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Menu item name as recognized from speech.
    pub name: String,
    /// Quantity ordered.
    pub quantity: u32,
    /// Unit price in the restaurant's currency.
    pub unit_price: f64,
    /// Free-form modifiers ("no onions", "extra cheese").
    #[serde(default)]
    pub notes: Option<String>,
}

impl OrderItem {
    /// Line total for this item.
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// What the speaker asked the order system to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAction {
    /// Submit the current cart as an order.
    Checkout,
    /// Read the cart back without side effects.
    Review,
    /// Clear the cart.
    Cancel,
}

impl ConfirmationAction {
    /// Parses the wire label used by the confirmation tool call.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "checkout" => Some(Self::Checkout),
            "review" => Some(Self::Review),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfirmationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Checkout => "checkout",
            Self::Review => "review",
            Self::Cancel => "cancel",
        })
    }
}

/// A confirmation intent decoded from the protocol.
///
/// Ephemeral: consumed immediately by the order bridge and not
/// retained anywhere in session state.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderConfirmation {
    /// The requested action.
    pub action: ConfirmationAction,
    /// When the intent was decoded.
    pub at: DateTime<Utc>,
}

impl OrderConfirmation {
    /// Creates a confirmation stamped with the current time.
    pub fn now(action: ConfirmationAction) -> Self {
        Self {
            action,
            at: Utc::now(),
        }
    }
}

/// Summary of the current cart, returned by the cart collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartSummary {
    /// Number of line items in the cart.
    pub item_count: u32,
    /// Cart total in the restaurant's currency.
    pub total: f64,
}

/// Result of submitting an order to the external order system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Whether the submission was accepted.
    pub success: bool,
    /// Identifier assigned by the order system, when accepted.
    #[serde(default)]
    pub order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_multiplies_quantity() {
        let item = OrderItem {
            name: "double burger".into(),
            quantity: 3,
            unit_price: 5.50,
            notes: None,
        };
        assert!((item.line_total() - 16.50).abs() < f64::EPSILON);
    }

    #[test]
    fn action_parses_known_labels_only() {
        assert_eq!(
            ConfirmationAction::parse("checkout"),
            Some(ConfirmationAction::Checkout)
        );
        assert_eq!(
            ConfirmationAction::parse("review"),
            Some(ConfirmationAction::Review)
        );
        assert_eq!(
            ConfirmationAction::parse("cancel"),
            Some(ConfirmationAction::Cancel)
        );
        assert_eq!(ConfirmationAction::parse("refund"), None);
    }

    #[test]
    fn receipt_deserializes_without_order_id() {
        let receipt: OrderReceipt = serde_json::from_str("{\"success\": false}").unwrap();
        assert!(!receipt.success);
        assert!(receipt.order_id.is_none());
    }
}
