//! Shared types for the Comanda voice ordering session engine.
//!
//! This crate provides the foundational types used across all Comanda
//! crates: the session identity model, the connection state machine,
//! and the order-domain value types exchanged with the external cart
//! and order collaborators.
//!
//! No crate in the workspace depends on anything *except*
//! `comanda-types` for cross-cutting type definitions. This keeps the
//! dependency graph clean and prevents circular dependencies.

mod order;
mod session;
mod state;

pub use order::{
    CartSummary, ConfirmationAction, OrderConfirmation, OrderItem, OrderReceipt,
};
pub use session::{Session, SessionMode};
pub use state::ConnectionState;
