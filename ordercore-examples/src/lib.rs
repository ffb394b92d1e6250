//! Example applications built on `OrderCore`
//!
//! The [`checkout`] module wires the order and inventory services, the
//! choreography coordinator, the outbox relay and a partitioned consumer
//! over the in-memory backend, and walks one customer from cart to
//! delivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// These are examples, so we don't need to be as pedantic
#![allow(clippy::missing_const_for_fn)]

/// Checkout walkthrough: cart, payment, stock reduction and fulfillment
pub mod checkout;
