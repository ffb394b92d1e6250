//! Order status and its transition table.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of an order.
///
/// ```text
/// CREATED ──► PAID ──► SHIPPED ──► DELIVERED
///    │          │
///    └──────────┴──► CANCELLED
/// ```
///
/// `CANCELLED` and `DELIVERED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Checked out, awaiting payment
    Created,
    /// Payment succeeded
    Paid,
    /// Cancelled by the customer or by a failed payment
    Cancelled,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Created,
        Self::Paid,
        Self::Cancelled,
        Self::Shipped,
        Self::Delivered,
    ];

    /// Statuses reachable in one step from `self`.
    pub const fn allowed_targets(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Paid, Self::Cancelled],
            Self::Paid => &[Self::Cancelled, Self::Shipped],
            Self::Shipped => &[Self::Delivered],
            Self::Cancelled | Self::Delivered => &[],
        }
    }

    /// Whether `target` is in the allowed targets of `self`.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// No transition leaves a terminal status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Delivered)
    }

    /// Line items are frozen once the order is cancelled or delivered.
    pub const fn is_closed_for_mutation(self) -> bool {
        self.is_terminal()
    }

    /// Canonical upper-case name, as stored and displayed.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
