//! The order aggregate: line items, status state machine and domain events.

mod aggregate;
mod events;
mod item;
mod status;

pub use aggregate::{Order, PersistedOrder};
pub use events::OrderEvent;
pub use item::OrderItem;
pub use status::{OrderStatus, UnknownStatus};
