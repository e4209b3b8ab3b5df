//! Delivery core: routing live events and re-pushing stored ones.

pub mod message_router;
pub mod notification_router;
pub mod reconciler;

pub use message_router::MessageRouter;
pub use notification_router::NotificationRouter;
pub use reconciler::{PassReport, Reconciler, WatermarkPolicy};
