//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external collaborators. Services depend
//! only on these traits, not on concrete implementations.

mod clock;
mod notifier;

pub use clock::Clock;
pub use notifier::NotificationSender;
