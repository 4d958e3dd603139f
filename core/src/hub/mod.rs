//! Fan-out of live spectra and burst events to per-device subscriber sets.

pub mod broadcast;
pub mod subscription;
pub mod waterfall;

pub use broadcast::{HubConfig, SubscriptionHub, SubscriptionStats};
pub use subscription::{Channel, ClientId, HubEvent, Subscriber, Subscription};
pub use waterfall::WaterfallHistory;
