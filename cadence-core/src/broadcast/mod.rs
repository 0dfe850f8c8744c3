mod broadcaster;
mod sink;
mod types;

pub use broadcaster::{BroadcastSettings, UpdateBroadcaster};
pub use sink::UpdateSink;
pub use types::{InstanceFilter, Property, PropertyKind, PropertyUpdate, SubscriptionEnd};

/// Correlation key under which sandbox instances are attached.
pub fn sandbox_key(module_id: &str) -> String {
    format!("sandbox:{}", module_id)
}
