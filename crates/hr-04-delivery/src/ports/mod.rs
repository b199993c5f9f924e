//! Ports for the delivery layer

pub mod inbound;
pub mod outbound;

pub use inbound::DeliveryApi;
pub use outbound::{PushStream, UpstreamApi};
