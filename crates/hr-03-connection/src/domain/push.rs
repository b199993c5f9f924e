//! Events carried by the upstream push channel.

use shared_types::NotificationRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A notification record.
    Record(NotificationRecord),
    /// Liveness marker. Consumed and discarded.
    Keepalive,
    /// Server hello sent after the stream opens.
    Connected,
    /// The server is about to close the stream. When `should_reconnect` is
    /// false the server asks clients to stop pushing and poll instead.
    TimeoutWarning { should_reconnect: bool },
    /// Server-reported problem that does not close the stream.
    Error(String),
}
