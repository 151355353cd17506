//! Broker instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const MESSAGES_TOTAL: &str = "switchboard_messages_total";
    pub const CHANNELS_ACTIVE: &str = "switchboard_channels_active";
    pub const REJECTIONS_TOTAL: &str = "switchboard_rejections_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since broker start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Total number of messages, by direction"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of registered channels");
    metrics::describe_counter!(
        names::REJECTIONS_TOTAL,
        "Connections closed with a policy violation, by reason"
    );
}

/// Record an inbound client message.
pub fn record_inbound() {
    counter!(names::MESSAGES_TOTAL, "direction" => "inbound").increment(1);
}

/// Record one broadcast delivered to `recipients` sockets.
pub fn record_outbound(recipients: usize) {
    counter!(names::MESSAGES_TOTAL, "direction" => "outbound").increment(recipients as u64);
}

/// Record a rejected connection.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Update the registered channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Counts a connection as active for its lifetime.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a guard, recording a new connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_inbound();
        record_outbound(3);
        record_rejection("auth/failed");
        set_active_channels(1);
    }
}
