use std::time::Duration;

/// Defaults applied by a [`TransportChannel`](crate::TransportChannel).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Whole-call timeout used when a call does not set its own.
    /// Default: 2500ms.
    pub call_timeout: Duration,
    /// Connect timeout used when a call does not set its own.
    /// Default: 500ms.
    pub connect_timeout: Duration,
    /// Upper bound on each readiness poll while waiting for a response.
    /// Values below 1ms are rounded to zero by libcurl. Default: 1ms.
    pub select_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(2500),
            connect_timeout: Duration::from_millis(500),
            select_timeout: Duration::from_millis(1),
        }
    }
}

impl ChannelConfig {
    /// Resolve a per-call timeout, where zero means "use the channel default".
    pub(crate) fn call_timeout_or_default(&self, custom: Duration) -> Duration {
        if custom.is_zero() {
            self.call_timeout
        } else {
            custom
        }
    }

    pub(crate) fn connect_timeout_or_default(&self, custom: Duration) -> Duration {
        if custom.is_zero() {
            self.connect_timeout
        } else {
            custom
        }
    }
}
