use std::time::Duration;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WatchConfig {
    /// Repeated change signals of one file within this window are reported once
    pub debounce: Duration,

    /// How long worker sleeps when backend has no pending signals
    pub tick_rate: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            debounce: Duration::from_millis(10),
            tick_rate: Duration::from_millis(20),
        }
    }
}
