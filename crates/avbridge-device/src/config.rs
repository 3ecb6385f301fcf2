/// Block size reported for block devices and used by read-ahead fetches.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Device table configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Fetch granularity for read-ahead devices.
    pub block_size: usize,
    /// Park the calling thread inside a trap until the device is ready,
    /// instead of answering `EAGAIN`. Only valid when the engine runs on a
    /// thread of its own.
    pub blocking_reads: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            blocking_reads: false,
        }
    }
}
