//! Configurable constants for the base station engine (spec §6).
//!
//! Every tunable named in the specification is a field here rather than a
//! literal scattered through the core modules. There is no file-backed
//! persistence for this struct — the JSON config file is an external
//! collaborator's concern — but callers embedding this crate can override
//! any default before constructing the node store, command queue, or radio
//! gateway.

/// Node id of the base station itself.
pub const BASE_STATION_ID: u8 = 0;
/// Broadcast node id.
pub const NODE_ID_BROADCAST: u8 = 255;

/// Engine-wide tunables, mirroring the "Configurable constants" table in
/// spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Maximum number of distinct nodes the store will track. Default 10.
    pub max_nodes: usize,
    /// Capacity of each node's in-memory history ring. Default 120.
    pub history_capacity: usize,
    /// Seconds without a packet before a node is marked offline. Default 300.
    pub offline_timeout_secs: u64,
    /// Seconds between base→node time-sync broadcasts. Default 10800 (3h).
    pub time_sync_interval_secs: u64,
    /// Maximum delivery attempts per outbound command. Default 3.
    pub retry_count: u8,
    /// Seconds before a command is eligible for retry. Default 12.
    pub retry_timeout_secs: u64,
    /// Radio receive poll timeout, in milliseconds. Default 500.
    pub radio_recv_timeout_ms: u64,
    /// TX loop tick cadence, in milliseconds. Default 20.
    pub tx_loop_tick_ms: u64,
    /// Watchdog scan interval, in seconds. Default 30.
    pub watchdog_interval_secs: u64,
    /// Default LoRa radio parameters, used by `RadioGateway::new` when no
    /// override is supplied.
    pub lora: LoraParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_nodes: 10,
            history_capacity: 120,
            offline_timeout_secs: 300,
            time_sync_interval_secs: 10_800,
            retry_count: 3,
            retry_timeout_secs: 12,
            radio_recv_timeout_ms: 500,
            tx_loop_tick_ms: 20,
            watchdog_interval_secs: 30,
            lora: LoraParams::default(),
        }
    }
}

/// LoRa radio initialization parameters (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraParams {
    /// Carrier frequency in MHz. Default 915.0.
    pub frequency_mhz: f32,
    /// Spreading factor. Default 10.
    pub spreading_factor: u8,
    /// Signal bandwidth in Hz. Default 125_000.
    pub bandwidth_hz: u32,
    /// Coding rate denominator (4/denominator). Default 5.
    pub coding_rate_denominator: u8,
    /// TX power in dBm. Default 20.
    pub tx_power_dbm: i8,
    /// Preamble length in symbols. Default 8.
    pub preamble_length: u16,
    /// Network id, used to derive the sync word `0x12 + (network_id % 244)`.
    pub network_id: u16,
}

impl Default for LoraParams {
    fn default() -> Self {
        Self {
            frequency_mhz: 915.0,
            spreading_factor: 10,
            bandwidth_hz: 125_000,
            coding_rate_denominator: 5,
            tx_power_dbm: 20,
            preamble_length: 8,
            network_id: 1,
        }
    }
}

impl LoraParams {
    /// Sync word derived from the network id: `0x12 + (network_id % 244)`.
    pub fn sync_word(&self) -> u8 {
        (0x12u16 + (self.network_id % 244)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.max_nodes, 10);
        assert_eq!(cfg.history_capacity, 120);
        assert_eq!(cfg.offline_timeout_secs, 300);
        assert_eq!(cfg.time_sync_interval_secs, 10_800);
        assert_eq!(cfg.retry_count, 3);
        assert_eq!(cfg.retry_timeout_secs, 12);
    }

    #[test]
    fn sync_word_wraps_at_244() {
        let params = LoraParams { network_id: 1, ..LoraParams::default() };
        assert_eq!(params.sync_word(), 0x13);
        let params = LoraParams { network_id: 244, ..LoraParams::default() };
        assert_eq!(params.sync_word(), 0x12);
        let params = LoraParams { network_id: 245, ..LoraParams::default() };
        assert_eq!(params.sync_word(), 0x13);
    }

    #[test]
    fn sync_word_does_not_overflow_near_the_top_of_the_byte_range() {
        // network_id % 244 == 238 pushes 0x12 + 238 = 256, one past the top
        // of a u8; this must wrap, not panic on overflow in debug builds.
        let params = LoraParams { network_id: 238, ..LoraParams::default() };
        assert_eq!(params.sync_word(), 0x00);
        // network_id % 244 == 243 (the largest possible remainder) wraps
        // to 0x12 + 243 - 256 = 5.
        let params = LoraParams { network_id: 243, ..LoraParams::default() };
        assert_eq!(params.sync_word(), 0x05);
    }
}
