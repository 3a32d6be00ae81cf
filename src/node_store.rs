//! Authoritative live node state plus a durable time-series mirror.
//!
//! [`NodeStore`] is the thread-safe repository the radio gateway's
//! dispatcher feeds on every ingested telemetry frame. A single mutex
//! guards the node map; the watchdog thread holds it for the duration of
//! its scan, same as ingestion.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use serde::Serialize;

use crate::codec::{LegacyPacket, MultiSensorPacket, ValueType, BASE_STATION_ID, NODE_ID_BROADCAST};
use crate::config::Config;
use crate::error::StoreError;

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Last-known state for a single sensor node. Accessor methods on
/// [`NodeStore`] return snapshots of this type; callers cannot mutate the
/// store through it. `Serialize` is derived so the external API and MQTT
/// fan-out collaborators (out of scope here) can turn a snapshot straight
/// into JSON without this crate knowing anything about either of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeState {
    pub node_id: u8,
    pub location: String,
    pub zone: String,
    pub battery_percent: u8,
    pub power_state: u8,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub last_seen: f64,
    pub online: bool,
    pub values: HashMap<u8, f32>,
}

impl NodeState {
    fn new(node_id: u8) -> Self {
        Self {
            node_id,
            location: String::new(),
            zone: String::new(),
            battery_percent: 0,
            power_state: 0,
            rssi: None,
            snr: None,
            last_seen: 0.0,
            online: false,
            values: HashMap::new(),
        }
    }
}

/// One time-series sample, kept in the in-memory ring and mirrored to the
/// durable store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: f64,
    pub battery_percent: u8,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub values: HashMap<u8, f32>,
}

/// One row as returned by [`NodeStore::get_history`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub timestamp: f64,
    pub battery_percent: u8,
    pub rssi: Option<f32>,
    pub snr: Option<f32>,
    pub values: HashMap<u8, f32>,
}

/// The durable time-series sink `NodeStore` mirrors every reading into.
/// Modeled as a trait so the SQLite-backed implementation can be swapped
/// for an in-memory fake in tests without touching `NodeStore` itself.
pub trait DurableStore: Send {
    fn write_history(&self, node_id: u8, point: &HistoryPoint) -> Result<(), StoreError>;
    fn read_history(&self, node_id: u8, limit: usize, since: f64) -> Result<Vec<HistoryRow>, StoreError>;
}

/// SQLite-backed [`DurableStore`], matching spec.md §4.3's schema: one
/// append-only table, indexed on `(node_id, timestamp)`. The value map is
/// serialized as `key=value` pairs joined by `;` — an internal encoding
/// not observed outside this reader.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema
    /// exists.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::StoreIo(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database, useful for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::StoreIo(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sensor_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id         INTEGER NOT NULL,
                timestamp       REAL NOT NULL,
                battery_percent INTEGER,
                rssi            REAL,
                snr             REAL,
                values_kv       TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_node_ts ON sensor_history (node_id, timestamp);",
        )
        .map_err(|e| StoreError::StoreIo(e.to_string()))
    }

    fn encode_values(values: &HashMap<u8, f32>) -> String {
        let mut pairs: Vec<(u8, f32)> = values.iter().map(|(&k, &v)| (k, v)).collect();
        pairs.sort_by_key(|&(k, _)| k);
        pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn decode_values(raw: &str) -> HashMap<u8, f32> {
        raw.split(';')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.parse::<u8>().ok()?, v.parse::<f32>().ok()?))
            })
            .collect()
    }
}

impl DurableStore for SqliteStore {
    fn write_history(&self, node_id: u8, point: &HistoryPoint) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute(
            "INSERT INTO sensor_history (node_id, timestamp, battery_percent, rssi, snr, values_kv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                node_id,
                point.timestamp,
                point.battery_percent,
                point.rssi,
                point.snr,
                Self::encode_values(&point.values),
            ],
        )
        .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        Ok(())
    }

    fn read_history(&self, node_id: u8, limit: usize, since: f64) -> Result<Vec<HistoryRow>, StoreError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT timestamp, battery_percent, rssi, snr, values_kv
                 FROM sensor_history
                 WHERE node_id = ?1 AND timestamp >= ?2
                 ORDER BY timestamp ASC LIMIT ?3",
            )
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![node_id, since, limit as i64], |row| {
                let values_kv: String = row.get(4)?;
                Ok(HistoryRow {
                    timestamp: row.get(0)?,
                    battery_percent: row.get(1)?,
                    rssi: row.get(2)?,
                    snr: row.get(3)?,
                    values: Self::decode_values(&values_kv),
                })
            })
            .map_err(|e| StoreError::StoreIo(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| StoreError::StoreIo(e.to_string()))?);
        }
        Ok(out)
    }
}

struct TrackedNode {
    state: NodeState,
    history: VecDeque<HistoryPoint>,
}

/// Thread-safe repository of per-node live state, mirroring every reading
/// into a [`DurableStore`] and running a liveness watchdog.
pub struct NodeStore {
    nodes: Mutex<HashMap<u8, TrackedNode>>,
    durable: Box<dyn DurableStore>,
    config: Config,
}

impl NodeStore {
    pub fn new(durable: Box<dyn DurableStore>, config: Config) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            durable,
            config,
        }
    }

    /// Record a multi-sensor telemetry packet. Reserved sensor ids are
    /// dropped silently (logged at DEBUG); creation beyond `max_nodes` is
    /// dropped and logged at WARN. A durable-write failure is logged and
    /// does not affect the in-memory update.
    pub fn ingest_multi(&self, packet: &MultiSensorPacket) {
        let nid = packet.sensor_id;
        if nid == BASE_STATION_ID || nid == NODE_ID_BROADCAST {
            tracing::debug!(node_id = nid, "dropping packet from reserved node id");
            return;
        }
        let point = {
            let mut nodes = self.nodes.lock().expect("node store mutex poisoned");
            let Some(tracked) = self.get_or_create_locked(&mut nodes, nid) else {
                return;
            };
            if !packet.location.is_empty() {
                tracked.state.location = packet.location.clone();
            }
            if !packet.zone.is_empty() {
                tracked.state.zone = packet.zone.clone();
            }
            tracked.state.battery_percent = packet.battery_percent;
            tracked.state.power_state = packet.power_state;
            tracked.state.rssi = packet.rssi;
            tracked.state.snr = packet.snr;
            tracked.state.last_seen = now_unix();
            tracked.state.online = true;
            for value in &packet.values {
                tracked.state.values.insert(value.type_code, value.value);
            }
            let point = HistoryPoint {
                timestamp: tracked.state.last_seen,
                battery_percent: tracked.state.battery_percent,
                rssi: tracked.state.rssi,
                snr: tracked.state.snr,
                values: tracked.state.values.clone(),
            };
            if tracked.history.len() >= self.config.history_capacity {
                tracked.history.pop_front();
            }
            tracked.history.push_back(point.clone());
            point
        };
        if let Err(err) = self.durable.write_history(nid, &point) {
            tracing::error!(node_id = nid, error = %err, "durable history write failed");
        }
    }

    /// Record a legacy v1 telemetry packet. `rssi`/`snr` are preferred
    /// from radio metadata, falling back to the frame's own fields.
    pub fn ingest_legacy(&self, packet: &LegacyPacket, rssi: Option<f32>, snr: Option<f32>) {
        let nid = packet.sensor_id;
        if nid == BASE_STATION_ID || nid == NODE_ID_BROADCAST {
            tracing::debug!(node_id = nid, "dropping legacy packet from reserved node id");
            return;
        }
        let point = {
            let mut nodes = self.nodes.lock().expect("node store mutex poisoned");
            let Some(tracked) = self.get_or_create_locked(&mut nodes, nid) else {
                return;
            };
            tracked.state.battery_percent = packet.battery_percent;
            tracked.state.rssi = rssi.or(Some(packet.rssi as f32));
            tracked.state.snr = snr.or(Some(packet.snr));
            tracked.state.last_seen = now_unix();
            tracked.state.online = true;
            tracked
                .state
                .values
                .insert(ValueType::Temperature as u8, packet.temperature);
            tracked
                .state
                .values
                .insert(ValueType::Humidity as u8, packet.humidity);
            let point = HistoryPoint {
                timestamp: tracked.state.last_seen,
                battery_percent: tracked.state.battery_percent,
                rssi: tracked.state.rssi,
                snr: tracked.state.snr,
                values: tracked.state.values.clone(),
            };
            if tracked.history.len() >= self.config.history_capacity {
                tracked.history.pop_front();
            }
            tracked.history.push_back(point.clone());
            point
        };
        if let Err(err) = self.durable.write_history(nid, &point) {
            tracing::error!(node_id = nid, error = %err, "durable history write failed");
        }
    }

    /// Return a snapshot of a single node's state, or `None` if unknown.
    pub fn get_node(&self, node_id: u8) -> Option<NodeState> {
        let nodes = self.nodes.lock().expect("node store mutex poisoned");
        nodes.get(&node_id).map(|t| t.state.clone())
    }

    /// Return snapshots of every tracked node.
    pub fn get_all_nodes(&self) -> Vec<NodeState> {
        let nodes = self.nodes.lock().expect("node store mutex poisoned");
        nodes.values().map(|t| t.state.clone()).collect()
    }

    /// Number of currently-tracked nodes.
    pub fn node_count(&self) -> usize {
        let nodes = self.nodes.lock().expect("node store mutex poisoned");
        nodes.len()
    }

    /// Durable time-series rows for `node_id`, ascending by timestamp. An
    /// unknown node yields an empty list, never an error.
    pub fn get_history(&self, node_id: u8, limit: usize, since: f64) -> Vec<HistoryRow> {
        match self.durable.read_history(node_id, limit, since) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(node_id, error = %err, "history query failed");
                Vec::new()
            }
        }
    }

    /// Scan every tracked node and transition any that have been silent
    /// longer than `offline_timeout_secs` to offline. Intended to be
    /// called periodically from a dedicated watchdog thread.
    pub fn watchdog_tick(&self) {
        let now = now_unix();
        let mut nodes = self.nodes.lock().expect("node store mutex poisoned");
        for tracked in nodes.values_mut() {
            if tracked.state.online
                && now - tracked.state.last_seen > self.config.offline_timeout_secs as f64
            {
                tracked.state.online = false;
                tracing::info!(
                    node_id = tracked.state.node_id,
                    idle_secs = now - tracked.state.last_seen,
                    "node marked offline"
                );
            }
        }
    }

    /// Run the watchdog loop on the current thread until `shutdown`
    /// returns `true`. Intended to be spawned on a dedicated thread by the
    /// radio gateway.
    pub fn run_watchdog(&self, shutdown: impl Fn() -> bool) {
        let interval = Duration::from_secs(self.config.watchdog_interval_secs);
        while !shutdown() {
            std::thread::sleep(interval);
            if shutdown() {
                break;
            }
            self.watchdog_tick();
        }
    }

    fn get_or_create_locked<'a>(
        &self,
        nodes: &'a mut HashMap<u8, TrackedNode>,
        node_id: u8,
    ) -> Option<&'a mut TrackedNode> {
        if !nodes.contains_key(&node_id) {
            if nodes.len() >= self.config.max_nodes {
                tracing::warn!(
                    node_id,
                    max_nodes = self.config.max_nodes,
                    "population cap reached; ignoring node"
                );
                return None;
            }
            tracing::info!(node_id, "registered new node");
            nodes.insert(
                node_id,
                TrackedNode {
                    state: NodeState::new(node_id),
                    history: VecDeque::with_capacity(self.config.history_capacity),
                },
            );
        }
        nodes.get_mut(&node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SensorValue;

    fn store() -> NodeStore {
        NodeStore::new(Box::new(SqliteStore::open_in_memory().unwrap()), Config::default())
    }

    fn multi_packet(sensor_id: u8) -> MultiSensorPacket {
        MultiSensorPacket {
            network_id: 1,
            sensor_id,
            battery_percent: 80,
            power_state: 0,
            last_command_seq: 0,
            ack_status: 0,
            location: "Garage".into(),
            zone: "Zone1".into(),
            values: vec![SensorValue { type_code: 0, value: 22.5 }],
            rssi: Some(-60.0),
            snr: Some(9.0),
        }
    }

    #[test]
    fn reserved_sensor_ids_never_create_a_node() {
        let store = store();
        store.ingest_multi(&multi_packet(BASE_STATION_ID));
        store.ingest_multi(&multi_packet(NODE_ID_BROADCAST));
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn population_cap_is_enforced() {
        let mut cfg = Config::default();
        cfg.max_nodes = 2;
        let store = NodeStore::new(Box::new(SqliteStore::open_in_memory().unwrap()), cfg);
        store.ingest_multi(&multi_packet(1));
        store.ingest_multi(&multi_packet(2));
        store.ingest_multi(&multi_packet(3));
        assert_eq!(store.node_count(), 2);
        assert!(store.get_node(3).is_none());
    }

    #[test]
    fn non_empty_location_overwrites_empty_does_not() {
        let store = store();
        store.ingest_multi(&multi_packet(5));
        let mut blank = multi_packet(5);
        blank.location = String::new();
        blank.zone = String::new();
        store.ingest_multi(&blank);
        let node = store.get_node(5).unwrap();
        assert_eq!(node.location, "Garage");
        assert_eq!(node.zone, "Zone1");
    }

    #[test]
    fn watchdog_marks_idle_node_offline() {
        let store = store();
        store.ingest_multi(&multi_packet(10));
        {
            let mut nodes = store.nodes.lock().unwrap();
            nodes.get_mut(&10).unwrap().state.last_seen = 0.0;
        }
        store.watchdog_tick();
        assert!(!store.get_node(10).unwrap().online);
    }

    #[test]
    fn history_round_trips_through_durable_store() {
        let store = store();
        store.ingest_multi(&multi_packet(7));
        let rows = store.get_history(7, 100, 0.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].battery_percent, 80);
        assert_eq!(rows[0].values.get(&0), Some(&22.5));
    }

    #[test]
    fn history_for_unknown_node_is_empty_not_error() {
        let store = store();
        assert!(store.get_history(250, 10, 0.0).is_empty());
    }

    #[test]
    fn node_state_serializes_to_json_for_external_collaborators() {
        let store = store();
        store.ingest_multi(&multi_packet(4));
        let node = store.get_node(4).unwrap();
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"location\":\"Garage\""));
        assert!(json.contains("\"node_id\":4"));
    }
}
