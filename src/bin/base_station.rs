//! Demonstration binary wiring the base station engine together with a
//! stub radio. There is no hardware driver, HTTP API, or MQTT fan-out
//! here — those are external collaborators outside this crate's scope —
//! but the core engine runs exactly as it would with them attached.

use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};

use lss_basestation::command_queue::CommandQueue;
use lss_basestation::config::Config;
use lss_basestation::node_store::{NodeStore, SqliteStore};
use lss_basestation::radio::{RadioGateway, StubRadio};

fn main() {
    let matches = App::new("base-station")
        .version("0.1.0")
        .about("LSS base station packet protocol and node-management engine")
        .arg(
            Arg::with_name("db")
                .long("db")
                .value_name("PATH")
                .help("Path to the SQLite time-series database")
                .default_value("sensors.db")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("ping")
                .long("ping")
                .value_name("NODE_ID")
                .help("Enqueue a CMD_PING to the given node id and exit")
                .takes_value(true),
        )
        .get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::default();
    let db_path = matches.value_of("db").unwrap();
    let durable = SqliteStore::open(db_path).expect("failed to open sensor database");
    let store = Arc::new(NodeStore::new(Box::new(durable), config));
    let queue = Arc::new(CommandQueue::new(config));

    queue.set_result_callback(Box::new(|node_id, seq, command_type, success| {
        tracing::info!(node_id, seq, command_type, success, "command reached a terminal state");
    }));

    if let Some(node_id) = matches.value_of("ping").and_then(|s| s.parse::<u8>().ok()) {
        let seq = queue.enqueue_ping(node_id);
        tracing::info!(node_id, seq, "enqueued ping");
    }

    let mut gateway = RadioGateway::new(Box::new(StubRadio), store.clone(), queue, config);
    gateway.start();

    tracing::info!(nodes = store.node_count(), "base station running in stub mode");
    loop {
        std::thread::sleep(Duration::from_secs(60));
        tracing::debug!(nodes = store.node_count(), "heartbeat");
    }
}
