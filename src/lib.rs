//! # LSS Base Station — packet protocol and node-management engine
//!
//! The core of the base-station half of a low-power LoRa sensor network:
//! a wire codec for four frame kinds, a thread-safe node store with a
//! liveness watchdog and durable time-series mirror, an outbound command
//! queue with retry scheduling and ACK correlation, and a radio gateway
//! tying RX/TX loops to both of them.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lss_basestation::codec;
//! use lss_basestation::command_queue::CommandQueue;
//! use lss_basestation::config::Config;
//! use lss_basestation::node_store::{NodeStore, SqliteStore};
//! use lss_basestation::radio::{RadioGateway, StubRadio};
//!
//! let config = Config::default();
//! let store = Arc::new(NodeStore::new(
//!     Box::new(SqliteStore::open_in_memory().unwrap()),
//!     config,
//! ));
//! let queue = Arc::new(CommandQueue::new(config));
//! let mut gateway = RadioGateway::new(Box::new(StubRadio), store, queue, config);
//! gateway.start();
//! gateway.stop();
//! # let _ = codec::crc16(b"");
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] — wire framing, CRC-16, parse/build for every frame kind
//! - [`error`] — the error taxonomy shared across subsystems
//! - [`config`] — engine-wide tunables with documented defaults
//! - [`node_store`] — live node state, durable mirror, watchdog
//! - [`command_queue`] — outbound commands, retry scheduling, ACK correlation
//! - [`radio`] — the transceiver abstraction and the gateway tying it together

pub mod codec;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod node_store;
pub mod radio;

pub use command_queue::CommandQueue;
pub use config::Config;
pub use node_store::NodeStore;
pub use radio::RadioGateway;
