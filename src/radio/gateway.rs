//! Owns the transceiver and runs the RX/TX loops and dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::codec::{self, command_type, FrameKind};
use crate::command_queue::CommandQueue;
use crate::config::Config;
use crate::node_store::NodeStore;

use super::transceiver::RadioTransceiver;

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Radio introspection snapshot, for an external API collaborator to read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadioStatus {
    pub available: bool,
    pub frequency_mhz: f32,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub tx_power_dbm: i8,
}

struct Shared {
    store: Arc<NodeStore>,
    queue: Arc<CommandQueue>,
    config: Config,
    last_time_sync: Mutex<f64>,
}

impl Shared {
    /// Route a raw received frame to the right parser and handler.
    /// Unrecognized sync words and malformed frames are logged and
    /// dropped; nothing here is surfaced back to the sender.
    fn dispatch(&self, raw: &[u8], rssi: Option<f32>, snr: Option<f32>) {
        let Some(kind) = codec::detect_kind(raw) else {
            tracing::info!(len = raw.len(), "unrecognized frame");
            return;
        };
        match kind {
            FrameKind::Multi => match codec::parse_multi(raw, rssi, snr) {
                Ok(packet) => {
                    self.store.ingest_multi(&packet);
                    self.queue.process_piggyback_ack(
                        packet.sensor_id,
                        packet.last_command_seq,
                        packet.ack_status,
                    );
                }
                Err(err) => tracing::warn!(error = %err, "failed to parse multi-sensor frame"),
            },
            FrameKind::Legacy => match codec::parse_legacy(raw) {
                Ok(packet) => self.store.ingest_legacy(&packet, rssi, snr),
                Err(err) => tracing::warn!(error = %err, "failed to parse legacy frame"),
            },
            FrameKind::Ack => match codec::parse_ack(raw) {
                Ok(packet) => {
                    let success = packet.command_type == command_type::ACK;
                    self.queue
                        .process_ack(packet.target_sensor_id, packet.sequence_number, success);
                }
                Err(err) => tracing::warn!(error = %err, "failed to parse ack frame"),
            },
            FrameKind::Command => match codec::parse_command(raw) {
                Ok(packet) if packet.command_type == command_type::SENSOR_ANNOUNCE => {
                    tracing::info!(node_id = packet.target_sensor_id, "node announced");
                    let epoch = now_unix() as u32;
                    self.queue.enqueue_base_welcome(packet.target_sensor_id, epoch, 0);
                }
                Ok(packet) => {
                    tracing::info!(command_type = packet.command_type, "dropping inbound command frame");
                }
                Err(err) => tracing::warn!(error = %err, "failed to parse command frame"),
            },
        }
    }

    /// Broadcast a time-sync to every online node if the interval has
    /// elapsed. Per-node unicast enqueue, not a broadcast-address command
    /// — see DESIGN.md's Open Questions.
    fn maybe_send_time_sync(&self) {
        let now = now_unix();
        let mut last = self.last_time_sync.lock().expect("time sync mutex poisoned");
        if now - *last < self.config.time_sync_interval_secs as f64 {
            return;
        }
        *last = now;
        for node in self.store.get_all_nodes() {
            if node.online {
                self.queue.enqueue_time_sync(node.node_id, now as u32, 0);
            }
        }
        tracing::info!("time sync queued for all online nodes");
    }
}

/// Owns the single transceiver and runs the RX loop, TX loop, and node
/// store watchdog on dedicated OS threads.
pub struct RadioGateway {
    shared: Arc<Shared>,
    radio: Arc<Mutex<Box<dyn RadioTransceiver>>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl RadioGateway {
    pub fn new(
        radio: Box<dyn RadioTransceiver>,
        store: Arc<NodeStore>,
        queue: Arc<CommandQueue>,
        config: Config,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                queue,
                config,
                // Set at construction, not zero, so the first TX tick
                // never fires a spurious time-sync broadcast.
                last_time_sync: Mutex::new(now_unix()),
            }),
            radio: Arc::new(Mutex::new(radio)),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        }
    }

    /// Radio introspection snapshot.
    pub fn status(&self) -> RadioStatus {
        let radio = self.radio.lock().expect("radio mutex poisoned");
        let lora = &self.shared.config.lora;
        RadioStatus {
            available: radio.is_hardware_available(),
            frequency_mhz: lora.frequency_mhz,
            spreading_factor: lora.spreading_factor,
            bandwidth_hz: lora.bandwidth_hz,
            tx_power_dbm: lora.tx_power_dbm,
        }
    }

    /// Start the RX loop, TX loop, and watchdog threads.
    pub fn start(&mut self) {
        self.threads.push(self.spawn_rx_loop());
        self.threads.push(self.spawn_tx_loop());
        self.threads.push(self.spawn_watchdog());
        tracing::info!(hardware = self.status().available, "radio gateway started");
    }

    /// Signal all background threads to exit. Does not join them; callers
    /// that need to block until shutdown completes should keep the
    /// `JoinHandle`s returned by a future API or simply let the process
    /// exit once the shutdown flag is observed.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn spawn_rx_loop(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let radio = self.radio.clone();
        let shutdown = self.shutdown.clone();
        let timeout_ms = shared.config.radio_recv_timeout_ms;
        std::thread::Builder::new()
            .name("lss-radio-rx".into())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    let received = {
                        let mut radio = radio.lock().expect("radio mutex poisoned");
                        radio.receive(timeout_ms)
                    };
                    match received {
                        Ok(Some(frame)) => {
                            tracing::info!(len = frame.bytes.len(), "received frame");
                            shared.dispatch(&frame.bytes, frame.rssi, frame.snr);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "radio receive error");
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .expect("failed to spawn lss-radio-rx thread")
    }

    fn spawn_tx_loop(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let radio = self.radio.clone();
        let shutdown = self.shutdown.clone();
        let tick = Duration::from_millis(shared.config.tx_loop_tick_ms);
        std::thread::Builder::new()
            .name("lss-radio-tx".into())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    shared.maybe_send_time_sync();
                    if let Some(cmd) = shared.queue.next_due() {
                        let raw = cmd.raw_packet();
                        let sent = {
                            let mut radio = radio.lock().expect("radio mutex poisoned");
                            radio.send(&raw, cmd.node_id)
                        };
                        match sent {
                            Ok(()) => shared.queue.mark_sent(cmd.sequence_number),
                            Err(err) => {
                                // A local send failure is not evidence of peer
                                // failure: leave mark_sent uncalled so the
                                // entry is retried on the next eligible tick,
                                // at no cost to the retry budget.
                                tracing::error!(error = %err, seq = cmd.sequence_number, "radio send failed");
                            }
                        }
                    }
                    shared.queue.purge_completed();
                    std::thread::sleep(tick);
                }
            })
            .expect("failed to spawn lss-radio-tx thread")
    }

    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        std::thread::Builder::new()
            .name("lss-node-watchdog".into())
            .spawn(move || {
                shared.store.run_watchdog(|| shutdown.load(Ordering::SeqCst));
            })
            .expect("failed to spawn lss-node-watchdog thread")
    }
}
