//! Outbound command queue: sequence numbers, retry scheduling, and ACK
//! correlation (standalone and piggybacked).

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::codec::{self, command_type};
use crate::config::Config;

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A command awaiting delivery to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub node_id: u8,
    pub command_type: u8,
    pub sequence_number: u8,
    pub data: Vec<u8>,
    pub enqueued_at: f64,
    pub attempts: u8,
    pub last_attempt_at: f64,
    pub acked: bool,
    pub failed: bool,
}

impl PendingCommand {
    /// Serialize this entry to a ready-to-transmit wire frame.
    pub fn raw_packet(&self) -> Vec<u8> {
        codec::build_command(self.command_type, self.node_id, self.sequence_number, &self.data)
            .expect("queued command data already validated at enqueue time")
    }
}

/// A read-only summary of a pending command, as returned by
/// [`CommandQueue::all_pending`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingSummary {
    pub node_id: u8,
    pub command_type: u8,
    pub sequence_number: u8,
    pub attempts: u8,
    pub acked: bool,
    pub failed: bool,
    pub enqueued_at: f64,
}

/// Result of a command reaching a terminal state: `(node_id, seq,
/// command_type, success)`.
pub type ResultCallback = Box<dyn Fn(u8, u8, u8, bool) + Send>;

struct Inner {
    queue: Vec<PendingCommand>,
    next_seq: u8,
    on_result: Option<ResultCallback>,
}

/// Thread-safe outbound command queue. A single mutex guards the queue
/// vector, the sequence generator, and the result callback invocation —
/// the callback therefore runs with the lock held and must not re-enter
/// the queue or block on I/O (spec.md §5).
pub struct CommandQueue {
    inner: Mutex<Inner>,
    config: Config,
}

impl CommandQueue {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: Vec::new(),
                next_seq: 1, // 0 is reserved as the "no piggybacked ack" sentinel
                on_result: None,
            }),
            config,
        }
    }

    /// Register a callback invoked when a command reaches a terminal
    /// state. At most one callback is registered at a time; a later call
    /// replaces an earlier one.
    pub fn set_result_callback(&self, cb: ResultCallback) {
        self.inner.lock().expect("command queue mutex poisoned").on_result = Some(cb);
    }

    /// Allocate a sequence number and enqueue a command. Returns the
    /// assigned sequence.
    pub fn enqueue(&self, node_id: u8, command_type: u8, data: Vec<u8>) -> u8 {
        let mut inner = self.inner.lock().expect("command queue mutex poisoned");
        let seq = inner.next_seq;
        inner.next_seq = inner.next_seq.wrapping_add(1);
        inner.queue.push(PendingCommand {
            node_id,
            command_type,
            sequence_number: seq,
            data,
            enqueued_at: now_unix(),
            attempts: 0,
            last_attempt_at: 0.0,
            acked: false,
            failed: false,
        });
        tracing::debug!(node_id, command_type, seq, "enqueued command");
        seq
    }

    /// Return the next command due for (re)transmission, or `None`.
    /// Scans active entries in insertion order; retry-exhaustion detection
    /// and the terminal-failure callback fire inline as exhausted entries
    /// are encountered, in the same pass that looks for a due entry — not
    /// a separate sweep.
    pub fn next_due(&self) -> Option<PendingCommand> {
        let now = now_unix();
        let mut inner = self.inner.lock().expect("command queue mutex poisoned");
        let retry_timeout = self.config.retry_timeout_secs as f64;
        let retry_count = self.config.retry_count;

        let mut due_index = None;
        for idx in 0..inner.queue.len() {
            let cmd = &inner.queue[idx];
            if cmd.acked || cmd.failed {
                continue;
            }
            if cmd.attempts == 0 {
                due_index = Some(idx);
                break;
            }
            let elapsed = now - cmd.last_attempt_at;
            if elapsed < retry_timeout {
                continue;
            }
            if cmd.attempts < retry_count {
                due_index = Some(idx);
                break;
            }
            inner.queue[idx].failed = true;
            let cmd = inner.queue[idx].clone();
            tracing::warn!(
                seq = cmd.sequence_number,
                command_type = cmd.command_type,
                node_id = cmd.node_id,
                retry_count,
                "command exhausted all retries"
            );
            Self::fire_result(&mut inner, &cmd, false);
        }
        due_index.map(|idx| inner.queue[idx].clone())
    }

    /// Record a transmission attempt. Silent if `seq` has no match.
    pub fn mark_sent(&self, seq: u8) {
        let now = now_unix();
        let mut inner = self.inner.lock().expect("command queue mutex poisoned");
        if let Some(cmd) = inner.queue.iter_mut().find(|c| c.sequence_number == seq) {
            cmd.attempts += 1;
            cmd.last_attempt_at = now;
        }
    }

    /// Mark a pending command ACKed or NACKed. Returns `true` if a
    /// matching entry (with agreeing node id) was found.
    pub fn process_ack(&self, node_id: u8, seq: u8, success: bool) -> bool {
        let mut inner = self.inner.lock().expect("command queue mutex poisoned");
        let Some(idx) = inner.queue.iter().position(|c| c.sequence_number == seq) else {
            return false;
        };
        if inner.queue[idx].node_id != node_id {
            return false;
        }
        if inner.queue[idx].acked || inner.queue[idx].failed {
            // Idempotent: already terminal, no refire.
            return true;
        }
        if success {
            inner.queue[idx].acked = true;
        } else {
            inner.queue[idx].failed = true;
        }
        let cmd = inner.queue[idx].clone();
        Self::fire_result(&mut inner, &cmd, success);
        true
    }

    /// Handle ACK information piggybacked in a telemetry header. A
    /// `last_seq` of `0` is a no-op sentinel meaning "no ack present".
    pub fn process_piggyback_ack(&self, node_id: u8, last_seq: u8, ack_status: u8) {
        if last_seq == 0 {
            return;
        }
        self.process_ack(node_id, last_seq, ack_status == 0);
    }

    /// Active (non-terminal) commands targeting `node_id`.
    pub fn pending_for_node(&self, node_id: u8) -> Vec<PendingCommand> {
        let inner = self.inner.lock().expect("command queue mutex poisoned");
        inner
            .queue
            .iter()
            .filter(|c| c.node_id == node_id && !c.acked && !c.failed)
            .cloned()
            .collect()
    }

    /// Summaries of every active (non-terminal) command.
    pub fn all_pending(&self) -> Vec<PendingSummary> {
        let inner = self.inner.lock().expect("command queue mutex poisoned");
        inner
            .queue
            .iter()
            .filter(|c| !c.acked && !c.failed)
            .map(|c| PendingSummary {
                node_id: c.node_id,
                command_type: c.command_type,
                sequence_number: c.sequence_number,
                attempts: c.attempts,
                acked: c.acked,
                failed: c.failed,
                enqueued_at: c.enqueued_at,
            })
            .collect()
    }

    /// Remove every acked/failed entry. Returns the count removed.
    pub fn purge_completed(&self) -> usize {
        let mut inner = self.inner.lock().expect("command queue mutex poisoned");
        let before = inner.queue.len();
        inner.queue.retain(|c| !c.acked && !c.failed);
        before - inner.queue.len()
    }

    fn fire_result(inner: &mut Inner, cmd: &PendingCommand, success: bool) {
        if let Some(cb) = &inner.on_result {
            cb(cmd.node_id, cmd.sequence_number, cmd.command_type, success);
        }
    }

    // ------------------------------------------------------------------
    // Command factory helpers (spec.md §4.4)
    // ------------------------------------------------------------------

    pub fn enqueue_ping(&self, node_id: u8) -> u8 {
        self.enqueue(node_id, command_type::PING, Vec::new())
    }

    pub fn enqueue_set_interval(&self, node_id: u8, interval_ms: u32) -> u8 {
        self.enqueue(node_id, command_type::SET_INTERVAL, interval_ms.to_le_bytes().to_vec())
    }

    pub fn enqueue_set_location(&self, node_id: u8, location: &str, zone: &str) -> u8 {
        let mut data = vec![0u8; 48];
        let loc_bytes = location.as_bytes();
        let loc_len = loc_bytes.len().min(31);
        data[..loc_len].copy_from_slice(&loc_bytes[..loc_len]);
        let zone_bytes = zone.as_bytes();
        let zone_len = zone_bytes.len().min(15);
        data[32..32 + zone_len].copy_from_slice(&zone_bytes[..zone_len]);
        self.enqueue(node_id, command_type::SET_LOCATION, data)
    }

    pub fn enqueue_set_temp_thresh(&self, node_id: u8, low: f32, high: f32) -> u8 {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&low.to_le_bytes());
        data.extend_from_slice(&high.to_le_bytes());
        self.enqueue(node_id, command_type::SET_TEMP_THRESH, data)
    }

    pub fn enqueue_set_battery_thresh(&self, node_id: u8, low: f32, critical: f32) -> u8 {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&low.to_le_bytes());
        data.extend_from_slice(&critical.to_le_bytes());
        self.enqueue(node_id, command_type::SET_BATTERY_THRESH, data)
    }

    pub fn enqueue_time_sync(&self, node_id: u8, utc_epoch: u32, tz_offset_min: i16) -> u8 {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&utc_epoch.to_le_bytes());
        data.extend_from_slice(&tz_offset_min.to_le_bytes());
        self.enqueue(node_id, command_type::TIME_SYNC, data)
    }

    pub fn enqueue_base_welcome(&self, node_id: u8, utc_epoch: u32, tz_offset_min: i16) -> u8 {
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&utc_epoch.to_le_bytes());
        data.extend_from_slice(&tz_offset_min.to_le_bytes());
        self.enqueue(node_id, command_type::BASE_WELCOME, data)
    }

    pub fn enqueue_set_lora_params(&self, node_id: u8, frequency_mhz: f32, sf: u8, tx_power: u8) -> u8 {
        let mut data = Vec::with_capacity(7);
        data.extend_from_slice(&frequency_mhz.to_le_bytes());
        data.push(sf);
        data.push(0); // reserved
        data.push(tx_power);
        self.enqueue(node_id, command_type::SET_LORA_PARAMS, data)
    }

    pub fn enqueue_set_mesh_config(&self, node_id: u8, enabled: bool) -> u8 {
        self.enqueue(node_id, command_type::SET_MESH_CONFIG, vec![u8::from(enabled)])
    }

    pub fn enqueue_restart(&self, node_id: u8) -> u8 {
        self.enqueue(node_id, command_type::RESTART, Vec::new())
    }

    pub fn enqueue_factory_reset(&self, node_id: u8) -> u8 {
        self.enqueue(node_id, command_type::FACTORY_RESET, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn queue_with(retry_count: u8, retry_timeout_secs: u64) -> CommandQueue {
        let mut cfg = Config::default();
        cfg.retry_count = retry_count;
        cfg.retry_timeout_secs = retry_timeout_secs;
        CommandQueue::new(cfg)
    }

    #[test]
    fn sequence_numbers_wrap_without_gaps() {
        let queue = queue_with(3, 12);
        let seqs: Vec<u8> = (0..5).map(|_| queue.enqueue_ping(1)).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sequence_wrap_from_254() {
        let queue = queue_with(3, 12);
        queue.inner.lock().unwrap().next_seq = 254;
        let seqs: Vec<u8> = (0..3).map(|_| queue.enqueue_ping(1)).collect();
        assert_eq!(seqs, vec![254, 255, 0]);
    }

    #[test]
    fn next_due_returns_fifo_among_first_attempts() {
        let queue = queue_with(3, 12);
        let seq1 = queue.enqueue_ping(1);
        let _seq2 = queue.enqueue_ping(2);
        let due = queue.next_due().unwrap();
        assert_eq!(due.sequence_number, seq1);
    }

    #[test]
    fn mark_sent_then_next_due_never_returns_same_entry_immediately() {
        let queue = queue_with(3, 12);
        let seq = queue.enqueue_ping(1);
        let due = queue.next_due().unwrap();
        assert_eq!(due.sequence_number, seq);
        queue.mark_sent(seq);
        assert!(queue.next_due().is_none());
    }

    #[test]
    fn retry_exhaustion_fires_callback_once() {
        let queue = queue_with(2, 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        queue.set_result_callback(Box::new(move |_node, _seq, _ty, success| {
            assert!(!success);
            calls2.fetch_add(1, Ordering::SeqCst);
        }));

        let seq = queue.enqueue_ping(1);
        let due = queue.next_due().unwrap();
        assert_eq!(due.sequence_number, seq);
        queue.mark_sent(seq);

        let due = queue.next_due().unwrap();
        assert_eq!(due.sequence_number, seq);
        queue.mark_sent(seq);

        assert!(queue.next_due().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = queue.pending_for_node(1);
        assert!(entry.is_empty()); // failed entries are no longer "pending"
    }

    #[test]
    fn piggyback_success_acks_entry() {
        let queue = queue_with(3, 12);
        let seq = queue.enqueue_ping(2);
        queue.process_piggyback_ack(2, seq, 0);
        assert!(queue.all_pending().is_empty());
    }

    #[test]
    fn piggyback_zero_is_noop() {
        let queue = queue_with(3, 12);
        let seq = queue.enqueue_ping(2);
        queue.process_piggyback_ack(2, 0, 0);
        assert_eq!(queue.all_pending().len(), 1);
        let _ = seq;
    }

    #[test]
    fn process_ack_wrong_node_is_rejected() {
        let queue = queue_with(3, 12);
        let seq = queue.enqueue_ping(2);
        assert!(!queue.process_ack(3, seq, true));
        assert_eq!(queue.all_pending().len(), 1);
    }

    #[test]
    fn process_ack_is_idempotent() {
        let queue = queue_with(3, 12);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        queue.set_result_callback(Box::new(move |_, _, _, _| {
            calls2.fetch_add(1, Ordering::SeqCst);
        }));
        let seq = queue.enqueue_ping(2);
        assert!(queue.process_ack(2, seq, true));
        assert!(queue.process_ack(2, seq, true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn purge_completed_removes_terminal_entries() {
        let queue = queue_with(3, 12);
        let seq = queue.enqueue_ping(1);
        queue.process_ack(1, seq, true);
        assert_eq!(queue.purge_completed(), 1);
        assert_eq!(queue.purge_completed(), 0);
    }
}
