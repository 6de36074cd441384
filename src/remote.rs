//! Remote Telemetry Task (spec.md §4.4, ~20% of core).
//!
//! A full-duplex text pipe to up to three concurrent web clients, grounded
//! on `original_source/src/remote/remote.h`'s `remote_task`/
//! `remote_processMessage`/`remote_sendMessage`/`remote_wsConnect`/
//! `remote_wsDisconnect` — the original's `remote_t.httpdConn` buffer is
//! sized for exactly 3 `RtosConnType` slots ("maximal 3 Verbindungen") and
//! its `connected` counter runs 0..3 (spec.md §3). Shaped like `sensors.rs`'s
//! supervisor: one `tokio::spawn`ed loop owning a private `mpsc::Receiver`, a
//! cloneable handle wrapping the `Sender` side for producers (the WebSocket
//! transport, the log redirector, the sensor core's telemetry broadcasts).
//!
//! Unicast targets a specific session id (`message->ws` non-null in the
//! original); broadcast (`message->ws == NULL`) reaches every currently
//! connected session.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::RemoteTaskConfig;

/// Wire message tags (original_source/src/remote/remote.h's schema comment):
/// `s?` (are-you-alive ping), `s1`/`s0` (pong / fault-pong), `r<subtag>,<csv>`
/// (sensor telemetry broadcast), `c<command>` (control command, client→server),
/// `l<text>` (redirected log line).
const TAG_HEARTBEAT: u8 = b's';
const TAG_SENSOR: u8 = b'r';
const TAG_CONTROL: u8 = b'c';
const TAG_LOG: u8 = b'l';

/// One parsed inbound wire message (§4.4 `remote_processMessage`).
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `s1` — liveness pong.
    Pong,
    /// `s0` — the client's own fault/pong-of-pong. The original leaves this
    /// a `ToDo` with no escalation; kept as a logged no-op here too (see
    /// DESIGN.md Open Question decisions).
    FaultPong,
    /// `c<bytes>` — a control command forwarded to the flight-control core.
    Control(Vec<u8>),
    /// Anything else recognized but not acted on (`r...`, unrecognized `s`
    /// variants, empty/undersized frames): the original's `default: return`.
    Ignored,
}

/// Parses one inbound frame per the wire schema. A frame shorter than 2
/// bytes is ignored outright (§4.4 "length<2 -> ignore").
pub fn process_message(frame: &[u8]) -> InboundMessage {
    if frame.len() < 2 {
        return InboundMessage::Ignored;
    }
    match frame[0] {
        TAG_HEARTBEAT => match frame[1] {
            b'1' => InboundMessage::Pong,
            b'0' => InboundMessage::FaultPong,
            _ => InboundMessage::Ignored,
        },
        TAG_CONTROL => InboundMessage::Control(frame[1..].to_vec()),
        _ => InboundMessage::Ignored,
    }
}

/// Formats a sensor telemetry broadcast line. `axis_tag` is the single
/// character the original's `remote_sensorData` embeds after `'r'`
/// (e.g. `'a'` acceleration, `'o'` orientation); `fields` are the raw
/// floats, already in the order the client expects.
pub fn format_sensor_line(axis_tag: char, fields: &[f64]) -> String {
    let mut out = String::with_capacity(16 + fields.len() * 12);
    out.push(TAG_SENSOR as char);
    out.push(axis_tag);
    for (i, f) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{f}"));
    }
    out
}

/// Formats an outbound control/command line (`'c' + cmd`, spec.md §4.4
/// `remote_sendCommand`).
pub fn format_command_line(cmd: &str) -> String {
    format!("{}{}", TAG_CONTROL as char, cmd)
}

/// Formats a redirected log line, truncated to `cap` bytes the way the
/// original's `vsnprintf` into a 128-byte stack buffer truncates (§4.6).
pub fn format_log_line(text: &str, cap: usize) -> String {
    let mut out = String::with_capacity(cap);
    out.push(TAG_LOG as char);
    let budget = cap.saturating_sub(1);
    if text.len() <= budget {
        out.push_str(text);
    } else {
        // char_indices avoids splitting a multi-byte UTF-8 sequence at the
        // truncation boundary.
        let mut end = 0;
        for (idx, _) in text.char_indices() {
            if idx > budget {
                break;
            }
            end = idx;
        }
        out.push_str(&text[..end]);
    }
    out
}

/// The literal greeting sent to a client the instant its socket is accepted
/// (§4.4 `remote_wsConnect`'s `ws_sendData(ws, "quadro2", 7, ...)`).
pub const GREETING: &str = "quadro2";

/// Heartbeat/timeout state machine driven by the remote task's wake tick
/// (§4.4). The original tracks this with two raw fields on the single
/// static `remote_t` (`lastContact`/`timeoutPending`); the four named states
/// from spec.md §4.4 (IDLE/ALIVE/PROBING/LOST) collapse to three here since
/// LOST is momentary — the emergency stop fires and the machine falls back
/// to probing the next tick, exactly like the original's unconditional
/// re-arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatState {
    /// No session connected — nothing to supervise.
    Idle,
    /// Connected and contact seen inside the window.
    Alive,
    /// Contact window elapsed once; a `s?` probe has gone out, waiting for
    /// `s1` before the window elapses a second time.
    Probing,
}

/// Events producers push into the remote task (session lifecycle, outbound
/// application messages). `SessionId` disambiguates which transport
/// connection an event originated from or targets, since up to 3 (spec.md
/// §3 "active-connection count (0..3)") can be live at once.
pub type SessionId = u64;

#[derive(Debug)]
pub enum RemoteEvent {
    /// A new transport session was accepted (§4.4 `remote_wsConnect`).
    Connected { session: SessionId, outbound: mpsc::Sender<String> },
    /// A transport session closed (§4.4 `remote_wsDisconnect`).
    Disconnected { session: SessionId },
    /// A raw inbound frame arrived on a session.
    Received { session: SessionId, frame: Vec<u8> },
    /// An application-level line to send. `target = None` broadcasts to
    /// every connected session (`message->ws == NULL` in the original);
    /// `target = Some(id)` unicasts to that session only, a no-op if it has
    /// since disconnected.
    Send { target: Option<SessionId>, line: String },
}

/// Handle producers use to push events into the remote task and to receive
/// control commands it has parsed out of inbound frames.
#[derive(Clone)]
pub struct RemoteHandle {
    tx: mpsc::Sender<RemoteEvent>,
}

impl RemoteHandle {
    /// Non-blocking; a full queue means the task is wedged and a dropped
    /// telemetry line is preferable to blocking the producer (same posture
    /// as `SensorSupervisorHandle::try_submit`).
    pub fn try_send(&self, event: RemoteEvent) {
        if self.tx.try_send(event).is_err() {
            trace!("remote queue full, dropping event");
        }
    }

    /// Convenience for the common broadcast case (sensor telemetry, log
    /// redirection): equivalent to `try_send(Send { target: None, line })`.
    pub fn broadcast(&self, line: String) {
        self.try_send(RemoteEvent::Send { target: None, line });
    }
}

/// Brings up the remote task. Returns the producer handle, a receiver for
/// control commands parsed out of inbound `c` frames, a receiver that fires
/// once per link-timeout escalation (§7 "Link timeout ... raise fatal
/// emergency-stop signal to the flight controller"), and the task's join
/// handle.
pub fn spawn(
    config: RemoteTaskConfig,
) -> (
    RemoteHandle,
    mpsc::Receiver<Vec<u8>>,
    mpsc::Receiver<()>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, rx) = mpsc::channel(config.queue_capacity);
    let (control_tx, control_rx) = mpsc::channel(config.queue_capacity);
    let (emergency_tx, emergency_rx) = mpsc::channel(4);
    let handle = RemoteHandle { tx };
    let join = tokio::spawn(run(rx, control_tx, emergency_tx, config));
    (handle, control_rx, emergency_rx, join)
}

async fn run(
    mut inbox: mpsc::Receiver<RemoteEvent>,
    control_tx: mpsc::Sender<Vec<u8>>,
    emergency_tx: mpsc::Sender<()>,
    config: RemoteTaskConfig,
) {
    let mut sessions: HashMap<SessionId, mpsc::Sender<String>> = HashMap::new();
    let mut state = HeartbeatState::Idle;
    let mut last_contact = Instant::now();

    loop {
        match tokio::time::timeout(config.heartbeat_window, inbox.recv()).await {
            Ok(Some(RemoteEvent::Connected { session: id, outbound })) => {
                debug!(session = id, connections = sessions.len() + 1, "remote client connected");
                let _ = outbound.try_send(GREETING.to_string());
                sessions.insert(id, outbound);
                state = HeartbeatState::Alive;
                last_contact = Instant::now();
            }
            Ok(Some(RemoteEvent::Disconnected { session: id })) => {
                if sessions.remove(&id).is_some() {
                    debug!(session = id, connections = sessions.len(), "remote client disconnected");
                    if sessions.is_empty() {
                        state = HeartbeatState::Idle;
                    }
                }
            }
            Ok(Some(RemoteEvent::Received { session: id, frame })) => {
                if sessions.contains_key(&id) {
                    last_contact = Instant::now();
                    state = HeartbeatState::Alive;
                    match process_message(&frame) {
                        InboundMessage::Pong => {}
                        InboundMessage::FaultPong => {
                            // original_source leaves this an unresolved ToDo
                            // (no escalation path specified); logged only.
                            warn!(session = id, "remote client reported fault pong");
                        }
                        InboundMessage::Control(cmd) => {
                            if control_tx.try_send(cmd).is_err() {
                                trace!("control command queue full, dropping");
                            }
                        }
                        InboundMessage::Ignored => {
                            trace!(session = id, "ignored inbound frame");
                        }
                    }
                }
            }
            Ok(Some(RemoteEvent::Send { target: Some(id), line })) => {
                if let Some(tx) = sessions.get(&id) {
                    let _ = tx.try_send(line);
                }
            }
            Ok(Some(RemoteEvent::Send { target: None, line })) => {
                for tx in sessions.values() {
                    let _ = tx.try_send(line.clone());
                }
            }
            Ok(None) => break,
            // Receive-timeout: no event arrived within the heartbeat window.
            // The heartbeat check below still runs in this case.
            Err(_) => {}
        }

        // Heartbeat/timeout state machine (§4.4): runs on every wake
        // regardless of whether an event was dequeued above, not only when
        // `inbox.recv()` itself times out. A busy inbox (log-redirector
        // mirroring, periodic sensor broadcasts) keeps returning `Ok(Some(..))`
        // and must not starve this check — the original's `remote_task` puts
        // the `now - lastContact` comparison outside and after the
        // `xQueueReceive` block for the same reason.
        if !sessions.is_empty() && last_contact.elapsed() >= config.heartbeat_window {
            match state {
                HeartbeatState::Probing => {
                    warn!("remote heartbeat timeout, emergency stop");
                    let _ = emergency_tx.try_send(());
                    state = HeartbeatState::Alive;
                }
                _ => {
                    for tx in sessions.values() {
                        let _ = tx.try_send("s?".to_string());
                    }
                    state = HeartbeatState::Probing;
                    last_contact = Instant::now();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame_is_ignored() {
        assert_eq!(process_message(b"s"), InboundMessage::Ignored);
        assert_eq!(process_message(b""), InboundMessage::Ignored);
    }

    #[test]
    fn heartbeat_pong_and_fault_pong_are_distinguished() {
        assert_eq!(process_message(b"s1"), InboundMessage::Pong);
        assert_eq!(process_message(b"s0"), InboundMessage::FaultPong);
        assert_eq!(process_message(b"s?"), InboundMessage::Ignored);
    }

    #[test]
    fn control_frame_strips_tag() {
        assert_eq!(
            process_message(b"carm"),
            InboundMessage::Control(b"arm".to_vec())
        );
    }

    #[test]
    fn sensor_frame_is_recognized_but_ignored_as_inbound() {
        assert_eq!(process_message(b"ra1.0,2.0"), InboundMessage::Ignored);
    }

    #[test]
    fn sensor_line_formats_csv_with_tag() {
        let line = format_sensor_line('a', &[1.0, 2.5, -3.0]);
        assert_eq!(line, "ra1,2.5,-3");
    }

    #[test]
    fn command_line_is_prefixed() {
        assert_eq!(format_command_line("land"), "cland");
    }

    #[test]
    fn log_line_is_prefixed_and_truncated() {
        let short = format_log_line("booted", 32);
        assert_eq!(short, "lbooted");

        let long = format_log_line(&"x".repeat(200), 16);
        assert_eq!(long.len(), 16);
        assert!(long.starts_with('l'));
    }

    #[tokio::test]
    async fn connect_sends_greeting() {
        let (handle, _control_rx, _emergency_rx, join) = spawn(RemoteTaskConfig::default());
        let (out_tx, mut out_rx) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        let greeting = out_rx.recv().await.unwrap();
        assert_eq!(greeting, GREETING);
        join.abort();
    }

    #[tokio::test]
    async fn control_frame_is_forwarded_to_control_channel() {
        let (handle, mut control_rx, _emergency_rx, join) = spawn(RemoteTaskConfig::default());
        let (out_tx, _out_rx) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        handle.try_send(RemoteEvent::Received { session: 1, frame: b"carm".to_vec() });
        let cmd = control_rx.recv().await.unwrap();
        assert_eq!(cmd, b"arm");
        join.abort();
    }

    #[tokio::test]
    async fn send_event_is_dropped_with_no_active_session() {
        let (handle, _control_rx, _emergency_rx, join) = spawn(RemoteTaskConfig::default());
        handle.broadcast("ra1,2,3".to_string());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        join.abort();
    }

    #[tokio::test]
    async fn stale_session_events_after_disconnect_are_ignored() {
        let (handle, _control_rx, _emergency_rx, join) = spawn(RemoteTaskConfig::default());
        let (out_tx, mut out_rx) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        let _ = out_rx.recv().await.unwrap();
        handle.try_send(RemoteEvent::Disconnected { session: 1 });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        // A late frame tagged with the old session id should not panic or
        // be processed against a live session.
        handle.try_send(RemoteEvent::Received { session: 1, frame: b"carm".to_vec() });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        join.abort();
    }

    /// §8 scenario 3: three sessions, close one, broadcast a report. The two
    /// still-connected sessions see it; the closed one does not.
    #[tokio::test]
    async fn broadcast_reaches_only_still_connected_sessions() {
        let (handle, _control_rx, _emergency_rx, join) = spawn(RemoteTaskConfig::default());
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let (tx3, mut rx3) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: tx1 });
        handle.try_send(RemoteEvent::Connected { session: 2, outbound: tx2 });
        handle.try_send(RemoteEvent::Connected { session: 3, outbound: tx3 });
        // drain each session's greeting
        let _ = rx1.recv().await.unwrap();
        let _ = rx2.recv().await.unwrap();
        let _ = rx3.recv().await.unwrap();

        handle.try_send(RemoteEvent::Disconnected { session: 2 });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        handle.broadcast("ra1,2,3".to_string());

        assert_eq!(rx1.recv().await.unwrap(), "ra1,2,3");
        assert_eq!(rx3.recv().await.unwrap(), "ra1,2,3");
        assert!(rx2.try_recv().is_err(), "closed session must not receive the broadcast");

        join.abort();
    }

    /// §8 scenario 2: silence produces a `s?` probe then an emergency-stop
    /// signal once the second heartbeat window elapses without a pong.
    #[tokio::test(start_paused = true)]
    async fn heartbeat_loss_raises_emergency_stop() {
        let mut config = RemoteTaskConfig::default();
        config.heartbeat_window = std::time::Duration::from_millis(50);
        let (handle, _control_rx, mut emergency_rx, join) = spawn(config);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        let _ = out_rx.recv().await.unwrap();

        tokio::time::advance(std::time::Duration::from_millis(60)).await;
        assert_eq!(out_rx.recv().await.unwrap(), "s?");

        tokio::time::advance(std::time::Duration::from_millis(60)).await;
        assert!(emergency_rx.recv().await.is_some());

        join.abort();
    }

    /// Regression test: the heartbeat/timeout check must run on every wake,
    /// not only when `inbox.recv()` itself times out. A steady stream of
    /// `Send` events (e.g. mirrored log lines, periodic sensor broadcasts)
    /// keeps `inbox.recv()` resolving `Ok(Some(..))` and must not starve the
    /// probe — previously this could leave a dead operator link undetected
    /// indefinitely (§7's only fatal escalation).
    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_even_while_inbox_stays_busy() {
        let mut config = RemoteTaskConfig::default();
        config.heartbeat_window = std::time::Duration::from_millis(50);
        let (handle, _control_rx, _emergency_rx, join) = spawn(config);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        let _ = out_rx.recv().await.unwrap(); // greeting

        // Keep the inbox continuously non-empty across the heartbeat window
        // by interleaving broadcasts with small clock advances, so
        // `inbox.recv()` keeps returning `Ok(Some(..))` and never times out.
        for _ in 0..10 {
            handle.broadcast("lbusy".to_string());
            tokio::time::advance(std::time::Duration::from_millis(10)).await;
        }

        let mut saw_probe = false;
        while let Ok(line) = out_rx.try_recv() {
            if line == "s?" {
                saw_probe = true;
            }
        }
        assert!(saw_probe, "heartbeat probe must fire even while the inbox stays busy");

        join.abort();
    }

    /// §8 scenario 1: a pong before the second window elapses clears the
    /// pending probe and suppresses the emergency stop.
    #[tokio::test(start_paused = true)]
    async fn heartbeat_pong_clears_pending_probe() {
        let mut config = RemoteTaskConfig::default();
        config.heartbeat_window = std::time::Duration::from_millis(50);
        let (handle, _control_rx, mut emergency_rx, join) = spawn(config);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        handle.try_send(RemoteEvent::Connected { session: 1, outbound: out_tx });
        let _ = out_rx.recv().await.unwrap();

        tokio::time::advance(std::time::Duration::from_millis(60)).await;
        assert_eq!(out_rx.recv().await.unwrap(), "s?");

        handle.try_send(RemoteEvent::Received { session: 1, frame: b"s1".to_vec() });
        tokio::time::advance(std::time::Duration::from_millis(60)).await;

        assert!(emergency_rx.try_recv().is_err());
        join.abort();
    }
}
