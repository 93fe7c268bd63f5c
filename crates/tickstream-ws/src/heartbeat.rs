//! Heartbeat management for WebSocket connections.
//!
//! Monitors connection health by tracking ping/pong timing and
//! message activity. Any inbound traffic counts as proof of life.

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lower bound for the heartbeat check period.
const MIN_CHECK_PERIOD: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

/// Heartbeat manager for one transport session.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// Idle time after which a ping is sent.
    interval: Duration,
    /// How long to wait for a pong (or any traffic) after a ping.
    timeout: Duration,
    state: RwLock<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            state: RwLock::new(HeartbeatState {
                last_ping: None,
                last_pong: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    pub fn record_ping(&self) {
        let mut state = self.state.write();
        state.last_ping = Some(Instant::now());
        state.waiting_for_pong = true;
        debug!("Recorded ping");
    }

    pub fn record_pong(&self) {
        let now = Instant::now();
        let mut state = self.state.write();
        state.last_pong = Some(now);
        state.last_message = now;
        state.waiting_for_pong = false;

        if let Some(ping_time) = state.last_ping {
            let rtt_ms = now.duration_since(ping_time).as_millis() as u64;
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Record inbound traffic of any kind.
    pub fn record_message(&self) {
        let mut state = self.state.write();
        state.last_message = Instant::now();
        state.waiting_for_pong = false;
    }

    /// Whether the outstanding ping has gone unanswered past the timeout.
    pub fn is_timed_out(&self) -> bool {
        let state = self.state.read();
        if !state.waiting_for_pong {
            return false;
        }
        state
            .last_ping
            .is_some_and(|ping| ping.elapsed() > self.timeout)
    }

    pub fn time_since_last_message(&self) -> Duration {
        self.state.read().last_message.elapsed()
    }

    /// Whether the connection has been idle for a full interval with no
    /// ping outstanding.
    pub fn should_send_heartbeat(&self) -> bool {
        if self.state.read().waiting_for_pong {
            return false;
        }
        self.time_since_last_message() >= self.interval
    }

    /// How often the session loop should evaluate the heartbeat.
    pub fn check_period(&self) -> Duration {
        (self.interval.min(self.timeout) / 2).max(MIN_CHECK_PERIOD)
    }

    pub fn stats(&self) -> HeartbeatStats {
        let state = self.state.read();
        HeartbeatStats {
            waiting_for_pong: state.waiting_for_pong,
            time_since_last_message_ms: state.last_message.elapsed().as_millis() as u64,
            last_rtt_ms: match (state.last_ping, state.last_pong) {
                (Some(ping), Some(pong)) if pong >= ping => {
                    Some(pong.duration_since(ping).as_millis() as u64)
                }
                _ => None,
            },
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub waiting_for_pong: bool,
    pub time_since_last_message_ms: u64,
    pub last_rtt_ms: Option<u64>,
}
