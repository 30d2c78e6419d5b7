//! Pure connection state machine
//!
//! `ConnectionMachine` holds the connection state, the retry policy and
//! whether a retry timer is pending. Every input returns the list of
//! [`Effect`]s the coordinator must carry out, in order; the machine itself
//! never touches the transport or the clock.

use super::retry::{ReconnectionDecision, RetryPolicy};
use crate::error::sanitize_reason;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection state, the machine's only externally observable memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retries exhausted; only a manual connect leaves this state
    ReconnectFailed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::ReconnectFailed => "reconnect_failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status broadcast to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    /// A connection attempt failed; retry may follow
    Failed(String),
    ReconnectFailed,
}

impl ConnectionStatus {
    /// State the machine is in right after emitting this status
    pub fn implied_state(&self) -> ConnectionState {
        match self {
            ConnectionStatus::Connecting => ConnectionState::Connecting,
            ConnectionStatus::Connected => ConnectionState::Connected,
            ConnectionStatus::Disconnected | ConnectionStatus::Failed(_) => {
                ConnectionState::Disconnected
            }
            ConnectionStatus::ReconnectFailed => ConnectionState::ReconnectFailed,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Failed(_) | ConnectionStatus::ReconnectFailed
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Failed(reason) => write!(f, "failed:{reason}"),
            ConnectionStatus::ReconnectFailed => f.write_str("reconnect_failed"),
        }
    }
}

/// Result of a manual connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRequest {
    /// A new attempt was started
    Started,
    /// An attempt is already in flight; nothing done
    AlreadyConnecting,
    /// Already connected; nothing done
    AlreadyConnected,
}

/// Side effects requested by the machine, executed in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a new transport session
    OpenTransport,
    /// Tear down the current transport session
    CloseTransport,
    /// Arm the single retry timer
    ScheduleRetry { attempt: u32, delay: Duration },
    /// Disarm the retry timer
    CancelRetry,
    /// Re-issue a subscribe for every registered topic
    Resubscribe,
    /// Drop every registered topic and handler
    ClearSubscriptions,
    /// Broadcast a status to listeners
    Emit(ConnectionStatus),
}

/// The connection state machine
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    retry: RetryPolicy,
    retry_pending: bool,
}

impl ConnectionMachine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry,
            retry_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Check if connection state allows publishing and subscribing
    pub fn can_transmit(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Manual `connect()`
    ///
    /// A pending retry timer is cancelled and the attempt starts right away.
    /// The attempt counter carries over, except when leaving `ReconnectFailed`.
    pub fn request_connect(&mut self) -> (ConnectRequest, Vec<Effect>) {
        match self.state {
            ConnectionState::Connecting => {
                debug!("connect() ignored: attempt already in flight");
                (ConnectRequest::AlreadyConnecting, Vec::new())
            }
            ConnectionState::Connected => {
                debug!("connect() ignored: already connected");
                (ConnectRequest::AlreadyConnected, Vec::new())
            }
            ConnectionState::Disconnected | ConnectionState::ReconnectFailed => {
                let mut effects = Vec::new();
                if self.state == ConnectionState::ReconnectFailed {
                    info!("Leaving reconnect_failed on manual connect");
                    self.retry.reset();
                }
                if self.retry_pending {
                    self.retry_pending = false;
                    effects.push(Effect::CancelRetry);
                }
                effects.extend(self.begin_attempt());
                (ConnectRequest::Started, effects)
            }
        }
    }

    /// Transport reported a successful session
    pub fn on_transport_connected(&mut self) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Ignoring connected signal outside of an attempt");
            return Vec::new();
        }

        if self.retry.attempt() > 0 {
            info!(attempts = self.retry.attempt(), "Reconnection successful");
        } else {
            info!("MQTT connection established");
        }
        self.state = ConnectionState::Connected;
        self.retry.reset();

        vec![
            Effect::Emit(ConnectionStatus::Connected),
            Effect::Resubscribe,
        ]
    }

    /// Transport reported that the current attempt failed
    pub fn on_open_failed(&mut self, reason: &str) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            debug!(state = %self.state, "Ignoring open failure outside of an attempt");
            return Vec::new();
        }

        warn!(reason, attempt = self.retry.attempt(), "Connection attempt failed");
        self.state = ConnectionState::Disconnected;

        let mut effects = vec![
            Effect::CloseTransport,
            Effect::Emit(ConnectionStatus::Failed(sanitize_reason(reason))),
        ];
        effects.extend(self.schedule_retry());
        effects
    }

    /// Transport reported an unsolicited loss of an established session
    ///
    /// A loss before the session was established ends the attempt, so it is
    /// handled as an open failure.
    pub fn on_connection_lost(&mut self, reason: &str) -> Vec<Effect> {
        if self.state == ConnectionState::Connecting {
            return self.on_open_failed(reason);
        }
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "Ignoring connection loss while not connected");
            return Vec::new();
        }

        warn!(reason, "MQTT connection lost");
        self.state = ConnectionState::Disconnected;

        let mut effects = vec![
            Effect::CloseTransport,
            Effect::Emit(ConnectionStatus::Disconnected),
        ];
        effects.extend(self.schedule_retry());
        effects
    }

    /// The retry timer fired
    pub fn on_retry_timer(&mut self) -> Vec<Effect> {
        if !self.retry_pending || self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "Ignoring stale retry timer");
            return Vec::new();
        }

        self.retry_pending = false;
        info!(
            attempt = self.retry.attempt(),
            max_attempts = self.retry.max_attempts(),
            "Starting reconnection attempt"
        );
        self.begin_attempt()
    }

    /// Manual `disconnect()`, valid from every state
    ///
    /// Terminal for auto-retry until the next manual connect.
    pub fn request_disconnect(&mut self) -> Vec<Effect> {
        let changed = self.state != ConnectionState::Disconnected || self.retry_pending;

        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        effects.push(Effect::CloseTransport);
        effects.push(Effect::ClearSubscriptions);

        self.retry.reset();
        self.state = ConnectionState::Disconnected;

        if changed {
            info!("MQTT client disconnected");
            effects.push(Effect::Emit(ConnectionStatus::Disconnected));
        }
        effects
    }

    fn begin_attempt(&mut self) -> Vec<Effect> {
        self.state = ConnectionState::Connecting;
        vec![
            Effect::Emit(ConnectionStatus::Connecting),
            Effect::OpenTransport,
        ]
    }

    fn schedule_retry(&mut self) -> Vec<Effect> {
        match self.retry.next_attempt() {
            ReconnectionDecision::Proceed { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnection");
                self.retry_pending = true;
                vec![Effect::ScheduleRetry { attempt, delay }]
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(
                    max_attempts = self.retry.max_attempts(),
                    "Reconnection attempts exhausted"
                );
                self.state = ConnectionState::ReconnectFailed;
                vec![Effect::Emit(ConnectionStatus::ReconnectFailed)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn machine(max_attempts: u32) -> ConnectionMachine {
        ConnectionMachine::new(RetryPolicy::new(max_attempts, ms(3000), ms(30_000)))
    }

    #[test]
    fn test_connect_from_disconnected() {
        let mut m = machine(5);
        let (request, effects) = m.request_connect();

        assert_eq!(request, ConnectRequest::Started);
        assert_eq!(
            effects,
            vec![
                Effect::Emit(ConnectionStatus::Connecting),
                Effect::OpenTransport
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_is_noop_while_connecting_or_connected() {
        let mut m = machine(5);
        m.request_connect();

        let (request, effects) = m.request_connect();
        assert_eq!(request, ConnectRequest::AlreadyConnecting);
        assert!(effects.is_empty());

        m.on_transport_connected();
        let (request, effects) = m.request_connect();
        assert_eq!(request, ConnectRequest::AlreadyConnected);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_success_emits_connected_then_resubscribes() {
        let mut m = machine(5);
        m.request_connect();
        let effects = m.on_transport_connected();

        assert_eq!(
            effects,
            vec![Effect::Emit(ConnectionStatus::Connected), Effect::Resubscribe]
        );
        assert!(m.can_transmit());
    }

    #[test]
    fn test_open_failure_schedules_retry() {
        let mut m = machine(5);
        m.request_connect();
        let effects = m.on_open_failed("Connection refused");

        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::Emit(ConnectionStatus::Failed("Connection refused".to_string())),
                Effect::ScheduleRetry {
                    attempt: 1,
                    delay: ms(3000)
                },
            ]
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(m.retry_pending());
    }

    #[test]
    fn test_retry_timer_starts_new_attempt() {
        let mut m = machine(5);
        m.request_connect();
        m.on_open_failed("boom");

        let effects = m.on_retry_timer();
        assert_eq!(
            effects,
            vec![
                Effect::Emit(ConnectionStatus::Connecting),
                Effect::OpenTransport
            ]
        );
        assert!(!m.retry_pending());

        // A second firing of the same timer is stale
        assert!(m.on_retry_timer().is_empty());
    }

    #[test]
    fn test_exhaustion_enters_reconnect_failed() {
        let mut m = machine(2);
        m.request_connect();

        m.on_open_failed("1");
        m.on_retry_timer();
        m.on_open_failed("2");
        m.on_retry_timer();
        let effects = m.on_open_failed("3");

        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::Emit(ConnectionStatus::Failed("3".to_string())),
                Effect::Emit(ConnectionStatus::ReconnectFailed),
            ]
        );
        assert_eq!(m.state(), ConnectionState::ReconnectFailed);
        assert!(!m.retry_pending());
        assert_eq!(m.retry_policy().attempt(), 2);
    }

    #[test]
    fn test_manual_connect_leaves_reconnect_failed_with_fresh_policy() {
        let mut m = machine(1);
        m.request_connect();
        m.on_open_failed("1");
        m.on_retry_timer();
        m.on_open_failed("2");
        assert_eq!(m.state(), ConnectionState::ReconnectFailed);

        let (request, _) = m.request_connect();
        assert_eq!(request, ConnectRequest::Started);
        assert_eq!(m.retry_policy().attempt(), 0);
        assert_eq!(m.retry_policy().current_delay(), ms(3000));
    }

    #[test]
    fn test_success_after_failures_resets_policy() {
        let mut m = machine(5);
        m.request_connect();
        for _ in 0..3 {
            m.on_open_failed("down");
            m.on_retry_timer();
        }
        assert_eq!(m.retry_policy().attempt(), 3);

        m.on_transport_connected();
        assert_eq!(m.retry_policy().attempt(), 0);
        assert_eq!(m.retry_policy().current_delay(), ms(3000));
    }

    #[test]
    fn test_manual_connect_cancels_pending_retry() {
        let mut m = machine(5);
        m.request_connect();
        m.on_open_failed("down");
        assert!(m.retry_pending());

        let (request, effects) = m.request_connect();
        assert_eq!(request, ConnectRequest::Started);
        assert_eq!(
            effects,
            vec![
                Effect::CancelRetry,
                Effect::Emit(ConnectionStatus::Connecting),
                Effect::OpenTransport
            ]
        );
        assert!(!m.retry_pending());
        // The attempt count carries over
        assert_eq!(m.retry_policy().attempt(), 1);
    }

    #[test]
    fn test_connection_loss_schedules_retry() {
        let mut m = machine(5);
        m.request_connect();
        m.on_transport_connected();

        let effects = m.on_connection_lost("keep-alive timeout");
        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::Emit(ConnectionStatus::Disconnected),
                Effect::ScheduleRetry {
                    attempt: 1,
                    delay: ms(3000)
                },
            ]
        );
    }

    #[test]
    fn test_loss_while_connecting_ends_the_attempt() {
        let mut m = machine(5);
        m.request_connect();

        let effects = m.on_connection_lost("broker sent DISCONNECT");
        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::Emit(ConnectionStatus::Failed(
                    "broker sent DISCONNECT".to_string()
                )),
                Effect::ScheduleRetry {
                    attempt: 1,
                    delay: ms(3000)
                },
            ]
        );
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(m.retry_pending());
    }

    #[test]
    fn test_disconnect_from_every_state() {
        // Connected
        let mut m = machine(5);
        m.request_connect();
        m.on_transport_connected();
        let effects = m.request_disconnect();
        assert_eq!(
            effects,
            vec![
                Effect::CloseTransport,
                Effect::ClearSubscriptions,
                Effect::Emit(ConnectionStatus::Disconnected)
            ]
        );

        // Disconnected with a pending retry
        let mut m = machine(5);
        m.request_connect();
        m.on_open_failed("down");
        let effects = m.request_disconnect();
        assert_eq!(effects[0], Effect::CancelRetry);
        assert!(effects.contains(&Effect::ClearSubscriptions));
        assert!(!m.retry_pending());
        assert_eq!(m.retry_policy().attempt(), 0);

        // Already idle: still clears, but nothing to announce
        let mut m = machine(5);
        let effects = m.request_disconnect();
        assert_eq!(
            effects,
            vec![Effect::CloseTransport, Effect::ClearSubscriptions]
        );
    }

    #[test]
    fn test_signals_after_disconnect_are_ignored() {
        let mut m = machine(5);
        m.request_connect();
        m.request_disconnect();

        assert!(m.on_transport_connected().is_empty());
        assert!(m.on_open_failed("late").is_empty());
        assert!(m.on_connection_lost("late").is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(
            ConnectionStatus::Failed("timeout".to_string()).to_string(),
            "failed:timeout"
        );
        assert_eq!(
            ConnectionStatus::ReconnectFailed.to_string(),
            "reconnect_failed"
        );
    }

    #[test]
    fn test_failure_reason_is_sanitized() {
        let mut m = machine(5);
        m.request_connect();
        let effects = m.on_open_failed("auth rejected password=hunter2");
        assert!(effects.contains(&Effect::Emit(ConnectionStatus::Failed(
            "auth rejected password=***".to_string()
        ))));
    }
}
