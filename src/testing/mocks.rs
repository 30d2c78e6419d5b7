//! Mock implementations for testing
//!
//! `MockTransport` records every call the service makes and lets a test play
//! the broker: accept or refuse sessions, drop them, and deliver messages.

use crate::config::ConnectionConfig;
use crate::transport::{EventSink, TransportBinding, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>);

/// How the mock answers an `open` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Report `Connected` right away
    #[default]
    Succeed,
    /// Report `OpenFailed` through the sink
    Fail,
    /// Return an error from `open` itself
    Reject,
    /// Report nothing until the test calls `complete_open` or `fail_open`
    Hang,
}

#[derive(Debug, Error)]
#[error("mock transport: {0}")]
pub struct MockTransportError(pub String);

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<OpenBehavior>,
    fallback: OpenBehavior,
    /// Sink of every session ever opened, in order
    sinks: Vec<EventSink>,
    current: Option<EventSink>,
    open_configs: Vec<ConnectionConfig>,
    close_calls: usize,
    subscribed: Vec<String>,
    unsubscribed: Vec<String>,
    published: Vec<PublishedMessage>,
    fail_subscribe: bool,
    fail_publish: bool,
}

/// Scriptable in-memory transport; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open attempt fails
    pub fn failing() -> Self {
        Self::with_script(Vec::new(), OpenBehavior::Fail)
    }

    /// Answer the first opens from `script`, then use `fallback`
    pub fn with_script(script: Vec<OpenBehavior>, fallback: OpenBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: script.into(),
                fallback,
                ..MockState::default()
            })),
        }
    }

    pub async fn push_open_behavior(&self, behavior: OpenBehavior) {
        self.state.lock().await.script.push_back(behavior);
    }

    pub async fn set_fallback(&self, behavior: OpenBehavior) {
        self.state.lock().await.fallback = behavior;
    }

    pub async fn set_fail_subscribe(&self, fail: bool) {
        self.state.lock().await.fail_subscribe = fail;
    }

    pub async fn set_fail_publish(&self, fail: bool) {
        self.state.lock().await.fail_publish = fail;
    }

    pub async fn open_calls(&self) -> usize {
        self.state.lock().await.open_configs.len()
    }

    pub async fn open_configs(&self) -> Vec<ConnectionConfig> {
        self.state.lock().await.open_configs.clone()
    }

    pub async fn close_calls(&self) -> usize {
        self.state.lock().await.close_calls
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    pub async fn subscribed(&self) -> Vec<String> {
        self.state.lock().await.subscribed.clone()
    }

    /// Non-blocking view of `subscribed`, for use inside synchronous handlers
    pub fn try_subscribed(&self) -> Option<Vec<String>> {
        self.state
            .try_lock()
            .ok()
            .map(|state| state.subscribed.clone())
    }

    pub async fn unsubscribed(&self) -> Vec<String> {
        self.state.lock().await.unsubscribed.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    /// Payloads published on exactly `topic`
    pub async fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub async fn clear_history(&self) {
        let mut state = self.state.lock().await;
        state.subscribed.clear();
        state.unsubscribed.clear();
        state.published.clear();
    }

    async fn emit_current(&self, event: TransportEvent) -> bool {
        let state = self.state.lock().await;
        match &state.current {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    /// Deliver a message on the current session; false when none is open
    pub async fn inject_message(&self, topic: &str, payload: impl AsRef<[u8]>) -> bool {
        self.emit_current(TransportEvent::MessageArrived {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_ref()),
        })
        .await
    }

    /// Drop the current session as the broker would
    pub async fn drop_connection(&self, reason: &str) -> bool {
        self.emit_current(TransportEvent::ConnectionLost(reason.to_string()))
            .await
    }

    /// Finish a hanging open successfully
    pub async fn complete_open(&self) -> bool {
        self.emit_current(TransportEvent::Connected).await
    }

    /// Finish a hanging open with a failure
    pub async fn fail_open(&self, reason: &str) -> bool {
        self.emit_current(TransportEvent::OpenFailed(reason.to_string()))
            .await
    }

    /// Emit through the sink handed to the `index`-th open, even if superseded
    pub async fn emit_on_session(&self, index: usize, event: TransportEvent) -> bool {
        let state = self.state.lock().await;
        match state.sinks.get(index) {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}

#[async_trait]
impl TransportBinding for MockTransport {
    type Error = MockTransportError;

    async fn open(&mut self, config: &ConnectionConfig, sink: EventSink) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        state.open_configs.push(config.clone());
        let behavior = state.script.pop_front().unwrap_or(state.fallback);

        match behavior {
            OpenBehavior::Reject => {
                return Err(MockTransportError("open rejected".to_string()));
            }
            OpenBehavior::Succeed => {
                sink.emit(TransportEvent::Connected);
            }
            OpenBehavior::Fail => {
                sink.emit(TransportEvent::OpenFailed("Connection refused".to_string()));
            }
            OpenBehavior::Hang => {}
        }

        state.sinks.push(sink.clone());
        state.current = Some(sink);
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().await;
        state.close_calls += 1;
        state.current = None;
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            return Err(MockTransportError("not open".to_string()));
        }
        if state.fail_subscribe {
            return Err(MockTransportError("subscribe refused".to_string()));
        }
        state.subscribed.push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            return Err(MockTransportError("not open".to_string()));
        }
        state.unsubscribed.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            return Err(MockTransportError("not open".to_string()));
        }
        if state.fail_publish {
            return Err(MockTransportError("publish refused".to_string()));
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }
}
