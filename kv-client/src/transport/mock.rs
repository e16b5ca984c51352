//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while a factory hands
/// clones to the code under test. `recv()` waits until a frame is queued or
/// the connection goes away.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    signal: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_attempts: usize,
    sent_messages: Vec<String>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    refuse_connections: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be returned by a `recv()` call.
    pub fn queue_response(&self, data: impl Into<Vec<u8>>) {
        self.inner.lock().receive_queue.push_back(data.into());
        self.signal.notify_waiters();
    }

    /// Get all frames that were sent.
    pub fn sent_messages(&self) -> Vec<String> {
        self.inner.lock().sent_messages.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<String> {
        self.inner.lock().sent_messages.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.inner.lock().connected_address.clone()
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().connect_attempts
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause every connect() to fail until [`accept_connections`] is called.
    ///
    /// [`accept_connections`]: MockTransport::accept_connections
    pub fn refuse_connections(&self, error: &str) {
        self.inner.lock().refuse_connections = Some(error.to_string());
    }

    /// Undo [`refuse_connections`](MockTransport::refuse_connections).
    pub fn accept_connections(&self) {
        self.inner.lock().refuse_connections = None;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner.lock().fail_next_recv = Some(error.to_string());
        self.signal.notify_waiters();
    }

    /// Simulate the remote side dropping the connection.
    pub fn drop_connection(&self) {
        self.inner.lock().connected = false;
        self.signal.notify_waiters();
    }

    /// Clear all state (messages, queue, connection).
    pub fn reset(&self) {
        *self.inner.lock() = MockTransportInner::default();
        self.signal.notify_waiters();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.connect_attempts += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if let Some(error) = &inner.refuse_connections {
            return Err(TransportError::ConnectionFailed(error.clone()));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_messages.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        loop {
            // Registered before inspecting state so a wakeup between the
            // check and the await is not lost.
            let notified = self.signal.notified();
            {
                let mut inner = self.inner.lock();

                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }

                // Check for forced failure
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }

                if let Some(frame) = inner.receive_queue.pop_front() {
                    return Ok(frame);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().connected = false;
        self.signal.notify_waiters();
        Ok(())
    }
}
