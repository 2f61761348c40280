//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{BadgeTransport, Endpoint, NotificationSink, TransportError};

/// Scripted device behavior: inspects a write and produces the
/// notifications the fake device answers with.
pub type MockResponder =
    Box<dyn FnMut(Endpoint, &[u8]) -> Vec<(Endpoint, Vec<u8>)> + Send>;

/// Mock transport for unit testing the protocol stack.
///
/// Writes are captured; notifications are produced either by direct
/// injection ([`notify`](Self::notify)) or by scripted responders that
/// model the device.
pub struct MockTransport {
    write_log: Arc<Mutex<Vec<(Endpoint, Vec<u8>)>>>,
    // Arc so delivery can run with the lock released; a reply may trigger
    // a further write from the sink callback (auto-ack, completion fast
    // path), which re-enters notify on the same thread.
    sink: Arc<Mutex<Option<Arc<NotificationSink>>>>,
    responders: Arc<Mutex<Vec<MockResponder>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            write_log: Arc::new(Mutex::new(Vec::new())),
            sink: Arc::new(Mutex::new(None)),
            responders: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Inject a notification as if the device had sent it.
    pub fn notify(&self, endpoint: Endpoint, payload: &[u8]) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(endpoint, payload.to_vec());
        }
    }

    /// Install a scripted responder consulted on every write.
    pub fn add_responder(&self, responder: MockResponder) {
        self.responders.lock().unwrap().push(responder);
    }

    /// All captured writes, in order.
    pub fn writes(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes on one endpoint.
    pub fn writes_on(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(ep, _)| *ep == endpoint)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BadgeTransport for MockTransport {
    fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        if !endpoint.is_writable() {
            return Err(TransportError::NotWritable(endpoint));
        }
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log
            .lock()
            .unwrap()
            .push((endpoint, data.to_vec()));

        // Collect replies with the responder lock held, deliver with it
        // released; a reply may trigger a further write from the sink
        // callback (auto-ack, completion fast path).
        let mut replies = VecDeque::new();
        {
            let mut responders = self.responders.lock().unwrap();
            for responder in responders.iter_mut() {
                replies.extend(responder(endpoint, data));
            }
        }
        while let Some((ep, payload)) = replies.pop_front() {
            self.notify(ep, &payload);
        }
        Ok(())
    }

    fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError> {
        *self.sink.lock().unwrap() = Some(Arc::new(sink));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}
