//! Notification dispatcher.
//!
//! All inbound payloads funnel through here. The bus keeps a bounded FIFO
//! of raw payloads, answers device-initiated commands inside the arrival
//! callback (the device penalizes slow responders, so the reply cannot wait
//! for user code), and wakes predicate-keyed waiters.
//!
//! Outbound writes from the arrival path go through a write-sink capability
//! handed in at construction; the bus never holds a reference to the
//! session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{CoreError, WaitPoint};
use crate::protocol::constants::{
    CMD_FILE_COMPLETE, CMD_SESSION_CLOSE, CMD_WINDOW_ACK, FRAME_MAGIC, NOTIFICATION_QUEUE_CAP,
};
use crate::protocol::{Frame, FrameFlag};
use crate::transport::{Endpoint, NotificationSink};

/// Write capability for arrival-path replies (targets the data endpoint).
pub type WriteSink = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A queued inbound payload.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub endpoint: Endpoint,
    pub payload: Vec<u8>,
}

struct BusInner {
    queue: Mutex<VecDeque<Inbound>>,
    available: Condvar,
    ack_sink: WriteSink,
    responder_armed: AtomicBool,
    responder_fired: AtomicBool,
    completion_path: Mutex<Option<Vec<u8>>>,
}

/// Classifies inbound payloads, auto-acks device commands, parks the rest
/// for waiters.
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new(ack_sink: WriteSink) -> Self {
        Self {
            inner: Arc::new(BusInner {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                ack_sink,
                responder_armed: AtomicBool::new(false),
                responder_fired: AtomicBool::new(false),
                completion_path: Mutex::new(None),
            }),
        }
    }

    /// Notification sink to register with the transport.
    pub fn sink(&self) -> NotificationSink {
        let inner = Arc::clone(&self.inner);
        Box::new(move |endpoint, payload| BusInner::handle(&inner, endpoint, payload))
    }

    /// Arm the FILE_COMPLETE fast path with prebuilt path bytes. The reply
    /// is written directly from the arrival callback.
    pub fn arm_completion_responder(&self, path_bytes: Vec<u8>) {
        *self.inner.completion_path.lock().unwrap() = Some(path_bytes);
        self.inner.responder_fired.store(false, Ordering::Release);
        self.inner.responder_armed.store(true, Ordering::Release);
    }

    pub fn disarm_completion_responder(&self) {
        self.inner.responder_armed.store(false, Ordering::Release);
        *self.inner.completion_path.lock().unwrap() = None;
    }

    /// Whether the armed responder already answered a FILE_COMPLETE.
    pub fn completion_fired(&self) -> bool {
        self.inner.responder_fired.load(Ordering::Acquire)
    }

    /// Block until a queued payload matches `pred` or the deadline passes.
    /// A match is removed from the queue atomically.
    pub fn wait_raw(
        &self,
        timeout: Duration,
        waiting: WaitPoint,
        pred: impl Fn(&Inbound) -> bool,
    ) -> Result<Inbound, CoreError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().unwrap();
        loop {
            if let Some(idx) = queue.iter().position(&pred) {
                return Ok(queue.remove(idx).expect("index from position"));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::Timeout { waiting });
            }
            let (guard, _) = self
                .inner
                .available
                .wait_timeout(queue, deadline - now)
                .unwrap();
            queue = guard;
        }
    }

    /// Like [`wait_raw`](Self::wait_raw), over decoded FE frames from the
    /// data endpoint.
    pub fn wait_frame(
        &self,
        timeout: Duration,
        waiting: WaitPoint,
        pred: impl Fn(&Frame) -> bool,
    ) -> Result<Frame, CoreError> {
        let inbound = self.wait_raw(timeout, waiting, |item| {
            item.endpoint == Endpoint::DataNotify
                && Frame::decode(&item.payload).is_ok_and(|frame| pred(&frame))
        })?;
        Ok(Frame::decode(&inbound.payload).expect("matched payload decodes"))
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

impl BusInner {
    fn handle(inner: &Arc<BusInner>, endpoint: Endpoint, payload: Vec<u8>) {
        if endpoint == Endpoint::DataNotify {
            match Frame::decode(&payload) {
                Ok(frame) if frame.flag == FrameFlag::Command => {
                    let device_seq = frame.body.first().copied().unwrap_or(0);
                    match frame.cmd {
                        CMD_FILE_COMPLETE => inner.answer_completion(device_seq),
                        CMD_SESSION_CLOSE | CMD_WINDOW_ACK => {}
                        cmd => {
                            // Foreign device command: ack here, drop it.
                            debug!(cmd = format!("0x{cmd:02X}"), "Auto-acking device command");
                            let reply = Frame::response(cmd, vec![0x00, device_seq]);
                            (inner.ack_sink)(&reply.encode());
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) if payload.starts_with(&FRAME_MAGIC) => {
                    warn!(error = %err, "Malformed frame on data endpoint");
                }
                Err(_) => {} // raw handshake traffic
            }
        }
        inner.enqueue(Inbound { endpoint, payload });
    }

    /// FILE_COMPLETE fast path: reply with the armed path before the frame
    /// reaches the queue. One-shot per arming.
    fn answer_completion(&self, device_seq: u8) {
        if !self.responder_armed.load(Ordering::Acquire) {
            return;
        }
        if self.responder_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        let path = self.completion_path.lock().unwrap().clone();
        if let Some(path) = path {
            let mut body = vec![0x00, device_seq];
            body.extend_from_slice(&path);
            (self.ack_sink)(&Frame::response(CMD_FILE_COMPLETE, body).encode());
        }
    }

    fn enqueue(&self, item: Inbound) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= NOTIFICATION_QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(item);
        drop(queue);
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn bus_with_capture() -> (NotificationBus, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let written = Arc::new(StdMutex::new(Vec::new()));
        let sink_log = Arc::clone(&written);
        let bus = NotificationBus::new(Box::new(move |bytes: &[u8]| {
            sink_log.lock().unwrap().push(bytes.to_vec());
        }));
        (bus, written)
    }

    fn deliver(bus: &NotificationBus, endpoint: Endpoint, payload: &[u8]) {
        (bus.sink())(endpoint, payload.to_vec());
    }

    #[test]
    fn test_foreign_command_is_acked_and_dropped() {
        let (bus, written) = bus_with_capture();
        let frame = Frame::command(0x10, vec![0x07, 0x01]);
        deliver(&bus, Endpoint::DataNotify, &frame.encode());

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let reply = Frame::decode(&written[0]).unwrap();
        assert_eq!(reply.flag, FrameFlag::Response);
        assert_eq!(reply.cmd, 0x10);
        assert_eq!(reply.body, vec![0x00, 0x07]);
        assert_eq!(bus.queued(), 0);
    }

    #[test]
    fn test_session_commands_are_queued_not_acked() {
        let (bus, written) = bus_with_capture();
        for cmd in [CMD_SESSION_CLOSE, CMD_WINDOW_ACK] {
            deliver(
                &bus,
                Endpoint::DataNotify,
                &Frame::command(cmd, vec![0x01]).encode(),
            );
        }
        assert!(written.lock().unwrap().is_empty());
        assert_eq!(bus.queued(), 2);
    }

    #[test]
    fn test_responses_and_notifications_are_queued() {
        let (bus, written) = bus_with_capture();
        deliver(
            &bus,
            Endpoint::DataNotify,
            &Frame::response(0x21, vec![0x00, 0x03]).encode(),
        );
        deliver(
            &bus,
            Endpoint::DataNotify,
            &Frame::notification(CMD_WINDOW_ACK, vec![0; 8]).encode(),
        );
        assert!(written.lock().unwrap().is_empty());
        assert_eq!(bus.queued(), 2);
    }

    #[test]
    fn test_raw_payloads_are_queued() {
        let (bus, _) = bus_with_capture();
        deliver(&bus, Endpoint::DataNotify, &[0x01; 17]);
        deliver(&bus, Endpoint::CtrlNotify, &[0x9E, 0xE6, 0x00]);
        assert_eq!(bus.queued(), 2);
    }

    #[test]
    fn test_queue_eviction_at_capacity() {
        let (bus, _) = bus_with_capture();
        for i in 0..=NOTIFICATION_QUEUE_CAP {
            deliver(&bus, Endpoint::CtrlNotify, &[i as u8]);
        }
        assert_eq!(bus.queued(), NOTIFICATION_QUEUE_CAP);
        // Byte 0 was evicted.
        let err = bus.wait_raw(
            Duration::from_millis(10),
            WaitPoint::QixReply(0),
            |item| item.payload == [0u8],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_wait_frame_matches_and_removes() {
        let (bus, _) = bus_with_capture();
        deliver(
            &bus,
            Endpoint::DataNotify,
            &Frame::response(0x21, vec![0x00, 0x03]).encode(),
        );
        let frame = bus
            .wait_frame(Duration::from_millis(50), WaitPoint::Ack(0x21), |f| {
                f.cmd == 0x21 && f.flag == FrameFlag::Response
            })
            .unwrap();
        assert_eq!(frame.body, vec![0x00, 0x03]);
        assert_eq!(bus.queued(), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let (bus, _) = bus_with_capture();
        let err = bus
            .wait_frame(Duration::from_millis(20), WaitPoint::Ack(0x21), |_| true)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Timeout {
                waiting: WaitPoint::Ack(0x21)
            }
        ));
    }

    #[test]
    fn test_waiter_wakes_on_arrival_from_other_thread() {
        let (bus, _) = bus_with_capture();
        let sink = bus.sink();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            sink(Endpoint::DataNotify, Frame::response(0x06, vec![0x00]).encode());
        });
        let frame = bus
            .wait_frame(Duration::from_secs(2), WaitPoint::Ack(0x06), |f| {
                f.cmd == 0x06
            })
            .unwrap();
        assert_eq!(frame.body, vec![0x00]);
        handle.join().unwrap();
    }

    #[test]
    fn test_completion_fast_path_fires_once() {
        let (bus, written) = bus_with_capture();
        bus.arm_completion_responder(vec![0xAA, 0xBB]);

        let ask = Frame::command(CMD_FILE_COMPLETE, vec![0x06]);
        deliver(&bus, Endpoint::DataNotify, &ask.encode());
        deliver(&bus, Endpoint::DataNotify, &ask.encode());

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let reply = Frame::decode(&written[0]).unwrap();
        assert_eq!(reply.cmd, CMD_FILE_COMPLETE);
        assert_eq!(reply.body, vec![0x00, 0x06, 0xAA, 0xBB]);
        assert!(bus.completion_fired());
        // Both frames still reach the queue for the session to observe.
        assert_eq!(bus.queued(), 2);
    }

    #[test]
    fn test_disarmed_responder_stays_quiet() {
        let (bus, written) = bus_with_capture();
        bus.arm_completion_responder(vec![0xAA]);
        bus.disarm_completion_responder();
        deliver(
            &bus,
            Endpoint::DataNotify,
            &Frame::command(CMD_FILE_COMPLETE, vec![0x06]).encode(),
        );
        assert!(written.lock().unwrap().is_empty());
    }
}
