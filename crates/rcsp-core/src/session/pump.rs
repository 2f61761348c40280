//! Windowed data pump.
//!
//! The device owns the transfer schedule: every window ACK names an offset
//! and a byte budget, and the pump answers with exactly the requested
//! slice. There is no host-side pacing fallback; a device that stops
//! ACKing fails the upload.

use std::cmp::min;

use chrono::Local;
use tracing::{debug, warn};

use super::upload::{UploadSession, completion_path};
use crate::bus::NotificationBus;
use crate::crc::crc16_xmodem;
use crate::error::{CoreError, WaitPoint};
use crate::events::{UploadEvent, UploadObserver, UploadPhase};
use crate::protocol::constants::{
    CMD_DATA, CMD_FILE_COMPLETE, CMD_SESSION_CLOSE, CMD_WINDOW_ACK, DATA_FRAME_TAG,
    INITIAL_WINDOW_ACK_TIMEOUT, WINDOW_EVENT_TIMEOUT, WINDOW_SLOTS,
};
use crate::protocol::{Frame, FrameFlag, WindowAck};
use crate::session::CancelHandle;
use crate::transport::{BadgeTransport, Endpoint};

/// Wait budgets, overridable in tests.
pub(crate) struct PumpTimeouts {
    pub initial: std::time::Duration,
    pub event: std::time::Duration,
}

impl Default for PumpTimeouts {
    fn default() -> Self {
        Self {
            initial: INITIAL_WINDOW_ACK_TIMEOUT,
            event: WINDOW_EVENT_TIMEOUT,
        }
    }
}

/// What the device said after a window was sent.
enum PumpEvent {
    Window(WindowAck),
    Complete { device_seq: u8 },
    Close { device_seq: u8, status: u8 },
}

pub(crate) struct WindowedDataPump<'a, T: BadgeTransport, O: UploadObserver> {
    transport: &'a T,
    bus: &'a NotificationBus,
    observer: &'a O,
    cancel: &'a CancelHandle,
    session: &'a mut UploadSession,
    payload: &'a [u8],
    timeouts: PumpTimeouts,
}

impl<'a, T: BadgeTransport, O: UploadObserver> WindowedDataPump<'a, T, O> {
    pub fn new(
        transport: &'a T,
        bus: &'a NotificationBus,
        observer: &'a O,
        cancel: &'a CancelHandle,
        session: &'a mut UploadSession,
        payload: &'a [u8],
    ) -> Self {
        Self {
            transport,
            bus,
            observer,
            cancel,
            session,
            payload,
            timeouts: PumpTimeouts::default(),
        }
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, timeouts: PumpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Run the transfer until SESSION_CLOSE; returns its status byte.
    pub fn run(mut self) -> Result<u8, CoreError> {
        let mut ack = self.wait_initial_ack()?;
        loop {
            self.check_cancel()?;
            if ack.status != 0 {
                // The device may self-correct; only SESSION_CLOSE decides.
                warn!(status = ack.status, "Non-zero window ACK status");
                self.observer.on_event(&UploadEvent::DeviceStatus {
                    phase: UploadPhase::DataTransfer,
                    status: ack.status,
                });
            }
            self.observer.on_event(&UploadEvent::WindowGranted {
                win_size: ack.win_size,
                next_offset: ack.next_offset,
            });
            self.send_window(&ack)?;

            ack = loop {
                match self.next_event()? {
                    PumpEvent::Window(next) => break next,
                    PumpEvent::Complete { device_seq } => self.answer_completion(device_seq)?,
                    PumpEvent::Close { device_seq, status } => {
                        self.answer_close(device_seq)?;
                        return Ok(status);
                    }
                }
            };
        }
    }

    fn wait_initial_ack(&self) -> Result<WindowAck, CoreError> {
        let frame = self.bus.wait_frame(
            self.timeouts.initial,
            WaitPoint::InitialWindowAck,
            |frame| frame.flag == FrameFlag::Notification && frame.cmd == CMD_WINDOW_ACK,
        )?;
        Ok(WindowAck::from_body(&frame.body)?)
    }

    /// Emit the data frames for one window grant.
    fn send_window(&mut self, ack: &WindowAck) -> Result<(), CoreError> {
        let start = min(ack.next_offset as usize, self.payload.len());
        let end = min(start + ack.win_size as usize, self.payload.len());
        let window = &self.payload[start..end];
        debug!(
            offset = start,
            len = window.len(),
            chunk_size = self.session.chunk_size,
            "Sending window"
        );

        for (index, chunk) in window.chunks(self.session.chunk_size as usize).enumerate() {
            self.check_cancel()?;
            let slot = (index % WINDOW_SLOTS as usize) as u8;
            let crc = crc16_xmodem(chunk);

            let mut body = Vec::with_capacity(5 + chunk.len());
            body.push(self.session.next_seq());
            body.push(DATA_FRAME_TAG);
            body.push(slot);
            body.extend_from_slice(&crc.to_be_bytes());
            body.extend_from_slice(chunk);

            let frame = Frame::notification(CMD_DATA, body);
            self.transport.write(Endpoint::DataWrite, &frame.encode())?;

            self.session.bytes_sent += chunk.len() as u64;
            self.observer.on_event(&UploadEvent::Progress {
                sent: self.session.bytes_sent,
                total: self.session.payload_len as u64,
            });
        }
        Ok(())
    }

    fn next_event(&self) -> Result<PumpEvent, CoreError> {
        let frame = self
            .bus
            .wait_frame(self.timeouts.event, WaitPoint::WindowAck, |frame| {
                matches!(
                    (frame.flag, frame.cmd),
                    (FrameFlag::Notification, CMD_WINDOW_ACK)
                        | (FrameFlag::Command, CMD_FILE_COMPLETE)
                        | (FrameFlag::Command, CMD_SESSION_CLOSE)
                )
            })?;
        let device_seq = frame.body.first().copied().unwrap_or(0);
        match frame.cmd {
            CMD_WINDOW_ACK => Ok(PumpEvent::Window(WindowAck::from_body(&frame.body)?)),
            CMD_FILE_COMPLETE => Ok(PumpEvent::Complete { device_seq }),
            _ => Ok(PumpEvent::Close {
                device_seq,
                status: frame.body.get(1).copied().unwrap_or(0),
            }),
        }
    }

    /// Reply to FILE_COMPLETE with the stored path, unless the bus fast
    /// path already did.
    fn answer_completion(&self, device_seq: u8) -> Result<(), CoreError> {
        if self.bus.completion_fired() {
            return Ok(());
        }
        let path = completion_path(self.session.kind, Local::now().naive_local());
        let mut body = vec![0x00, device_seq];
        body.extend_from_slice(&path);
        let reply = Frame::response(CMD_FILE_COMPLETE, body);
        self.transport.write(Endpoint::DataWrite, &reply.encode())?;
        Ok(())
    }

    fn answer_close(&self, device_seq: u8) -> Result<(), CoreError> {
        let reply = Frame::response(CMD_SESSION_CLOSE, vec![0x00, device_seq]);
        self.transport.write(Endpoint::DataWrite, &reply.encode())?;
        Ok(())
    }

    fn check_cancel(&self) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::session::MediaKind;
    use crate::transport::MockTransport;
    use byteorder::{BigEndian, ByteOrder};
    use std::sync::Arc;
    use std::time::Duration;

    fn window_ack(wa_seq: u8, win_size: u16, next_offset: u32) -> Vec<u8> {
        let mut body = vec![wa_seq, 0x00, 0, 0, 0, 0, 0, 0];
        BigEndian::write_u16(&mut body[2..4], win_size);
        BigEndian::write_u32(&mut body[4..8], next_offset);
        Frame::notification(CMD_WINDOW_ACK, body).encode()
    }

    fn wire(mock: &Arc<MockTransport>) -> NotificationBus {
        let weak = Arc::downgrade(mock);
        let bus = NotificationBus::new(Box::new(move |bytes| {
            if let Some(t) = weak.upgrade() {
                let _ = t.write(Endpoint::DataWrite, bytes);
            }
        }));
        mock.subscribe(bus.sink()).unwrap();
        bus
    }

    /// Device model for the canonical five-window trace of a 15,647-byte
    /// still at chunk size 490.
    fn canonical_device(mock: &Arc<MockTransport>) {
        let mut data_frames = 0u32;
        mock.add_responder(Box::new(move |endpoint, data: &[u8]| {
            if endpoint != Endpoint::DataWrite {
                return Vec::new();
            }
            let Ok(frame) = Frame::decode(data) else {
                return Vec::new();
            };
            match (frame.flag, frame.cmd) {
                (FrameFlag::Notification, CMD_DATA) => {
                    data_frames += 1;
                    let reply = match data_frames {
                        8 => window_ack(2, 3920, 4410),
                        16 => window_ack(3, 3920, 8330),
                        24 => window_ack(4, 3920, 12250),
                        31 => window_ack(5, 490, 0),
                        32 => Frame::command(CMD_FILE_COMPLETE, vec![0x06]).encode(),
                        _ => return Vec::new(),
                    };
                    vec![(Endpoint::DataNotify, reply)]
                }
                (FrameFlag::Response, CMD_FILE_COMPLETE) => vec![(
                    Endpoint::DataNotify,
                    Frame::command(CMD_SESSION_CLOSE, vec![0x07, 0x00]).encode(),
                )],
                _ => Vec::new(),
            }
        }));
    }

    fn payload_15647() -> Vec<u8> {
        (0..15647u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_canonical_five_window_transfer() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);
        canonical_device(&mock);

        let payload = payload_15647();
        let mut session = UploadSession::new(&payload, MediaKind::Still);
        session.set_seq(0x06);

        let cancel = CancelHandle::new();
        bus.arm_completion_responder(completion_path(
            MediaKind::Still,
            Local::now().naive_local(),
        ));
        // First window grant arrives on its own after metadata.
        mock.notify(Endpoint::DataNotify, &window_ack(1, 3920, 490));

        let status = WindowedDataPump::new(
            mock.as_ref(),
            &bus,
            &NullObserver,
            &cancel,
            &mut session,
            &payload,
        )
        .run()
        .unwrap();
        assert_eq!(status, 0);

        let data_frames: Vec<Frame> = mock
            .writes_on(Endpoint::DataWrite)
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok())
            .filter(|f| f.cmd == CMD_DATA)
            .collect();
        assert_eq!(data_frames.len(), 32);

        // Sequence bytes run 0x06..=0x25 without gaps.
        for (i, frame) in data_frames.iter().enumerate() {
            assert_eq!(frame.body[0], 0x06 + i as u8);
            assert_eq!(frame.body[1], DATA_FRAME_TAG);
        }
        assert_eq!(data_frames.last().unwrap().body[0], 0x25);

        // Every frame carries the CRC of its own chunk.
        let mut total = 0usize;
        for frame in &data_frames {
            let chunk = &frame.body[5..];
            let crc = BigEndian::read_u16(&frame.body[3..5]);
            assert_eq!(crc, crc16_xmodem(chunk));
            total += chunk.len();
        }
        assert_eq!(total, payload.len());

        // The commit frame re-sends the payload prefix with slot 0.
        let commit = data_frames.last().unwrap();
        assert_eq!(commit.body[2], 0);
        assert_eq!(&commit.body[5..], &payload[..490]);

        // The partial window (12250..15647) ends with a 457-byte chunk.
        assert_eq!(data_frames[30].body[5..].len(), 3397 - 6 * 490);

        // Slots cycle from zero within each window.
        assert_eq!(data_frames[0].body[2], 0);
        assert_eq!(data_frames[7].body[2], 7);
        assert_eq!(data_frames[8].body[2], 0);

        assert_eq!(session.bytes_sent, payload.len() as u64);
    }

    #[test]
    fn test_missing_initial_ack_is_fatal() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);
        let payload = vec![0u8; 100];
        let mut session = UploadSession::new(&payload, MediaKind::Still);
        let cancel = CancelHandle::new();

        let err = WindowedDataPump::new(
            mock.as_ref(),
            &bus,
            &NullObserver,
            &cancel,
            &mut session,
            &payload,
        )
        .with_timeouts(PumpTimeouts {
            initial: Duration::from_millis(30),
            event: Duration::from_millis(30),
        })
        .run()
        .unwrap_err();

        assert!(matches!(
            err,
            CoreError::Timeout {
                waiting: WaitPoint::InitialWindowAck
            }
        ));
        // No frames were blasted without a grant.
        assert!(mock.writes_on(Endpoint::DataWrite).is_empty());
    }

    #[test]
    fn test_single_chunk_payload_tail_then_commit() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);

        let payload = vec![0x3Cu8; 490];
        let mut session = UploadSession::new(&payload, MediaKind::Still);
        session.set_seq(0x06);
        let cancel = CancelHandle::new();

        // Tail window beyond the payload yields no frames; the device then
        // commits the prefix.
        let mut sent_close = false;
        mock.add_responder(Box::new(move |endpoint, data: &[u8]| {
            if endpoint != Endpoint::DataWrite {
                return Vec::new();
            }
            let Ok(frame) = Frame::decode(data) else {
                return Vec::new();
            };
            match (frame.flag, frame.cmd) {
                (FrameFlag::Notification, CMD_DATA) if !sent_close => {
                    sent_close = true;
                    vec![(
                        Endpoint::DataNotify,
                        Frame::command(CMD_SESSION_CLOSE, vec![0x07, 0x00]).encode(),
                    )]
                }
                _ => Vec::new(),
            }
        }));

        mock.notify(Endpoint::DataNotify, &window_ack(1, 3920, 490));
        mock.notify(Endpoint::DataNotify, &window_ack(2, 490, 0));

        let status = WindowedDataPump::new(
            mock.as_ref(),
            &bus,
            &NullObserver,
            &cancel,
            &mut session,
            &payload,
        )
        .run()
        .unwrap();
        assert_eq!(status, 0);

        let data_frames: Vec<Frame> = mock
            .writes_on(Endpoint::DataWrite)
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok())
            .filter(|f| f.cmd == CMD_DATA)
            .collect();
        assert_eq!(data_frames.len(), 1);
        assert_eq!(data_frames[0].body[2], 0);
        assert_eq!(&data_frames[0].body[5..], &payload[..]);
    }

    #[test]
    fn test_nonzero_close_status_is_surfaced() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);

        let payload = vec![1u8; 10];
        let mut session = UploadSession::new(&payload, MediaKind::Still);
        let cancel = CancelHandle::new();

        mock.notify(Endpoint::DataNotify, &window_ack(1, 10, 0));
        mock.add_responder(Box::new(|endpoint, data: &[u8]| {
            if endpoint == Endpoint::DataWrite
                && Frame::decode(data).is_ok_and(|f| f.cmd == CMD_DATA)
            {
                vec![(
                    Endpoint::DataNotify,
                    Frame::command(CMD_SESSION_CLOSE, vec![0x07, 0x05]).encode(),
                )]
            } else {
                Vec::new()
            }
        }));

        let status = WindowedDataPump::new(
            mock.as_ref(),
            &bus,
            &NullObserver,
            &cancel,
            &mut session,
            &payload,
        )
        .run()
        .unwrap();
        assert_eq!(status, 0x05);
    }

    #[test]
    fn test_cancellation_stops_the_pump() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);

        let payload = vec![1u8; 10];
        let mut session = UploadSession::new(&payload, MediaKind::Still);
        let cancel = CancelHandle::new();
        cancel.cancel();

        mock.notify(Endpoint::DataNotify, &window_ack(1, 10, 0));
        let err = WindowedDataPump::new(
            mock.as_ref(),
            &bus,
            &NullObserver,
            &cancel,
            &mut session,
            &payload,
        )
        .run()
        .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }
}
