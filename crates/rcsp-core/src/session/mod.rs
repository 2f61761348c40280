//! Upload session orchestration.
//!
//! One upload walks a fixed ladder of phases: reset, control bootstrap,
//! best-effort queries, ready signal, session open, transfer parameters,
//! metadata, then the windowed data transfer and the completion handshake.
//! Session-critical phases fail the upload on any error; bootstrap and
//! query phases swallow timeouts and move on.

mod pump;
mod upload;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{BigEndian, ByteOrder};
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use tracing::{debug, info, warn};

use crate::bus::NotificationBus;
use crate::error::{CoreError, WaitPoint};
use crate::events::{LogLevel, UploadEvent, UploadObserver, UploadPhase};
use crate::protocol::constants::{
    ACK_TIMEOUT, CMD_DEVICE_CONFIG, CMD_DEVICE_INFO, CMD_FILE_METADATA, CMD_RESET_FLAG,
    CMD_SESSION_OPEN, CMD_TRANSFER_PARAMS, MAX_PAYLOAD_LEN, QIX_CMD_RET_BATTERY,
    QIX_CMD_RET_SCREEN_INFO, QIX_CMD_TIME_SET, QIX_FLAG_SET, QIX_READY_SIGNATURE,
    QIX_REPLY_TIMEOUT, QIX_WRITE_HEARTBEAT, QIX_WRITE_INFO_REQUEST, QIX_WRITE_PREPARE,
    QIX_WRITE_SETTINGS, QIX_WRITE_SETTINGS_AUX,
};
use crate::protocol::{Frame, FrameFlag, QixFrame};
use crate::transport::{BadgeTransport, Endpoint};

use pump::WindowedDataPump;
use upload::{UploadSession, completion_path};

pub use upload::MediaKind;

/// Cooperative cancellation flag, checked between frames and at every
/// suspension point.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Disarms the completion fast path on every exit path.
struct ResponderGuard<'a>(&'a NotificationBus);

impl Drop for ResponderGuard<'_> {
    fn drop(&mut self) {
        self.0.disarm_completion_responder();
    }
}

pub(crate) struct SessionStateMachine<'a, T: BadgeTransport, O: UploadObserver> {
    transport: &'a T,
    bus: &'a NotificationBus,
    observer: &'a O,
    cancel: &'a CancelHandle,
    payload: &'a [u8],
    session: UploadSession,
    phase: UploadPhase,
}

impl<'a, T: BadgeTransport, O: UploadObserver> SessionStateMachine<'a, T, O> {
    pub fn new(
        transport: &'a T,
        bus: &'a NotificationBus,
        observer: &'a O,
        cancel: &'a CancelHandle,
        payload: &'a [u8],
        kind: MediaKind,
    ) -> Self {
        Self {
            transport,
            bus,
            observer,
            cancel,
            payload,
            session: UploadSession::new(payload, kind),
            phase: UploadPhase::Authenticating,
        }
    }

    pub fn run(mut self) -> Result<(), CoreError> {
        let _guard = ResponderGuard(self.bus);

        self.reset_flag()?;
        self.control_bootstrap()?;
        self.info_query()?;
        self.config_query()?;
        self.ready_signal()?;
        self.session_open()?;
        self.transfer_params()?;
        self.metadata()?;
        let close_status = self.data_transfer()?;

        self.finish_phase(UploadPhase::Complete);
        if close_status == 0 {
            info!(bytes = self.session.bytes_sent, "Upload complete");
            self.observer.on_event(&UploadEvent::Complete);
            Ok(())
        } else {
            Err(CoreError::DeviceStatus {
                phase: "session close",
                status: close_status,
            })
        }
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    /// Fixed-body reset; the counter starts at 0x01 right after it.
    fn reset_flag(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::ResetFlag)?;
        self.send_command(CMD_RESET_FLAG, vec![0x02, 0x00, 0x01])?;
        self.best_effort_ack(CMD_RESET_FLAG)?;
        self.session.set_seq(0x01);
        Ok(())
    }

    /// Clock sync, settings push, heartbeat on the control channel.
    fn control_bootstrap(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::ControlBootstrap)?;
        let time_set = time_set_frame(Local::now().naive_local());
        self.transport
            .write(Endpoint::CtrlWrite, &time_set.encode())?;
        self.transport
            .write(Endpoint::CtrlWrite, QIX_WRITE_SETTINGS)?;
        for aux in QIX_WRITE_SETTINGS_AUX {
            self.transport.write(Endpoint::CtrlWrite, aux)?;
        }
        self.transport
            .write(Endpoint::CtrlWrite, QIX_WRITE_HEARTBEAT)?;
        self.best_effort_qix_reply(QIX_CMD_RET_BATTERY)?;
        Ok(())
    }

    /// FE device-info probe plus the 9E info request.
    fn info_query(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::InfoQuery)?;
        let seq = self.session.next_seq();
        self.send_command(CMD_DEVICE_INFO, vec![seq, 0xFF, 0xFF, 0xFF, 0xFF, 0x01])?;
        if let Some(ack) = self.best_effort_ack(CMD_DEVICE_INFO)? {
            debug!(len = ack.body.len(), "Device info");
        }
        self.transport
            .write(Endpoint::CtrlWrite, QIX_WRITE_INFO_REQUEST)?;
        self.best_effort_qix_reply(QIX_CMD_RET_SCREEN_INFO)?;
        Ok(())
    }

    fn config_query(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::ConfigQuery)?;
        let seq = self.session.next_seq();
        self.send_command(CMD_DEVICE_CONFIG, vec![seq, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])?;
        if let Some(ack) = self.best_effort_ack(CMD_DEVICE_CONFIG)? {
            debug!(len = ack.body.len(), "Device config");
        }
        Ok(())
    }

    /// Prepare write; the device signals readiness on the control channel.
    fn ready_signal(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::ReadySignal)?;
        self.transport
            .write(Endpoint::CtrlWrite, QIX_WRITE_PREPARE)?;
        let ready = self.bus.wait_raw(
            QIX_REPLY_TIMEOUT,
            WaitPoint::QixReply(0xDC),
            |item| {
                item.endpoint == Endpoint::CtrlNotify
                    && item.payload.starts_with(&QIX_READY_SIGNATURE)
            },
        );
        match ready {
            Ok(_) => debug!("Ready signal received"),
            Err(err) if err.is_timeout() => {
                self.log(LogLevel::Warn, "No ready signal; continuing");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn session_open(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::SessionOpen)?;
        let seq = self.session.next_seq();
        self.send_command(CMD_SESSION_OPEN, vec![seq, 0x00])?;
        let ack = self.wait_ack(CMD_SESSION_OPEN)?;
        self.check_ack_status(&ack, seq, "session open")?;
        Ok(())
    }

    fn transfer_params(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::TransferParams)?;
        let seq = self.session.next_seq();
        self.send_command(
            CMD_TRANSFER_PARAMS,
            vec![seq, 0x00, 0x00, 0x00, 0x00, 0x02, 0x01],
        )?;
        let ack = self.wait_ack(CMD_TRANSFER_PARAMS)?;
        // The two trailing ACK bytes are opaque constants; only the status
        // byte is interpreted.
        self.check_ack_status(&ack, seq, "transfer parameters")?;
        Ok(())
    }

    fn metadata(&mut self) -> Result<(), CoreError> {
        self.goto_phase(UploadPhase::Metadata)?;
        if self.payload.is_empty() {
            // The device requires at least one chunk.
            return Err(CoreError::SizeLimit {
                size: 0,
                limit: MAX_PAYLOAD_LEN,
            });
        }
        let body = self.session.metadata_body();
        let seq = body[0];
        self.send_command(CMD_FILE_METADATA, body)?;
        let ack = self.wait_ack(CMD_FILE_METADATA)?;
        self.check_ack_status(&ack, seq, "metadata")?;
        if ack.body.len() >= 4 {
            let suggested = BigEndian::read_u16(&ack.body[2..4]);
            self.session.adopt_chunk_size(suggested);
            debug!(chunk_size = self.session.chunk_size, "Chunk size adopted");
        }
        Ok(())
    }

    fn data_transfer(&mut self) -> Result<u8, CoreError> {
        self.goto_phase(UploadPhase::DataTransfer)?;
        // Arm the fast path so FILE_COMPLETE gets its reply from the
        // arrival callback; the device times out near 100 ms.
        self.bus.arm_completion_responder(completion_path(
            self.session.kind,
            Local::now().naive_local(),
        ));
        let status = WindowedDataPump::new(
            self.transport,
            self.bus,
            self.observer,
            self.cancel,
            &mut self.session,
            self.payload,
        )
        .run()?;
        self.finish_phase(UploadPhase::CompletionHandshake);
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn goto_phase(&mut self, to: UploadPhase) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let from = self.phase;
        self.phase = to;
        self.observer
            .on_event(&UploadEvent::PhaseChanged { from, to });
        Ok(())
    }

    fn finish_phase(&mut self, to: UploadPhase) {
        let from = self.phase;
        self.phase = to;
        self.observer
            .on_event(&UploadEvent::PhaseChanged { from, to });
    }

    fn send_command(&self, cmd: u8, body: Vec<u8>) -> Result<(), CoreError> {
        let frame = Frame::command(cmd, body);
        self.transport.write(Endpoint::DataWrite, &frame.encode())?;
        Ok(())
    }

    fn wait_ack(&self, cmd: u8) -> Result<Frame, CoreError> {
        self.bus
            .wait_frame(ACK_TIMEOUT, WaitPoint::Ack(cmd), |frame| {
                frame.flag == FrameFlag::Response && frame.cmd == cmd
            })
    }

    /// Wait for an ACK, swallowing a timeout.
    fn best_effort_ack(&self, cmd: u8) -> Result<Option<Frame>, CoreError> {
        match self.wait_ack(cmd) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) if err.is_timeout() => {
                self.log(
                    LogLevel::Warn,
                    format!("No ACK for cmd 0x{cmd:02X}; continuing"),
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Wait for a 9E reply on the control channel, swallowing a timeout.
    fn best_effort_qix_reply(&self, cmd: u8) -> Result<(), CoreError> {
        let reply = self.bus.wait_raw(
            QIX_REPLY_TIMEOUT,
            WaitPoint::QixReply(cmd),
            |item| {
                item.endpoint == Endpoint::CtrlNotify
                    && QixFrame::decode(&item.payload).is_ok_and(|q| q.cmd == cmd)
            },
        );
        match reply {
            Ok(_) => Ok(()),
            Err(err) if err.is_timeout() => {
                debug!(cmd = format!("0x{cmd:02X}"), "No 9E reply; continuing");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn check_ack_status(
        &self,
        ack: &Frame,
        seq: u8,
        phase: &'static str,
    ) -> Result<(), CoreError> {
        let status = ack.body.first().copied().unwrap_or(0xFF);
        if status != 0 {
            return Err(CoreError::DeviceStatus { phase, status });
        }
        if ack.body.get(1) != Some(&seq) {
            warn!(phase, expected = seq, "ACK echoed an unexpected sequence");
        }
        Ok(())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.observer.on_event(&UploadEvent::Log {
            level,
            message: message.into(),
        });
    }
}

/// Clock-sync control frame: year LE16, month, day, a zero pad, hour,
/// minute.
fn time_set_frame(now: NaiveDateTime) -> QixFrame {
    let year = now.year() as u16;
    let payload = vec![
        (year & 0xFF) as u8,
        (year >> 8) as u8,
        now.month() as u8,
        now.day() as u8,
        0x00,
        now.hour() as u8,
        now.minute() as u8,
    ];
    QixFrame::new(QIX_CMD_TIME_SET, payload, QIX_FLAG_SET)
}
