//! Event system for UI decoupling.
//!
//! Lets a CLI or GUI follow an upload without tight coupling to the
//! protocol stack.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Upload phases, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Authenticating,
    ResetFlag,
    ControlBootstrap,
    InfoQuery,
    ConfigQuery,
    ReadySignal,
    SessionOpen,
    TransferParams,
    Metadata,
    DataTransfer,
    CompletionHandshake,
    Complete,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Idle => "Idle",
            UploadPhase::Authenticating => "Authenticating",
            UploadPhase::ResetFlag => "Reset Flag",
            UploadPhase::ControlBootstrap => "Control Bootstrap",
            UploadPhase::InfoQuery => "Info Query",
            UploadPhase::ConfigQuery => "Config Query",
            UploadPhase::ReadySignal => "Ready Signal",
            UploadPhase::SessionOpen => "Session Open",
            UploadPhase::TransferParams => "Transfer Parameters",
            UploadPhase::Metadata => "Metadata",
            UploadPhase::DataTransfer => "Data Transfer",
            UploadPhase::CompletionHandshake => "Completion Handshake",
            UploadPhase::Complete => "Complete",
        };
        write!(f, "{name}")
    }
}

/// Events emitted by an upload session.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Phase changed.
    PhaseChanged { from: UploadPhase, to: UploadPhase },
    /// Cumulative progress through the payload.
    Progress { sent: u64, total: u64 },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Device granted a transfer window.
    WindowGranted { win_size: u16, next_offset: u32 },
    /// Device reported a non-zero status (not necessarily fatal).
    DeviceStatus { phase: UploadPhase, status: u8 },
    /// Upload finished successfully.
    Complete,
}

/// Observer trait for receiving upload events.
pub trait UploadObserver: Send + Sync {
    fn on_event(&self, event: &UploadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UploadObserver for NullObserver {
    fn on_event(&self, _event: &UploadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UploadObserver for TracingObserver {
    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UploadEvent::Progress { sent, total } => {
                let pct = if *total > 0 { sent * 100 / total } else { 0 };
                tracing::debug!(sent, total, "Progress {pct}%");
            }
            UploadEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
                LogLevel::Error => tracing::error!("{message}"),
            },
            UploadEvent::WindowGranted {
                win_size,
                next_offset,
            } => {
                tracing::debug!(win_size, next_offset, "Window granted");
            }
            UploadEvent::DeviceStatus { phase, status } => {
                tracing::warn!(phase = %phase, status, "Device status");
            }
            UploadEvent::Complete => {
                tracing::info!("Upload complete");
            }
        }
    }
}
