//! A logical badge connection.
//!
//! Owns the transport, the notification bus, the auth flag, and the two
//! protocol sequence counters. One connection carries at most one upload at
//! a time; the auxiliary RCSP surface shares it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::warn;

use crate::auth::AuthEngine;
use crate::bus::NotificationBus;
use crate::error::CoreError;
use crate::events::{NullObserver, UploadEvent, UploadObserver, UploadPhase};
use crate::protocol::constants::MAX_PAYLOAD_LEN;
use crate::rcsp::RcspClient;
use crate::session::{CancelHandle, MediaKind, SessionStateMachine};
use crate::transport::{BadgeTransport, Endpoint};

/// Serial counter for auxiliary RCSP requests: 1..=255, skipping 0 on wrap.
pub(crate) struct RcspSeq(AtomicU8);

impl RcspSeq {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn next(&self) -> u8 {
        let step = |v: u8| if v >= 255 { 1 } else { v + 1 };
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(step(v)))
            .expect("fetch_update closure never fails");
        step(prev)
    }
}

/// 4-bit serial for dynamically built 9E requests.
pub(crate) struct QixSeq(AtomicU8);

impl QixSeq {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn next(&self) -> u8 {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some((v + 1) & 0x0F)
            })
            .expect("fetch_update closure never fails")
    }
}

pub struct Connection<T: BadgeTransport> {
    transport: Arc<T>,
    bus: NotificationBus,
    authenticated: AtomicBool,
    rcsp_seq: RcspSeq,
    qix_seq: QixSeq,
}

impl<T: BadgeTransport + 'static> Connection<T> {
    /// Wire the bus to the transport and start notification delivery.
    ///
    /// The bus gets a weak handle for its arrival-path replies, so the
    /// connection owns the only strong transport reference.
    pub fn open(transport: Arc<T>) -> Result<Self, CoreError> {
        let weak = Arc::downgrade(&transport);
        let bus = NotificationBus::new(Box::new(move |bytes| {
            let Some(transport) = weak.upgrade() else {
                return;
            };
            if let Err(err) = transport.write(Endpoint::DataWrite, bytes) {
                warn!(error = %err, "Arrival-path reply failed");
            }
        }));
        transport.subscribe(bus.sink())?;
        Ok(Self {
            transport,
            bus,
            authenticated: AtomicBool::new(false),
            rcsp_seq: RcspSeq::new(),
            qix_seq: QixSeq::new(),
        })
    }

    /// Run the mutual handshake once; later calls short-circuit.
    pub fn authenticate(&self) -> Result<(), CoreError> {
        if self.authenticated.load(Ordering::Acquire) {
            return Ok(());
        }
        AuthEngine::new(self.transport.as_ref(), &self.bus).run()?;
        self.authenticated.store(true, Ordering::Release);
        Ok(())
    }

    /// Upload a media payload, blocking until the device confirms it.
    pub fn upload(&self, payload: &[u8], kind: MediaKind) -> Result<(), CoreError> {
        self.upload_with(payload, kind, &NullObserver, &CancelHandle::new())
    }

    /// Upload with progress events and a cancellation handle.
    pub fn upload_with<O: UploadObserver>(
        &self,
        payload: &[u8],
        kind: MediaKind,
        observer: &O,
        cancel: &CancelHandle,
    ) -> Result<(), CoreError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CoreError::SizeLimit {
                size: payload.len(),
                limit: MAX_PAYLOAD_LEN,
            });
        }
        observer.on_event(&UploadEvent::PhaseChanged {
            from: UploadPhase::Idle,
            to: UploadPhase::Authenticating,
        });
        self.authenticate()?;
        SessionStateMachine::new(
            self.transport.as_ref(),
            &self.bus,
            observer,
            cancel,
            payload,
            kind,
        )
        .run()
    }

    /// Auxiliary request/response client sharing this connection.
    pub fn client(&self) -> RcspClient<'_, T> {
        RcspClient::new(
            self.transport.as_ref(),
            &self.bus,
            &self.rcsp_seq,
            &self.qix_seq,
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}
