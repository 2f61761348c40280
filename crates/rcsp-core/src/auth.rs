//! The six-message mutual handshake.
//!
//! Runs once per connection, before any framed traffic. Both directions use
//! raw (unframed) 17-byte messages on the data channel:
//!
//! 1. Host   → `[0x00, rand_16]`
//! 2. Device → `[0x01, enc_16]` (not verified host-side)
//! 3. Host   → `[0x02, 'p','a','s','s']`
//! 4. Device → `[0x00, challenge_16]`
//! 5. Host   → `[0x01, encrypt(challenge_16, static_key)]`
//! 6. Device → `[0x02, 'p','a','s','s']`, anything else is fatal

use tracing::{debug, info};

use crate::bus::{Inbound, NotificationBus};
use crate::crypto;
use crate::error::{CoreError, WaitPoint};
use crate::protocol::constants::HANDSHAKE_TIMEOUT;
use crate::transport::{BadgeTransport, Endpoint};

/// Message tag bytes.
const TAG_RANDOM: u8 = 0x00;
const TAG_ENCRYPTED: u8 = 0x01;
const TAG_PASS: u8 = 0x02;

/// The success token, also sent by the host at step 3.
const PASS_MESSAGE: [u8; 5] = [TAG_PASS, b'p', b'a', b's', b's'];

/// Drives the handshake against one connection.
pub struct AuthEngine<'a, T: BadgeTransport> {
    transport: &'a T,
    bus: &'a NotificationBus,
}

impl<'a, T: BadgeTransport> AuthEngine<'a, T> {
    pub fn new(transport: &'a T, bus: &'a NotificationBus) -> Self {
        Self { transport, bus }
    }

    /// Run all six steps. Returns `AuthFailed` if the device withholds the
    /// success token, `Timeout` if any step stalls past its budget.
    pub fn run(&self) -> Result<(), CoreError> {
        debug!("Starting auth handshake");

        self.transport
            .write(Endpoint::DataWrite, &crypto::random_auth_message())?;
        self.wait_reply(|payload| payload.first() == Some(&TAG_ENCRYPTED))?;

        self.transport.write(Endpoint::DataWrite, &PASS_MESSAGE)?;
        let challenge_msg =
            self.wait_reply(|payload| payload.len() == 17 && payload[0] == TAG_RANDOM)?;
        let challenge: [u8; 16] = challenge_msg.payload[1..17]
            .try_into()
            .expect("17-byte message");

        self.transport
            .write(Endpoint::DataWrite, &crypto::challenge_response(&challenge))?;

        let verdict = self.wait_reply(|_| true)?;
        if verdict.payload != PASS_MESSAGE {
            return Err(CoreError::AuthFailed);
        }

        info!("Auth handshake complete");
        Ok(())
    }

    fn wait_reply(&self, pred: impl Fn(&[u8]) -> bool) -> Result<Inbound, CoreError> {
        self.bus
            .wait_raw(HANDSHAKE_TIMEOUT, WaitPoint::Handshake, |item| {
                item.endpoint == Endpoint::DataNotify && pred(&item.payload)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::Arc;

    /// Wire a mock device that follows the handshake script.
    fn scripted_device(mock: &MockTransport, pass: bool, challenge: [u8; 16]) {
        mock.add_responder(Box::new(move |endpoint, data: &[u8]| {
            if endpoint != Endpoint::DataWrite || data.is_empty() {
                return Vec::new();
            }
            match data[0] {
                TAG_RANDOM => {
                    let mut enc = vec![TAG_ENCRYPTED];
                    enc.extend_from_slice(&[0x5A; 16]);
                    vec![(Endpoint::DataNotify, enc)]
                }
                TAG_PASS => {
                    let mut msg = vec![TAG_RANDOM];
                    msg.extend_from_slice(&challenge);
                    vec![(Endpoint::DataNotify, msg)]
                }
                TAG_ENCRYPTED => {
                    let reply = if pass {
                        PASS_MESSAGE.to_vec()
                    } else {
                        vec![0x03, 0x00]
                    };
                    vec![(Endpoint::DataNotify, reply)]
                }
                _ => Vec::new(),
            }
        }));
    }

    fn wire(mock: &Arc<MockTransport>) -> NotificationBus {
        let bus = NotificationBus::new(Box::new(|_| {}));
        mock.subscribe(bus.sink()).unwrap();
        bus
    }

    #[test]
    fn test_handshake_success() {
        let mock = Arc::new(MockTransport::new());
        let challenge = [0x42u8; 16];
        scripted_device(&mock, true, challenge);
        let bus = wire(&mock);

        AuthEngine::new(mock.as_ref(), &bus).run().unwrap();

        let writes = mock.writes_on(Endpoint::DataWrite);
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0][0], TAG_RANDOM);
        assert_eq!(writes[0].len(), 17);
        assert_eq!(writes[1], PASS_MESSAGE);
        // Step 5 must carry the encrypted challenge.
        assert_eq!(writes[2][0], TAG_ENCRYPTED);
        assert_eq!(
            writes[2][1..],
            crypto::encrypt(&challenge, &crypto::STATIC_KEY)
        );
    }

    #[test]
    fn test_handshake_rejection_is_fatal() {
        let mock = Arc::new(MockTransport::new());
        scripted_device(&mock, false, [0x42; 16]);
        let bus = wire(&mock);

        let err = AuthEngine::new(mock.as_ref(), &bus).run().unwrap_err();
        assert!(matches!(err, CoreError::AuthFailed));
    }

    #[test]
    fn test_wrong_tag_is_not_taken_for_step_two() {
        let mock = Arc::new(MockTransport::new());
        let bus = wire(&mock);

        mock.notify(Endpoint::DataNotify, &[0x7F; 17]);
        let got = bus.wait_raw(
            std::time::Duration::from_millis(20),
            WaitPoint::Handshake,
            |item| {
                item.endpoint == Endpoint::DataNotify
                    && item.payload.first() == Some(&TAG_ENCRYPTED)
            },
        );
        assert!(matches!(
            got,
            Err(CoreError::Timeout {
                waiting: WaitPoint::Handshake
            })
        ));
    }
}
