//! Mutual-authentication crypto.
//!
//! The badge proves possession of a shared symmetric key before it accepts
//! any framed traffic. Both sides run the same custom block cipher (see
//! [`cipher`]); the host's contribution to the handshake is built from the
//! three functions exported here.
//!
//! All key material is embedded: the device fleet shares one static key, so
//! there is nothing to provision.

mod cipher;
mod tables;

/// The fleet-wide 16-byte authentication key.
pub const STATIC_KEY: [u8; 16] = [
    0x6B, 0xE9, 0xB2, 0xC0, 0x83, 0xD9, 0x4A, 0x1E, 0x5A, 0xF8, 0x9C, 0x4E, 0x7B, 0x6D, 0x3F, 0x20,
];

/// 8-byte constant folded in between the two cipher passes.
pub const SCHEDULE_MAGIC: [u8; 8] = [0xB3, 0xA1, 0xD7, 0xE9, 0x4C, 0x2F, 0x85, 0x60];

/// Encrypt one 16-byte block under `key`.
///
/// Deterministic and independent of host endianness.
pub fn encrypt(block: &[u8; 16], key: &[u8; 16]) -> [u8; 16] {
    cipher::encrypt_block(block, key, &SCHEDULE_MAGIC)
}

/// Build the handshake opener: tag byte `0x00` plus 16 bytes from the OS
/// CSPRNG.
pub fn random_auth_message() -> [u8; 17] {
    use rand::Rng;
    let mut msg = [0u8; 17];
    rand::rngs::OsRng.fill(&mut msg[1..]);
    msg[0] = 0x00;
    msg
}

/// Answer a device challenge: tag byte `0x01` plus the challenge encrypted
/// under the static key.
pub fn challenge_response(device_challenge: &[u8; 16]) -> [u8; 17] {
    let mut msg = [0u8; 17];
    msg[0] = 0x01;
    msg[1..].copy_from_slice(&encrypt(device_challenge, &STATIC_KEY));
    msg
}
