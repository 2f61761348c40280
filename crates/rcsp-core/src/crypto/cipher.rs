//! The auth block cipher.
//!
//! A custom 16-byte block cipher (not AES) recovered from the vendor's auth
//! library. Two primitives:
//!
//! - a key schedule that expands a 16-byte seed into 17 round blocks
//!   (272 bytes) by rotate-left-3 mixing over a 17-byte circular buffer and
//!   additions from [`SCHEDULE_TABLE`];
//! - a mixing network of eight rounds, each a pair-butterfly over the state
//!   followed by masked XOR/ADD key injection and a split S-box
//!   substitution, closed by a final key injection from the last schedule
//!   block.
//!
//! The full encryption runs the network twice: once keyed by the input
//! block itself, then (after folding in the 8-byte magic) once keyed by an
//! obfuscated copy of the caller's key. Everything is byte arithmetic, so
//! the output is independent of host endianness.

use super::tables::{INV_SBOX, SBOX, SCHEDULE_TABLE};

/// Bit mask selecting XOR vs ADD per byte position during key injection.
const MIX_MASK: u16 = 0x9999;

/// Per-position obfuscation applied to the key before the second pass.
/// `true` entries XOR the constant, `false` entries subtract it.
const KEY_OBFUSCATION: [(bool, u8); 16] = [
    (false, 0x17),
    (true, 0xE5),
    (false, 0x21),
    (true, 0xC1),
    (false, 0x4D),
    (true, 0xA7),
    (false, 0x6B),
    (true, 0x83),
    (true, 0xE9),
    (false, 0x1B),
    (true, 0xDF),
    (false, 0x3F),
    (true, 0xB3),
    (false, 0x59),
    (true, 0x95),
    (false, 0x7D),
];

/// Expand a 16-byte seed into the 272-byte round-key schedule.
///
/// Block 0 is the seed itself; blocks 1..=16 come out of 16 rounds of
/// rotate-left-3 over a 17-byte circular buffer (seed plus XOR checksum),
/// each round reading 16 bytes starting at `round + 1` with wraparound and
/// adding table entries taken backwards from `SCHEDULE_TABLE[15 + round*16]`.
pub(crate) fn key_schedule(seed: &[u8; 16]) -> [u8; 272] {
    let mut out = [0u8; 272];
    out[..16].copy_from_slice(seed);

    let mut buf = [0u8; 17];
    buf[..16].copy_from_slice(seed);
    buf[16] = seed.iter().fold(0, |acc, &b| acc ^ b);

    for round in 0..16 {
        for b in buf.iter_mut() {
            *b = b.rotate_left(3);
        }
        let mut pos = round + 1;
        for j in 0..16 {
            let table = SCHEDULE_TABLE[0xF + round * 16 - j];
            out[16 + round * 16 + j] = table.wrapping_add(buf[pos]);
            pos += 1;
            if pos > 16 {
                pos = 0;
            }
        }
    }
    out
}

/// One pair-butterfly pass over the state.
///
/// Four stages; each step maps a pair `(a, b)` to `(2a + b, a + b)` in u32
/// arithmetic, truncating to bytes only when storing back. The pairings
/// follow the vendor library instruction-for-instruction, so the shuffle
/// below is the specification, not an optimization target.
fn butterfly(s: &mut [u8; 16]) {
    let [mut w16, mut w17, mut w3, mut w4] =
        [s[0] as u32, s[1] as u32, s[2] as u32, s[3] as u32];
    let [mut w5, mut w6, mut w7, mut w19] =
        [s[4] as u32, s[5] as u32, s[6] as u32, s[7] as u32];
    let [mut w20, mut w21, mut w22, mut w23] =
        [s[8] as u32, s[9] as u32, s[10] as u32, s[11] as u32];
    let [mut w24, mut w25, mut w26, mut w27] =
        [s[12] as u32, s[13] as u32, s[14] as u32, s[15] as u32];
    let mut w28;

    // Stage 1: adjacent pairs.
    w28 = w17.wrapping_add(w16.wrapping_mul(2));
    w16 = w17.wrapping_add(w16);
    let t = w4.wrapping_add(w3.wrapping_mul(2));
    w3 = w4.wrapping_add(w3);
    w4 = w6.wrapping_add(w5.wrapping_mul(2));
    w5 = w6.wrapping_add(w5);
    w6 = w19.wrapping_add(w7.wrapping_mul(2));
    w7 = w19.wrapping_add(w7);
    let u = w21.wrapping_add(w20.wrapping_mul(2));
    w20 = w21.wrapping_add(w20);
    w21 = w23.wrapping_add(w22.wrapping_mul(2));
    w22 = w23.wrapping_add(w22);
    w23 = w25.wrapping_add(w24.wrapping_mul(2));
    w24 = w25.wrapping_add(w24);
    w25 = w27.wrapping_add(w26.wrapping_mul(2));
    w26 = w27.wrapping_add(w26);
    w17 = t;
    w19 = u;

    // Stage 2: cross-pair.
    w27 = w22.wrapping_add(w19.wrapping_mul(2));
    w19 = w22.wrapping_add(w19);
    w22 = w26.wrapping_add(w23.wrapping_mul(2));
    w23 = w26.wrapping_add(w23);
    w26 = w16.wrapping_add(w17.wrapping_mul(2));
    w16 = w17.wrapping_add(w16);
    w17 = w5.wrapping_add(w6.wrapping_mul(2));
    w5 = w6.wrapping_add(w5);
    w6 = w20.wrapping_add(w21.wrapping_mul(2));
    w20 = w21.wrapping_add(w20);
    w21 = w24.wrapping_add(w25.wrapping_mul(2));
    w24 = w25.wrapping_add(w24);
    w25 = w7.wrapping_add(w28.wrapping_mul(2));
    w7 = w7.wrapping_add(w28);
    w28 = w3.wrapping_add(w4.wrapping_mul(2));
    w3 = w4.wrapping_add(w3);

    // Stage 3.
    w4 = w24.wrapping_add(w6.wrapping_mul(2));
    w6 = w24.wrapping_add(w6);
    w24 = w3.wrapping_add(w25.wrapping_mul(2));
    w3 = w25.wrapping_add(w3);
    w25 = w19.wrapping_add(w22.wrapping_mul(2));
    w19 = w22.wrapping_add(w19);
    let v = w16.wrapping_add(w17.wrapping_mul(2));
    w16 = w17.wrapping_add(w16);
    let x = w20.wrapping_add(w21.wrapping_mul(2));
    w20 = w21.wrapping_add(w20);
    w21 = w7.wrapping_add(w28.wrapping_mul(2));
    w7 = w7.wrapping_add(w28);
    w28 = w5.wrapping_add(w27.wrapping_mul(2));
    w5 = w27.wrapping_add(w5);
    w27 = w23.wrapping_add(w26.wrapping_mul(2));
    w23 = w23.wrapping_add(w26);
    w22 = v;
    w17 = x;

    // Stage 4.
    w26 = w7.wrapping_add(w17.wrapping_mul(2));
    w17 = w17.wrapping_add(w7);
    w7 = w23.wrapping_add(w28.wrapping_mul(2));
    w23 = w23.wrapping_add(w28);
    w28 = w6.wrapping_add(w24.wrapping_mul(2));
    w6 = w6.wrapping_add(w24);
    w24 = w19.wrapping_add(w22.wrapping_mul(2));
    w19 = w19.wrapping_add(w22);
    w22 = w20.wrapping_add(w21.wrapping_mul(2));
    w20 = w20.wrapping_add(w21);
    w21 = w5.wrapping_add(w27.wrapping_mul(2));
    w5 = w27.wrapping_add(w5);
    w27 = w16.wrapping_add(w4.wrapping_mul(2));
    w16 = w4.wrapping_add(w16);
    w4 = w3.wrapping_add(w25.wrapping_mul(2));
    w3 = w25.wrapping_add(w3);

    *s = [
        w26 as u8, w17 as u8, w7 as u8, w23 as u8, w28 as u8, w6 as u8, w24 as u8, w19 as u8,
        w22 as u8, w20 as u8, w21 as u8, w5 as u8, w27 as u8, w16 as u8, w4 as u8, w3 as u8,
    ];
}

/// Masked key injection. Positions whose `MIX_MASK` bit is set XOR the key
/// byte when `xor_on_set` holds and add it otherwise; clear positions do the
/// opposite.
fn inject(state: &mut [u8; 16], key: &[u8], xor_on_set: bool) {
    for (i, b) in state.iter_mut().enumerate() {
        let set = (1u16 << i) & MIX_MASK != 0;
        if set == xor_on_set {
            *b ^= key[i];
        } else {
            *b = key[i].wrapping_add(*b);
        }
    }
}

/// Split S-box substitution: even-parity positions through the forward box,
/// the rest through the inverse box.
fn substitute(state: &mut [u8; 16]) {
    for &p in &[0usize, 3, 4, 7, 8, 11, 12, 15] {
        state[p] = SBOX[state[p] as usize];
    }
    for &p in &[1usize, 2, 5, 6, 9, 10, 13, 14] {
        state[p] = INV_SBOX[state[p] as usize];
    }
}

/// Run the eight-round mixing network over `state` with a 272-byte schedule.
///
/// `tweak` folds the pre-round state back in before round 2's key injection;
/// the vendor library enables it only on the second pass.
pub(crate) fn mix_rounds(state: &mut [u8; 16], schedule: &[u8; 272], tweak: bool) {
    let initial = *state;

    inject(state, &schedule[0..16], true);
    substitute(state);
    inject(state, &schedule[16..32], false);

    for round in 1..=8usize {
        butterfly(state);
        if round == 8 {
            inject(state, &schedule[0x100..0x110], true);
            break;
        }
        if tweak && round == 2 {
            inject(state, &initial, true);
        }
        let off = round * 0x20;
        inject(state, &schedule[off..off + 16], true);
        substitute(state);
        inject(state, &schedule[off + 16..off + 32], false);
    }
}

/// Encrypt one 16-byte block under `key`, folding in the `magic` constant
/// between the two passes.
pub(crate) fn encrypt_block(block: &[u8; 16], key: &[u8; 16], magic: &[u8; 8]) -> [u8; 16] {
    let mut out = *block;

    let first = key_schedule(block);
    mix_rounds(&mut out, &first, false);

    for (i, b) in out.iter_mut().enumerate() {
        *b = magic[i % 8].wrapping_add(*b ^ block[i]);
    }

    let mut obfuscated = [0u8; 16];
    for (i, &(is_xor, c)) in KEY_OBFUSCATION.iter().enumerate() {
        obfuscated[i] = if is_xor {
            key[i] ^ c
        } else {
            key[i].wrapping_sub(c)
        };
    }
    let second = key_schedule(&obfuscated);
    mix_rounds(&mut out, &second, true);

    out
}
