//! Bit padding between the compact on-disk form and the expanded wire form.
//!
//! Payloads are stored in unpadded groups of 127 bytes; consumers expect
//! padded groups of 128 bytes in which every 32-byte lane carries 254 data
//! bits followed by two zero bits. [`pad`] expands one group, [`unpad`] is
//! its inverse.

/// Size of one raw group in the unpadded (source) domain.
pub const UNPADDED_GROUP: usize = 127;

/// Size of one expanded group in the padded (output) domain.
pub const PADDED_GROUP: usize = 128;

/// Expands one 127-byte raw group into its 128-byte padded form.
///
/// Each of the four 32-byte output lanes holds 254 input bits; the two high
/// bits of the last byte of every lane are zero.
pub fn pad(input: &[u8; UNPADDED_GROUP], out: &mut [u8; PADDED_GROUP]) {
    out[..31].copy_from_slice(&input[..31]);

    let mut t = input[31] >> 6;
    out[31] = input[31] & 0x3f;
    let mut v = 0u8;

    for i in 32..64 {
        v = input[i];
        out[i] = (v << 2) | t;
        t = v >> 6;
    }

    t = v >> 4;
    out[63] &= 0x3f;

    for i in 64..96 {
        v = input[i];
        out[i] = (v << 4) | t;
        t = v >> 4;
    }

    t = v >> 2;
    out[95] &= 0x3f;

    for i in 96..127 {
        v = input[i];
        out[i] = (v << 6) | t;
        t = v >> 2;
    }

    out[127] = t & 0x3f;
}

/// Collapses one 128-byte padded group back into its 127-byte raw form.
pub fn unpad(input: &[u8; PADDED_GROUP], out: &mut [u8; UNPADDED_GROUP]) {
    out[..31].copy_from_slice(&input[..31]);
    out[31] = (input[31] & 0x3f) | ((input[32] & 0x03) << 6);

    for i in 32..63 {
        out[i] = (input[i] >> 2) | ((input[i + 1] & 0x03) << 6);
    }
    out[63] = ((input[63] >> 2) & 0x0f) | ((input[64] & 0x0f) << 4);

    for i in 64..95 {
        out[i] = (input[i] >> 4) | ((input[i + 1] & 0x0f) << 4);
    }
    out[95] = ((input[95] >> 4) & 0x03) | ((input[96] & 0x3f) << 2);

    for i in 96..127 {
        out[i] = (input[i] >> 6) | ((input[i + 1] & 0x3f) << 2);
    }
}
