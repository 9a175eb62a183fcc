/*! Bit interleaver for the 368-bit frame payload.

Quadratic permutation polynomial `π(x) = (45x + 92x²) mod 368`,
applied bitwise. With these coefficients the permutation is an
involution, so interleaving and deinterleaving are the same move.
*/
use crate::puncture::{get_bit, put_bit};

const SIZE_BITS: usize = 368;

fn permute(data: &mut [u8; 46]) {
    let mut out = [0u8; 46];
    for i in 0..SIZE_BITS {
        let j = (45 * i + 92 * i * i) % SIZE_BITS;
        put_bit(&mut out, j, get_bit(data, i));
    }
    *data = out;
}

/// Interleave a 46-byte frame payload in place.
pub fn interleave(data: &mut [u8; 46]) {
    permute(data);
}

/// Reverse the interleaving of a 46-byte frame payload in place.
pub fn deinterleave(data: &mut [u8; 46]) {
    permute(data);
}
