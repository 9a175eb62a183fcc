/*! Base-40 callsign encoding.

An M17 address packs up to nine characters from the alphabet
` 0-9A-Z-/.` into 48 bits. The all-ones value is the broadcast
address and decodes to the reserved token `"ALL"`.
*/
use crate::{Error, Result};

const CHARSET: &[u8; 40] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

/// Maximum number of characters in a callsign.
pub const MAX_LEN: usize = 9;

/// The broadcast address, all ones.
pub const BROADCAST: [u8; 6] = [0xFF; 6];

/// Reserved token the broadcast address decodes to.
pub const BROADCAST_TOKEN: &str = "ALL";

fn char_index(c: u8) -> Option<u64> {
    CHARSET.iter().position(|&x| x == c).map(|i| i as u64)
}

/// Encode a callsign into its 48-bit big-endian address form.
///
/// Fails on callsigns longer than nine characters or containing a
/// character outside the base-40 alphabet.
pub fn encode(callsign: &str) -> Result<[u8; 6]> {
    if callsign.len() > MAX_LEN {
        return Err(Error::InvalidArgument);
    }

    let mut value: u64 = 0;
    for c in callsign.bytes().rev() {
        let idx = char_index(c.to_ascii_uppercase()).ok_or(Error::InvalidArgument)?;
        value = value * 40 + idx;
    }

    let bytes = value.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&bytes[2..8]);
    Ok(out)
}

/// Decode a 48-bit address back into a callsign.
///
/// Returns [`BROADCAST_TOKEN`] for the broadcast address and `None`
/// for the remaining reserved values above `40^9`.
pub fn decode(encoded: &[u8; 6]) -> Option<String> {
    if *encoded == BROADCAST {
        return Some(BROADCAST_TOKEN.to_owned());
    }

    let mut bytes = [0u8; 8];
    bytes[2..8].copy_from_slice(encoded);
    let mut value = u64::from_be_bytes(bytes);

    if value >= 40u64.pow(MAX_LEN as u32) {
        return None;
    }

    let mut out = String::new();
    while value > 0 {
        out.push(CHARSET[(value % 40) as usize] as char);
        value /= 40;
    }
    Some(out)
}
