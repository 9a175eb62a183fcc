/*! Frame decorrelation.

The interleaved frame payload is XORed with a fixed pseudo-random
sequence to break up long runs of identical symbols on the air. XOR
is its own inverse, so the receive side runs the exact same
operation.
*/

/// The 46-byte decorrelation sequence from the protocol
/// specification.
pub const DECORRELATION_SEQUENCE: [u8; 46] = [
    0xD6, 0xB5, 0xE2, 0x30, 0x82, 0xFF, 0x84, 0x62, 0xBA, 0x4E, 0x96, 0x90, 0xD8, 0x98, 0xDD,
    0x5D, 0x0C, 0xC8, 0x52, 0x43, 0x91, 0x1D, 0xF8, 0x6E, 0x68, 0x2F, 0x35, 0xDA, 0x14, 0xEA,
    0xCD, 0x76, 0x19, 0x8D, 0xD5, 0x80, 0xD1, 0x33, 0x87, 0x13, 0x57, 0x18, 0x2D, 0x29, 0x78,
    0xC3,
];

/// Decorrelate (or re-correlate) a frame payload in place.
pub fn decorrelate(data: &mut [u8]) {
    for (byte, key) in data.iter_mut().zip(DECORRELATION_SEQUENCE.iter().cycle()) {
        *byte ^= key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn is_an_involution() {
        let mut rng = rand::rng();
        let mut data = [0u8; 46];
        rng.fill_bytes(&mut data);
        let original = data;
        decorrelate(&mut data);
        assert_ne!(data, original);
        decorrelate(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn zeroes_become_the_sequence() {
        let mut data = [0u8; 46];
        decorrelate(&mut data);
        assert_eq!(data, DECORRELATION_SEQUENCE);
    }
}
