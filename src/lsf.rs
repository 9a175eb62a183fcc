/*! Link setup frame.

Thirty bytes describing a transmission: destination and source
addresses (six bytes each), a 16-bit type field, 14 bytes of metadata
and a trailing CRC. All multi-byte fields are big-endian on the wire;
accessors do the swapping so nothing else needs to care.

The LSF is also chopped into six 5-byte segments, each carried
Golay-protected inside a stream frame as the link information channel
so that late joiners can recover the session metadata.
*/
use crate::callsign;
use crate::crc::crc16;
use crate::golay;
use crate::Result;

/// Size of a serialized link setup frame.
pub const LSF_SIZE: usize = 30;

/// Number of link information channel segments per LSF.
pub const LICH_SEGMENTS: usize = 6;

/// Size of one Golay-encoded LICH segment.
pub const LICH_SIZE: usize = 12;

const DST_RANGE: std::ops::Range<usize> = 0..6;
const SRC_RANGE: std::ops::Range<usize> = 6..12;
const TYPE_RANGE: std::ops::Range<usize> = 12..14;
const META_RANGE: std::ops::Range<usize> = 14..28;
const CRC_RANGE: std::ops::Range<usize> = 28..30;

/// The 16-bit LSF type field.
///
/// Bit 0 selects stream (1) or packet (0) mode, bits 1..2 the data
/// type, bits 3..6 the encryption type and subtype, bits 7..10 the
/// channel access number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamType(u16);

impl StreamType {
    /// Data type value for voice payloads.
    pub const DATA_VOICE: u8 = 2;

    /// An all-zero type field.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// A voice stream with the given channel access number.
    #[must_use]
    pub fn voice_stream(can: u8) -> Self {
        let mut t = Self::new();
        t.set_stream(true);
        t.set_data_type(Self::DATA_VOICE);
        t.set_can(can);
        t
    }

    /// Raw field value, host byte order.
    #[must_use]
    pub fn raw(&self) -> u16 {
        self.0
    }

    /// Rebuild from a raw field value.
    #[must_use]
    pub fn from_raw(value: u16) -> Self {
        Self(value)
    }

    /// True for stream mode.
    #[must_use]
    pub fn stream(&self) -> bool {
        self.0 & 1 != 0
    }

    /// Select stream or packet mode.
    pub fn set_stream(&mut self, on: bool) {
        self.0 = (self.0 & !1) | u16::from(on);
    }

    /// Two-bit data type: 1 data, 2 voice, 3 both.
    #[must_use]
    pub fn data_type(&self) -> u8 {
        ((self.0 >> 1) & 0x3) as u8
    }

    /// Set the data type.
    pub fn set_data_type(&mut self, dt: u8) {
        self.0 = (self.0 & !(0x3 << 1)) | (u16::from(dt & 0x3) << 1);
    }

    /// Two-bit encryption type.
    #[must_use]
    pub fn encryption_type(&self) -> u8 {
        ((self.0 >> 3) & 0x3) as u8
    }

    /// Set the encryption type.
    pub fn set_encryption_type(&mut self, et: u8) {
        self.0 = (self.0 & !(0x3 << 3)) | (u16::from(et & 0x3) << 3);
    }

    /// Four-bit channel access number.
    #[must_use]
    pub fn can(&self) -> u8 {
        ((self.0 >> 7) & 0xF) as u8
    }

    /// Set the channel access number.
    pub fn set_can(&mut self, can: u8) {
        self.0 = (self.0 & !(0xF << 7)) | (u16::from(can & 0xF) << 7);
    }
}

/// A link setup frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSetupFrame {
    data: [u8; LSF_SIZE],
}

impl Default for LinkSetupFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSetupFrame {
    /// A cleared LSF: broadcast destination, everything else zero.
    #[must_use]
    pub fn new() -> Self {
        let mut lsf = Self {
            data: [0; LSF_SIZE],
        };
        lsf.clear();
        lsf
    }

    /// Reset to the cleared state.
    pub fn clear(&mut self) {
        self.data = [0; LSF_SIZE];
        self.data[DST_RANGE].copy_from_slice(&callsign::BROADCAST);
    }

    /// Set the source callsign.
    pub fn set_source(&mut self, cs: &str) -> Result<()> {
        let enc = callsign::encode(cs)?;
        self.data[SRC_RANGE].copy_from_slice(&enc);
        Ok(())
    }

    /// The source callsign, if the field decodes.
    #[must_use]
    pub fn source(&self) -> Option<String> {
        let bytes: &[u8; 6] = (&self.data[SRC_RANGE]).try_into().ok()?;
        callsign::decode(bytes)
    }

    /// Set the destination callsign. An empty string selects
    /// broadcast.
    pub fn set_destination(&mut self, cs: &str) -> Result<()> {
        if cs.is_empty() {
            self.data[DST_RANGE].copy_from_slice(&callsign::BROADCAST);
            return Ok(());
        }
        let enc = callsign::encode(cs)?;
        self.data[DST_RANGE].copy_from_slice(&enc);
        Ok(())
    }

    /// The destination callsign, if the field decodes.
    #[must_use]
    pub fn destination(&self) -> Option<String> {
        let bytes: &[u8; 6] = (&self.data[DST_RANGE]).try_into().ok()?;
        callsign::decode(bytes)
    }

    /// True if the destination is the broadcast address.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.data[DST_RANGE] == callsign::BROADCAST
    }

    /// The type field.
    #[must_use]
    pub fn stream_type(&self) -> StreamType {
        StreamType::from_raw(u16::from_be_bytes([self.data[12], self.data[13]]))
    }

    /// Set the type field.
    pub fn set_stream_type(&mut self, st: StreamType) {
        self.data[TYPE_RANGE].copy_from_slice(&st.raw().to_be_bytes());
    }

    /// Metadata bytes.
    #[must_use]
    pub fn meta(&self) -> &[u8] {
        &self.data[META_RANGE]
    }

    /// Mutable metadata bytes.
    pub fn meta_mut(&mut self) -> &mut [u8] {
        &mut self.data[META_RANGE]
    }

    /// Recompute and store the CRC over the first 28 bytes.
    pub fn update_crc(&mut self) {
        let crc = crc16(&self.data[..28]);
        self.data[CRC_RANGE].copy_from_slice(&crc.to_be_bytes());
    }

    /// True if the stored CRC matches the content.
    #[must_use]
    pub fn valid(&self) -> bool {
        let stored = u16::from_be_bytes([self.data[28], self.data[29]]);
        crc16(&self.data[..28]) == stored
    }

    /// Serialized frame content.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; LSF_SIZE] {
        &self.data
    }

    /// Rebuild an LSF from its serialized content. The CRC is taken
    /// as-is; check with [`LinkSetupFrame::valid`].
    #[must_use]
    pub fn from_bytes(data: [u8; LSF_SIZE]) -> Self {
        Self { data }
    }

    /// Generate one Golay-encoded link information channel segment.
    ///
    /// Segment `num` (0..6) carries bytes `5·num .. 5·num+5` of this
    /// frame plus the segment number, split into four 12-bit blocks
    /// and Golay(24,12) encoded, big-endian.
    #[must_use]
    pub fn lich_segment(&self, num: u8) -> [u8; LICH_SIZE] {
        let num = num % LICH_SEGMENTS as u8;
        let chunk = &self.data[5 * num as usize..5 * num as usize + 5];

        let blocks: [u16; 4] = [
            (u16::from(chunk[0]) << 4) | (u16::from(chunk[1]) >> 4),
            ((u16::from(chunk[1]) & 0x0F) << 8) | u16::from(chunk[2]),
            (u16::from(chunk[3]) << 4) | (u16::from(chunk[4]) >> 4),
            ((u16::from(chunk[4]) & 0x0F) << 8) | (u16::from(num) << 5),
        ];

        let mut out = [0u8; LICH_SIZE];
        for (i, block) in blocks.iter().enumerate() {
            let coded = golay::encode(*block);
            out[3 * i] = (coded >> 16) as u8;
            out[3 * i + 1] = (coded >> 8) as u8;
            out[3 * i + 2] = coded as u8;
        }
        out
    }

    /// Place a received 5-byte LICH slice at segment position `num`.
    pub(crate) fn set_lich_chunk(&mut self, num: u8, chunk: &[u8; 5]) {
        let start = 5 * (num as usize % LICH_SEGMENTS);
        self.data[start..start + 5].copy_from_slice(chunk);
    }
}

/// Decode one LICH segment into its 5-byte LSF slice and segment
/// number. Returns `None` when any of the four Golay blocks is
/// uncorrectable.
#[must_use]
pub fn decode_lich(lich: &[u8; LICH_SIZE]) -> Option<([u8; 5], u8)> {
    let mut blocks = [0u16; 4];
    for (i, block) in blocks.iter_mut().enumerate() {
        let coded = (u32::from(lich[3 * i]) << 16)
            | (u32::from(lich[3 * i + 1]) << 8)
            | u32::from(lich[3 * i + 2]);
        *block = golay::decode(coded)?;
    }

    let chunk = [
        (blocks[0] >> 4) as u8,
        (((blocks[0] & 0x0F) << 4) | (blocks[1] >> 8)) as u8,
        (blocks[1] & 0xFF) as u8,
        (blocks[2] >> 4) as u8,
        (((blocks[2] & 0x0F) << 4) | (blocks[3] >> 8)) as u8,
    ];
    let num = ((blocks[3] >> 5) & 0x7) as u8;
    Some((chunk, num))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lsf() -> LinkSetupFrame {
        let mut lsf = LinkSetupFrame::new();
        lsf.set_source("AB1CDE").unwrap();
        lsf.set_destination("SP5WWP").unwrap();
        lsf.set_stream_type(StreamType::voice_stream(7));
        lsf.update_crc();
        lsf
    }

    #[test]
    fn crc_validates_after_update() {
        let mut lsf = sample_lsf();
        assert!(lsf.valid());
        lsf.meta_mut()[0] ^= 1;
        assert!(!lsf.valid());
        lsf.update_crc();
        assert!(lsf.valid());
    }

    #[test]
    fn cleared_lsf_is_broadcast() {
        let lsf = LinkSetupFrame::new();
        assert!(lsf.is_broadcast());
        assert_eq!(lsf.destination().unwrap(), callsign::BROADCAST_TOKEN);
    }

    #[test]
    fn empty_destination_selects_broadcast() {
        let mut lsf = sample_lsf();
        lsf.set_destination("").unwrap();
        assert!(lsf.is_broadcast());
    }

    #[test]
    fn type_field_is_big_endian() {
        let mut lsf = LinkSetupFrame::new();
        let mut st = StreamType::new();
        st.set_stream(true);
        st.set_data_type(StreamType::DATA_VOICE);
        lsf.set_stream_type(st);
        // stream|voice = 0b101 lands in the low byte, at offset 13.
        assert_eq!(lsf.as_bytes()[12], 0x00);
        assert_eq!(lsf.as_bytes()[13], 0x05);
        assert_eq!(lsf.stream_type(), st);
    }

    #[test]
    fn type_field_accessors() {
        let st = StreamType::voice_stream(9);
        assert!(st.stream());
        assert_eq!(st.data_type(), 2);
        assert_eq!(st.can(), 9);
        assert_eq!(st.encryption_type(), 0);
    }

    #[test]
    fn lich_segments_cover_the_frame() {
        let lsf = sample_lsf();
        let mut rebuilt = LinkSetupFrame::new();
        for num in 0..LICH_SEGMENTS as u8 {
            let segment = lsf.lich_segment(num);
            let (chunk, got_num) = decode_lich(&segment).unwrap();
            assert_eq!(got_num, num);
            rebuilt.set_lich_chunk(got_num, &chunk);
        }
        assert_eq!(rebuilt.as_bytes(), lsf.as_bytes());
        assert!(rebuilt.valid());
    }

    #[test]
    fn lich_decode_survives_bit_errors() {
        let lsf = sample_lsf();
        let mut segment = lsf.lich_segment(2);
        segment[0] ^= 0x82; // two errors in the first block
        segment[4] ^= 0x01; // one in the second
        let (chunk, num) = decode_lich(&segment).unwrap();
        assert_eq!(num, 2);
        assert_eq!(&chunk[..], &lsf.as_bytes()[10..15]);
    }

    #[test]
    fn lich_uncorrectable_block_rejected() {
        let lsf = sample_lsf();
        let mut segment = lsf.lich_segment(0);
        segment[0] ^= 0xF0; // four errors in one block
        assert_eq!(decode_lich(&segment), None);
    }
}
