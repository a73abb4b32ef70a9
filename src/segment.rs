// The fixed 1016-byte bTCP segment: header, composite checksum, padded
// payload. See the data model section of the specification for the
// exact byte layout.

use crate::error::Error;

// Meaningful payload bytes allowed in a single segment.
pub const MAX_PAYLOAD: usize = 1000;
// Header size on the wire, before the composite checksum.
pub const HEADER_LEN: usize = 12;
// Size of the composite checksum field.
pub const CHECKSUM_LEN: usize = 4;
// Total on-the-wire segment size.
pub const SEGMENT_LEN: usize = HEADER_LEN + CHECKSUM_LEN + MAX_PAYLOAD;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const SYN = 0b001;
        const ACK = 0b010;
        const FIN = 0b100;
    }
}

// The 12-byte header, before the composite checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub stream_id: u32,
    pub syn_number: u16,
    pub ack_number: u16,
    pub flags: Flags,
    pub window_size: u8,
    pub data_length: u16,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.stream_id.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.syn_number.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.ack_number.to_be_bytes());
        bytes[8] = self.flags.bits();
        bytes[9] = self.window_size;
        bytes[10..12].copy_from_slice(&self.data_length.to_be_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Header {
        Header {
            stream_id: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            syn_number: u16::from_be_bytes(bytes[4..6].try_into().unwrap()),
            ack_number: u16::from_be_bytes(bytes[6..8].try_into().unwrap()),
            flags: Flags::from_bits_truncate(bytes[8]),
            window_size: bytes[9],
            data_length: u16::from_be_bytes(bytes[10..12].try_into().unwrap()),
        }
    }
}

// A decoded bTCP segment: header plus the meaningful payload bytes
// (never the zero padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    // Builds a segment, rejecting payloads that would not fit in a
    // single segment.
    pub fn new(
        stream_id: u32,
        syn_number: u16,
        ack_number: u16,
        flags: Flags,
        window_size: u8,
        payload: Vec<u8>,
    ) -> Result<Segment, Error> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        Ok(Segment {
            header: Header {
                stream_id,
                syn_number,
                ack_number,
                flags,
                window_size,
                data_length: payload.len() as u16,
            },
            payload,
        })
    }

    pub fn is_syn(&self) -> bool {
        self.header.flags.contains(Flags::SYN)
    }

    pub fn is_ack(&self) -> bool {
        self.header.flags.contains(Flags::ACK)
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags.contains(Flags::FIN)
    }

    // A data segment has all flag bits clear.
    pub fn is_data(&self) -> bool {
        self.header.flags.is_empty()
    }

    // Serializes the segment to its fixed 1016-byte wire form:
    // `header (12) ∥ composite checksum (4) ∥ payload padded to 1000`.
    pub fn encode(&self) -> [u8; SEGMENT_LEN] {
        let header_bytes = self.header.to_bytes();

        let mut out = [0u8; SEGMENT_LEN];
        out[0..HEADER_LEN].copy_from_slice(&header_bytes);

        let payload_start = HEADER_LEN + CHECKSUM_LEN;
        out[payload_start..payload_start + self.payload.len()].copy_from_slice(&self.payload);

        let checksum = composite_checksum(&header_bytes, &self.payload);
        out[HEADER_LEN..payload_start].copy_from_slice(&checksum.to_be_bytes());

        out
    }

    // Parses a 1016-byte wire segment, validating the composite CRC-32
    // over `header ∥ meaningful payload`. A mismatch (whether from a
    // flipped header bit, a flipped payload bit, or a corrupted
    // `data_length` field pointing at garbage) is reported uniformly as
    // [`Error::ChecksumMismatch`].
    pub fn decode(bytes: &[u8; SEGMENT_LEN]) -> Result<Segment, Error> {
        let header_bytes: [u8; HEADER_LEN] = bytes[0..HEADER_LEN].try_into().unwrap();
        let header = Header::from_bytes(&header_bytes);

        let checksum_start = HEADER_LEN;
        let payload_start = HEADER_LEN + CHECKSUM_LEN;
        let claimed_checksum = u32::from_be_bytes(
            bytes[checksum_start..payload_start].try_into().unwrap(),
        );

        let data_length = header.data_length as usize;
        if data_length > MAX_PAYLOAD || payload_start + data_length > SEGMENT_LEN {
            return Err(Error::ChecksumMismatch);
        }
        let payload = &bytes[payload_start..payload_start + data_length];

        if composite_checksum(&header_bytes, payload) != claimed_checksum {
            return Err(Error::ChecksumMismatch);
        }

        Ok(Segment {
            header,
            payload: payload.to_vec(),
        })
    }
}

// CRC-32 (ISO 3309 / zlib polynomial) over `header_bytes ∥ meaningful
// payload`, the "composite checksum" of the wire format.
fn composite_checksum(header_bytes: &[u8; HEADER_LEN], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_bytes);
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: u32, syn: u16, ack: u16, flags: u8, window: u8, len: u16) -> Header {
        Header {
            stream_id: id,
            syn_number: syn,
            ack_number: ack,
            flags: Flags::from_bits_truncate(flags),
            window_size: window,
            data_length: len,
        }
    }

    #[test]
    fn header_serialization_is_big_endian() {
        let h = header(1, 2, 3, 4, 5, 6);
        assert_eq!(
            h.to_bytes(),
            [0, 0, 0, 1, 0, 2, 0, 3, 4, 5, 0, 6],
        );
    }

    #[test]
    fn padding_fills_to_fixed_size() {
        let seg = Segment::new(1, 2, 3, Flags::from_bits_truncate(4), 5, b"short payload".to_vec())
            .unwrap();
        assert_eq!(seg.encode().len(), SEGMENT_LEN);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let seg = Segment::new(1, 2, 3, Flags::from_bits_truncate(4), 5, b"payload".to_vec())
            .unwrap();
        let encoded = seg.encode();
        assert_eq!(Segment::decode(&encoded).unwrap(), seg);
    }

    #[test]
    fn header_mutation_breaks_the_checksum() {
        let seg = Segment::new(1, 2, 3, Flags::from_bits_truncate(4), 5, b"payload".to_vec())
            .unwrap();
        let mut encoded = seg.encode();
        // Flip a bit in syn_number's low byte, leaving everything else untouched.
        encoded[5] ^= 0x01;
        assert!(matches!(Segment::decode(&encoded), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn checksum_field_mutation_is_caught() {
        let seg = Segment::new(1, 2, 3, Flags::from_bits_truncate(4), 5, b"payload".to_vec())
            .unwrap();
        let mut encoded = seg.encode();
        encoded[HEADER_LEN..HEADER_LEN + CHECKSUM_LEN].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(Segment::decode(&encoded), Err(Error::ChecksumMismatch)));
    }

    #[test]
    fn boundary_payload_lengths_round_trip() {
        for len in [0usize, 1, 999, 1000] {
            let seg = Segment::new(1, 0, 0, Flags::empty(), 1, vec![0xAB; len]).unwrap();
            let encoded = seg.encode();
            let decoded = Segment::decode(&encoded).unwrap();
            assert_eq!(decoded.payload.len(), len);
        }
    }

    #[test]
    fn oversized_payload_is_rejected_at_construction() {
        let err = Segment::new(1, 0, 0, Flags::empty(), 1, vec![0u8; 1001]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { len: 1001, max: MAX_PAYLOAD }));
    }

    #[test]
    fn data_segment_has_no_flags_set() {
        let seg = Segment::new(1, 0, 0, Flags::empty(), 1, vec![]).unwrap();
        assert!(seg.is_data());
        assert!(!seg.is_syn() && !seg.is_ack() && !seg.is_fin());
    }
}
