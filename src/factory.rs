// Small per-connection convenience for building segments that share a
// `stream_id` and advertised `window_size`, mirroring the teacher's
// bare-handed segment construction but collecting the repeated
// flag-setting into one place (`MessageFactory` in the original
// Python).

use crate::error::Error;
use crate::segment::{Flags, Segment};

#[derive(Debug, Clone)]
pub struct SegmentFactory {
    pub stream_id: u32,
    pub window_size: u8,
}

impl SegmentFactory {
    pub fn new(stream_id: u32, window_size: u8) -> SegmentFactory {
        SegmentFactory {
            stream_id,
            window_size,
        }
    }

    fn build(&self, syn_number: u16, ack_number: u16, flags: Flags, payload: Vec<u8>) -> Segment {
        Segment::new(
            self.stream_id,
            syn_number,
            ack_number,
            flags,
            self.window_size,
            payload,
        )
        .expect("factory-built payloads are always within the segment limit")
    }

    pub fn data(&self, syn_number: u16, ack_number: u16, payload: Vec<u8>) -> Result<Segment, Error> {
        Segment::new(
            self.stream_id,
            syn_number,
            ack_number,
            Flags::empty(),
            self.window_size,
            payload,
        )
    }

    pub fn syn(&self, syn_number: u16, ack_number: u16) -> Segment {
        self.build(syn_number, ack_number, Flags::SYN, Vec::new())
    }

    // A SYN carrying a candidate output filename in its payload, for
    // receivers that opt in to honoring it.
    pub fn syn_with_payload(
        &self,
        syn_number: u16,
        ack_number: u16,
        payload: Vec<u8>,
    ) -> Result<Segment, Error> {
        Segment::new(
            self.stream_id,
            syn_number,
            ack_number,
            Flags::SYN,
            self.window_size,
            payload,
        )
    }

    pub fn syn_ack(&self, syn_number: u16, ack_number: u16) -> Segment {
        self.build(syn_number, ack_number, Flags::SYN | Flags::ACK, Vec::new())
    }

    pub fn ack(&self, syn_number: u16, ack_number: u16) -> Segment {
        self.build(syn_number, ack_number, Flags::ACK, Vec::new())
    }

    pub fn fin(&self, syn_number: u16, ack_number: u16) -> Segment {
        self.build(syn_number, ack_number, Flags::FIN, Vec::new())
    }

    pub fn fin_ack(&self, syn_number: u16, ack_number: u16) -> Segment {
        self.build(syn_number, ack_number, Flags::FIN | Flags::ACK, Vec::new())
    }
}
