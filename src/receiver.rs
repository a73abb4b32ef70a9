// The receiver state machine: `Listen -> SynReceived -> Established ->
// (FinSent | FinReceived) -> Closed`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::factory::SegmentFactory;
use crate::transport::{Datagram, RecvOutcome};

// Soft cap, in bytes, on how much unpersisted output the receiver will
// buffer before treating the situation the way real disk exhaustion
// would be treated (supplemented from `original_source/bTCP/server.py`'s
// `shutil.disk_usage` guard, see DESIGN.md).
pub const DEFAULT_OUTPUT_CAP: usize = 256 * 1024 * 1024;

enum ReceiverState {
    Listen,
    SynReceived,
    Established {
        reorder_buffer: BTreeMap<u16, Vec<u8>>,
        output: Vec<u8>,
    },
    // Receiver-initiated teardown: the live storage device could not
    // accommodate the buffered bytes. No file is written, the
    // destination is written exactly once, on a clean FIN, never
    // partially.
    FinSent {
        retries: u32,
    },
    // Peer's FIN was accepted in sequence; `output` was already
    // persisted to the destination file before entering this state.
    FinReceived {
        retries: u32,
    },
    Closed,
}

pub struct Receiver<T: Datagram> {
    transport: T,
    timeout: Duration,
    retry_bound: u32,
    window_size: u8,
    output_path: PathBuf,
    output_cap: usize,
    allow_client_filename: bool,

    client_address: Option<SocketAddr>,
    stream_id: u32,
    syn_number: u16,
    expected_syn: u16,
    factory: SegmentFactory,

    state: ReceiverState,
}

impl<T: Datagram> Receiver<T> {
    pub fn new(
        transport: T,
        output_path: PathBuf,
        window_size: u8,
        timeout: Duration,
        retry_bound: u32,
    ) -> Receiver<T> {
        Receiver {
            transport,
            timeout,
            retry_bound,
            window_size,
            output_path,
            output_cap: DEFAULT_OUTPUT_CAP,
            allow_client_filename: false,
            client_address: None,
            stream_id: 0,
            syn_number: 100,
            expected_syn: 0,
            factory: SegmentFactory::new(0, window_size),
            state: ReceiverState::Listen,
        }
    }

    pub fn with_output_cap(mut self, cap: usize) -> Receiver<T> {
        self.output_cap = cap;
        self
    }

    // Honors a candidate output filename carried in the opening SYN's
    // payload (`original_source/bTCP/server.py`'s `len(payload) < 30`
    // convention) instead of always writing to the configured path.
    pub fn with_client_filename_allowed(mut self, allowed: bool) -> Receiver<T> {
        self.allow_client_filename = allowed;
        self
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ReceiverState::Closed)
    }

    // Runs the event loop to completion, writing the assembled file
    // exactly once on a clean FIN.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.is_closed() {
            self.step()?;
        }
        Ok(())
    }

    fn send(&self, bytes_target: SocketAddr, segment: &crate::segment::Segment) {
        if let Err(e) = self.transport.send(segment, bytes_target) {
            warn!(error = %e, "failed to send segment");
        }
    }

    fn step(&mut self) -> Result<(), Error> {
        let state = std::mem::replace(&mut self.state, ReceiverState::Closed);
        self.state = match state {
            ReceiverState::Listen => self.on_listen(),
            ReceiverState::SynReceived => self.on_syn_received(),
            ReceiverState::Established {
                reorder_buffer,
                output,
            } => self.on_established(reorder_buffer, output)?,
            ReceiverState::FinSent { retries } => self.on_fin_sent(retries),
            ReceiverState::FinReceived { retries } => self.on_fin_received(retries),
            ReceiverState::Closed => ReceiverState::Closed,
        };
        Ok(())
    }

    fn on_listen(&mut self) -> ReceiverState {
        self.transport
            .set_blocking()
            .expect("socket must support blocking mode");
        self.syn_number = 100;

        match self.transport.recv() {
            RecvOutcome::Timeout => ReceiverState::Listen,
            RecvOutcome::ChecksumMismatch => {
                trace!("Listen: checksum mismatch");
                ReceiverState::Listen
            }
            RecvOutcome::Segment(seg, addr) => {
                if !seg.is_syn() || seg.header.ack_number != 0 {
                    trace!("Listen: wrong message received");
                    return ReceiverState::Listen;
                }

                self.client_address = Some(addr);
                self.stream_id = seg.header.stream_id;
                self.factory.stream_id = seg.header.stream_id;
                self.expected_syn = seg.header.syn_number.wrapping_add(1);

                if self.allow_client_filename && !seg.payload.is_empty() && seg.payload.len() < 30
                {
                    if let Ok(name) = std::str::from_utf8(&seg.payload) {
                        if let Some(file_name) = PathBuf::from(name).file_name() {
                            self.output_path = PathBuf::from(file_name);
                            debug!(path = %self.output_path.display(), "using client-suggested output filename");
                        }
                    }
                }

                debug!(stream_id = self.stream_id, %addr, "SYN received");
                ReceiverState::SynReceived
            }
        }
    }

    fn on_syn_received(&mut self) -> ReceiverState {
        let addr = self.client_address.expect("set on entry to SynReceived");
        let syn_ack = self.factory.syn_ack(self.syn_number, self.expected_syn);
        self.send(addr, &syn_ack);

        self.transport
            .set_timeout(self.timeout)
            .expect("socket must support a read timeout");

        match self.transport.recv() {
            RecvOutcome::Timeout => ReceiverState::SynReceived,
            RecvOutcome::ChecksumMismatch => ReceiverState::SynReceived,
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id
                    && !wrapping_lt(seg.header.syn_number, self.expected_syn)
                {
                    self.syn_number = self.syn_number.wrapping_add(1);
                    info!("Connection established");
                    ReceiverState::Established {
                        reorder_buffer: BTreeMap::new(),
                        output: Vec::new(),
                    }
                } else {
                    ReceiverState::SynReceived
                }
            }
        }
    }

    fn on_established(
        &mut self,
        mut reorder_buffer: BTreeMap<u16, Vec<u8>>,
        mut output: Vec<u8>,
    ) -> Result<ReceiverState, Error> {
        let addr = self.client_address.expect("set before Established");

        Ok(match self.transport.recv() {
            RecvOutcome::Timeout | RecvOutcome::ChecksumMismatch => ReceiverState::Established {
                reorder_buffer,
                output,
            },
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id != self.stream_id {
                    return Ok(ReceiverState::Established {
                        reorder_buffer,
                        output,
                    });
                }

                if seg.is_data() {
                    reorder(
                        &mut reorder_buffer,
                        &mut output,
                        &mut self.expected_syn,
                        self.window_size,
                        seg.header.syn_number,
                        seg.payload,
                    );

                    if output.len() + reorder_buffer_bytes(&reorder_buffer) > self.output_cap {
                        warn!("output buffer exceeds capacity, aborting without writing");
                        return Ok(ReceiverState::FinSent {
                            retries: self.retry_bound,
                        });
                    }

                    let ack = self.factory.ack(self.syn_number, self.expected_syn);
                    self.send(addr, &ack);
                    ReceiverState::Established {
                        reorder_buffer,
                        output,
                    }
                } else if seg.is_fin() && seg.header.syn_number == self.expected_syn {
                    self.expected_syn = self.expected_syn.wrapping_add(1);
                    std::fs::write(&self.output_path, &output).map_err(Error::Io)?;
                    info!(bytes = output.len(), path = %self.output_path.display(), "output file written");
                    ReceiverState::FinReceived {
                        retries: self.retry_bound,
                    }
                } else {
                    ReceiverState::Established {
                        reorder_buffer,
                        output,
                    }
                }
            }
        })
    }

    fn on_fin_sent(&mut self, retries: u32) -> ReceiverState {
        let addr = self.client_address.expect("set before FinSent");

        if retries == 0 {
            warn!("FinSent: retry limit reached");
            return ReceiverState::Closed;
        }
        let retries = retries - 1;

        let fin = self.factory.fin(self.syn_number, self.expected_syn);
        self.send(addr, &fin);

        match self.transport.recv() {
            RecvOutcome::Timeout | RecvOutcome::ChecksumMismatch => {
                ReceiverState::FinSent { retries }
            }
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id && seg.is_fin() && seg.is_ack() {
                    self.syn_number = self.syn_number.wrapping_add(1);
                    self.expected_syn = self.expected_syn.wrapping_add(1);
                    let ack = self.factory.ack(self.syn_number, self.expected_syn);
                    self.send(addr, &ack);
                    ReceiverState::Closed
                } else {
                    ReceiverState::FinSent { retries }
                }
            }
        }
    }

    fn on_fin_received(&mut self, retries: u32) -> ReceiverState {
        let addr = self.client_address.expect("set before FinReceived");

        if retries == 0 {
            warn!("FinReceived: retry limit reached");
            return ReceiverState::Closed;
        }
        let retries = retries - 1;

        let fin_ack = self.factory.fin_ack(self.syn_number, self.expected_syn);
        self.send(addr, &fin_ack);

        match self.transport.recv() {
            RecvOutcome::Timeout | RecvOutcome::ChecksumMismatch => {
                ReceiverState::FinReceived { retries }
            }
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id
                    && seg.is_ack()
                    && seg.header.syn_number == self.expected_syn
                {
                    ReceiverState::Closed
                } else {
                    ReceiverState::FinReceived { retries }
                }
            }
        }
    }
}

fn reorder_buffer_bytes(buffer: &BTreeMap<u16, Vec<u8>>) -> usize {
    buffer.values().map(Vec::len).sum()
}

// The reorder algorithm: append in-order payloads to
// `output`, buffer genuinely out-of-order-but-in-window payloads, and
// silently drop anything outside the window.
fn reorder(
    reorder_buffer: &mut BTreeMap<u16, Vec<u8>>,
    output: &mut Vec<u8>,
    expected_syn: &mut u16,
    window_size: u8,
    syn_number: u16,
    payload: Vec<u8>,
) {
    if syn_number == *expected_syn {
        output.extend_from_slice(&payload);
        *expected_syn = expected_syn.wrapping_add(1);
        while let Some(buffered) = reorder_buffer.remove(expected_syn) {
            output.extend_from_slice(&buffered);
            *expected_syn = expected_syn.wrapping_add(1);
        }
    } else if is_strictly_between(*expected_syn, syn_number, window_size) {
        reorder_buffer.entry(syn_number).or_insert(payload);
    }
    // else: outside the window, drop.
}

// `expected_syn < s < expected_syn + window_size`, tolerant of
// wraparound the way the sequence-number space is compared elsewhere.
fn is_strictly_between(expected_syn: u16, s: u16, window_size: u8) -> bool {
    let offset = s.wrapping_sub(expected_syn);
    offset != 0 && (offset as u32) < window_size as u32
}

fn wrapping_lt(lhs: u16, rhs: u16) -> bool {
    lhs.wrapping_sub(rhs) != 0 && rhs.wrapping_sub(lhs) < (u16::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_appends_in_order_payload() {
        let mut buffer = BTreeMap::new();
        let mut output = Vec::new();
        let mut expected = 0u16;
        reorder(&mut buffer, &mut output, &mut expected, 10, 0, b"ab".to_vec());
        assert_eq!(output, b"ab");
        assert_eq!(expected, 1);
    }

    #[test]
    fn reorder_buffers_future_segment_then_drains_it() {
        let mut buffer = BTreeMap::new();
        let mut output = Vec::new();
        let mut expected = 0u16;
        reorder(&mut buffer, &mut output, &mut expected, 10, 1, b"b".to_vec());
        assert!(output.is_empty());
        assert_eq!(buffer.len(), 1);

        reorder(&mut buffer, &mut output, &mut expected, 10, 0, b"a".to_vec());
        assert_eq!(output, b"ab");
        assert!(buffer.is_empty());
        assert_eq!(expected, 2);
    }

    #[test]
    fn reorder_drops_segments_outside_the_window() {
        let mut buffer = BTreeMap::new();
        let mut output = Vec::new();
        let mut expected = 0u16;
        reorder(&mut buffer, &mut output, &mut expected, 2, 10, b"late".to_vec());
        assert!(output.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn duplicate_out_of_order_segment_is_idempotent() {
        let mut buffer = BTreeMap::new();
        let mut output = Vec::new();
        let mut expected = 0u16;
        reorder(&mut buffer, &mut output, &mut expected, 10, 1, b"first".to_vec());
        reorder(&mut buffer, &mut output, &mut expected, 10, 1, b"second".to_vec());
        assert_eq!(buffer.get(&1).unwrap(), b"first");
    }
}
