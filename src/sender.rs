// The sender state machine: `Closed -> SynSent -> Established ->
// (FinSent | FinReceived) -> Finished`.
//
// States are modeled as a discriminated enum whose data payload is
// exactly the scratch that state needs (the pending-ack map for
// `Established`, the retry counter for the teardown states), not as
// free-standing objects holding a back-reference to the machine. The
// connection-level fields that outlive any single state (`stream_id`,
// `syn_number`, `expected_syn`, `highest_ack`, ...) live directly on
// `Sender` alongside a bare state discriminant.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::factory::SegmentFactory;
use crate::segment::{Segment, MAX_PAYLOAD};
use crate::timer::Deadline;
use crate::transport::{Datagram, RecvOutcome};

// A transmitted-but-not-yet-acknowledged data segment.
struct Unacked {
    segment: Segment,
    last_sent: Deadline,
}

enum SenderState {
    Closed,
    SynSent,
    Established { unacked: BTreeMap<u16, Unacked> },
    FinSent { retries: u32 },
    FinReceived { retries: u32 },
    Finished,
}

pub struct Sender<T: Datagram> {
    transport: T,
    peer: SocketAddr,
    timeout: Duration,
    retry_bound: u32,
    advertised_window: u8,

    stream_id: u32,
    syn_number: u16,
    expected_syn: u16,
    highest_ack: u16,
    server_window: u8,
    input_remaining: VecDeque<u8>,
    factory: SegmentFactory,

    state: SenderState,
    established_logged: bool,
    suggested_filename: Option<Vec<u8>>,
}

impl<T: Datagram> Sender<T> {
    // Builds a sender for `input`. Rejects input that would require
    // more segments than the 16-bit sequence space can address rather
    // than silently wrapping (§9).
    pub fn new(
        transport: T,
        peer: SocketAddr,
        input: Vec<u8>,
        advertised_window: u8,
        timeout: Duration,
        retry_bound: u32,
    ) -> Result<Sender<T>, Error> {
        let segments = input.len().div_ceil(MAX_PAYLOAD).max(1);
        if segments > u16::MAX as usize {
            return Err(Error::InputTooLarge { segments });
        }

        Ok(Sender {
            transport,
            peer,
            timeout,
            retry_bound,
            advertised_window,
            stream_id: 0,
            syn_number: 0,
            expected_syn: 0,
            highest_ack: 0,
            server_window: 0,
            input_remaining: input.into(),
            factory: SegmentFactory::new(0, advertised_window),
            state: SenderState::Closed,
            established_logged: false,
            suggested_filename: None,
        })
    }

    // Carries `name` in the opening SYN's payload, for receivers that
    // opt in to honoring it.
    pub fn with_suggested_filename(mut self, name: Vec<u8>) -> Sender<T> {
        self.suggested_filename = Some(name);
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SenderState::Finished)
    }

    // Runs the event loop described in §2 to completion.
    pub fn run(&mut self) -> Result<(), Error> {
        self.transport.set_timeout(self.timeout)?;
        while !self.is_finished() {
            self.step();
        }
        Ok(())
    }

    fn send(&self, segment: &Segment) {
        if let Err(e) = self.transport.send(segment, self.peer) {
            warn!(error = %e, "failed to send segment");
        }
    }

    fn accept_ack(&mut self, ack: u16) {
        if wrapping_gt(ack, self.highest_ack) {
            self.highest_ack = ack;
        }
    }

    // Advances the state machine by exactly one transition.
    fn step(&mut self) {
        let state = std::mem::replace(&mut self.state, SenderState::Finished);
        self.state = match state {
            SenderState::Closed => self.on_closed(),
            SenderState::SynSent => self.on_syn_sent(),
            SenderState::Established { unacked } => self.on_established(unacked),
            SenderState::FinSent { retries } => self.on_fin_sent(retries),
            SenderState::FinReceived { retries } => self.on_fin_received(retries),
            SenderState::Finished => SenderState::Finished,
        };
    }

    fn on_closed(&mut self) -> SenderState {
        let stream_id: u32 = rand::thread_rng().gen();
        self.stream_id = stream_id;
        self.factory.stream_id = stream_id;
        self.syn_number = 0;
        self.expected_syn = 0;
        self.highest_ack = 0;
        debug!(stream_id, "connection opened");
        SenderState::SynSent
    }

    fn on_syn_sent(&mut self) -> SenderState {
        let syn = match &self.suggested_filename {
            Some(name) => self
                .factory
                .syn_with_payload(self.syn_number, self.expected_syn, name.clone())
                .expect("filenames fit well within the payload limit"),
            None => self.factory.syn(self.syn_number, self.expected_syn),
        };
        self.send(&syn);

        match self.transport.recv() {
            RecvOutcome::Timeout => {
                trace!("SynSent: timed out");
                SenderState::SynSent
            }
            RecvOutcome::ChecksumMismatch => {
                trace!("SynSent: checksum mismatch");
                SenderState::SynSent
            }
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id && seg.is_syn() && seg.is_ack() {
                    self.server_window = seg.header.window_size;
                    self.accept_ack(seg.header.ack_number);
                    self.expected_syn = seg.header.syn_number.wrapping_add(1);
                    self.syn_number = self.syn_number.wrapping_add(1);

                    let ack = self.factory.ack(self.syn_number, self.expected_syn);
                    self.send(&ack);

                    if !self.established_logged {
                        info!("Connection established");
                        self.established_logged = true;
                    }
                    SenderState::Established {
                        unacked: BTreeMap::new(),
                    }
                } else {
                    trace!("SynSent: wrong message received");
                    SenderState::SynSent
                }
            }
        }
    }

    fn on_established(&mut self, mut unacked: BTreeMap<u16, Unacked>) -> SenderState {
        // (a) Fill the window.
        while !self.input_remaining.is_empty()
            && (self.syn_number as u32)
                < self.highest_ack as u32 + self.server_window as u32
        {
            let take = self.input_remaining.len().min(MAX_PAYLOAD);
            let chunk: Vec<u8> = self.input_remaining.drain(..take).collect();

            let segment = self
                .factory
                .data(self.syn_number, self.expected_syn, chunk)
                .expect("chunk is bounded by MAX_PAYLOAD");
            self.send(&segment);

            unacked.insert(
                self.syn_number,
                Unacked {
                    segment,
                    last_sent: Deadline::now(),
                },
            );
            self.syn_number = self.syn_number.wrapping_add(1);
        }

        // (b) Drain acks.
        while wrapping_gt(self.syn_number, self.highest_ack) {
            match self.transport.recv() {
                RecvOutcome::Timeout => break,
                RecvOutcome::ChecksumMismatch => continue,
                RecvOutcome::Segment(seg, _) => {
                    if seg.header.stream_id != self.stream_id {
                        continue;
                    }

                    let mut syn = self.highest_ack;
                    while wrapping_gt(seg.header.ack_number, syn) {
                        unacked.remove(&syn);
                        syn = syn.wrapping_add(1);
                    }
                    self.accept_ack(seg.header.ack_number);

                    if seg.is_fin() {
                        self.expected_syn = self.expected_syn.wrapping_add(1);
                        return SenderState::FinReceived {
                            retries: self.retry_bound,
                        };
                    }
                }
            }
        }

        // (c) Retransmission sweep.
        let mut syn = self.highest_ack;
        while wrapping_gt(self.syn_number, syn) {
            if let Some(pending) = unacked.get_mut(&syn) {
                if pending.last_sent.has_expired(self.timeout) {
                    pending.segment.header.ack_number = self.expected_syn;
                    self.send(&pending.segment);
                    pending.last_sent.refresh();
                }
            }
            syn = syn.wrapping_add(1);
        }

        // (d) Transition.
        if !self.input_remaining.is_empty() || !unacked.is_empty() {
            SenderState::Established { unacked }
        } else {
            SenderState::FinSent {
                retries: self.retry_bound,
            }
        }
    }

    fn on_fin_sent(&mut self, retries: u32) -> SenderState {
        if retries == 0 {
            warn!("FinSent: retry limit reached");
            return SenderState::Finished;
        }
        let retries = retries - 1;

        let fin = self.factory.fin(self.syn_number, self.expected_syn);
        self.send(&fin);

        match self.transport.recv() {
            RecvOutcome::Timeout | RecvOutcome::ChecksumMismatch => {
                SenderState::FinSent { retries }
            }
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id
                    && seg.is_fin()
                    && seg.is_ack()
                    && seg.header.syn_number == self.expected_syn
                {
                    self.accept_ack(seg.header.ack_number);
                    self.syn_number = self.syn_number.wrapping_add(1);
                    self.expected_syn = self.expected_syn.wrapping_add(1);
                    let ack = self.factory.ack(self.syn_number, self.expected_syn);
                    self.send(&ack);
                    SenderState::Finished
                } else {
                    SenderState::FinSent { retries }
                }
            }
        }
    }

    fn on_fin_received(&mut self, retries: u32) -> SenderState {
        if retries == 0 {
            warn!("FinReceived: retry limit reached");
            return SenderState::Finished;
        }
        let retries = retries - 1;

        let fin_ack = self.factory.fin_ack(self.syn_number, self.expected_syn);
        self.send(&fin_ack);

        match self.transport.recv() {
            RecvOutcome::Timeout | RecvOutcome::ChecksumMismatch => {
                SenderState::FinReceived { retries }
            }
            RecvOutcome::Segment(seg, _) => {
                if seg.header.stream_id == self.stream_id
                    && seg.is_ack()
                    && seg.header.syn_number == self.expected_syn
                {
                    SenderState::Finished
                } else {
                    SenderState::FinReceived { retries }
                }
            }
        }
    }
}

// `lhs > rhs` in the 16-bit sequence space, tolerant of wraparound the
// way TCP-derived protocols compare sequence numbers (RFC1323 sec. 2).
// bTCP transfers are asserted to fit within one non-wrapping sequence
// space (§9), so plain wrapping arithmetic is sufficient here and
// never needs to reason about the far side of the space.
fn wrapping_gt(lhs: u16, rhs: u16) -> bool {
    lhs.wrapping_sub(rhs) != 0 && lhs.wrapping_sub(rhs) < (u16::MAX / 2)
}
