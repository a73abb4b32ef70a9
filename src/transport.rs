// The datagram transport collaborator (§6). The core state machines
// never touch a socket directly; they go through the [`Datagram`]
// trait, which is exactly the interface §6 promises: fire-and-forget
// `send`, a timed `recv`, and the two mode switches the handshake uses
// (`set_blocking`, `set_timeout`). [`UdpDatagram`] is the production
// implementation over `std::net::UdpSocket`; `tests/support` carries a
// loss/duplication/reorder/corruption double for the reliability
// tests, since that traffic shaping is explicitly a test-harness
// concern (§1), not a core one.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::segment::{Segment, SEGMENT_LEN};

// Outcome of one timed receive attempt. Timeout and checksum mismatch
// are transient wire conditions (§7) the state machines handle inline;
// they are never `Err` in the `std::io` sense.
pub enum RecvOutcome {
    Segment(Segment, SocketAddr),
    Timeout,
    ChecksumMismatch,
}

// The external collaborator the core consumes for opaque 1016-byte
// datagrams. Implementors guarantee a received buffer is always
// exactly [`SEGMENT_LEN`] bytes or the call times out, no partial
// reads, per §6.
pub trait Datagram {
    fn send(&self, segment: &Segment, peer: SocketAddr) -> std::io::Result<()>;
    fn recv(&self) -> RecvOutcome;
    fn set_blocking(&self) -> std::io::Result<()>;
    fn set_timeout(&self, timeout: Duration) -> std::io::Result<()>;
}

// Production transport: a bound UDP socket.
pub struct UdpDatagram {
    socket: UdpSocket,
}

impl UdpDatagram {
    pub fn bind(addr: SocketAddr) -> std::io::Result<UdpDatagram> {
        let socket = UdpSocket::bind(addr)?;
        Ok(UdpDatagram { socket })
    }
}

impl Datagram for UdpDatagram {
    fn send(&self, segment: &Segment, peer: SocketAddr) -> std::io::Result<()> {
        self.socket.send_to(&segment.encode(), peer)?;
        Ok(())
    }

    fn recv(&self) -> RecvOutcome {
        let mut buf = [0u8; SEGMENT_LEN];
        match self.socket.recv_from(&mut buf) {
            Ok((n, addr)) if n == SEGMENT_LEN => match Segment::decode(&buf) {
                Ok(segment) => RecvOutcome::Segment(segment, addr),
                Err(_) => RecvOutcome::ChecksumMismatch,
            },
            Ok(_) => RecvOutcome::ChecksumMismatch,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                RecvOutcome::Timeout
            }
            Err(e) => {
                tracing::warn!(error = %e, "datagram receive failed");
                RecvOutcome::Timeout
            }
        }
    }

    fn set_blocking(&self) -> std::io::Result<()> {
        self.socket.set_read_timeout(None)
    }

    fn set_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }
}
