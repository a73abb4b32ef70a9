// An in-memory stand-in for the "test-harness traffic shaping"
// collaborator: a [`Link`] that can drop, corrupt, duplicate, reorder,
// and delay segments between two in-process endpoints, in place of the
// `tc qdisc netem` shell-out the original implementation's
// `testframework.py` used. Operates on encoded wire bytes, so
// corruption is caught (or not) by the real [`Segment::decode`]
// checksum check, the same as it would be over a real socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use btcp::segment::{Segment, SEGMENT_LEN};
use btcp::transport::{Datagram, RecvOutcome};

#[derive(Clone, Copy)]
pub struct LinkConfig {
    pub loss: f64,
    pub duplicate: f64,
    pub corrupt: f64,
    pub reorder: f64,
    pub delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> LinkConfig {
        LinkConfig {
            loss: 0.0,
            duplicate: 0.0,
            corrupt: 0.0,
            reorder: 0.0,
            delay: Duration::ZERO,
        }
    }
}

struct Queued {
    bytes: [u8; SEGMENT_LEN],
    from: SocketAddr,
    ready_at: Instant,
}

struct LinkState {
    rng: StdRng,
    inboxes: HashMap<SocketAddr, VecDeque<Queued>>,
}

pub struct Link {
    config: LinkConfig,
    state: Mutex<LinkState>,
    cv: Condvar,
}

impl Link {
    pub fn new(seed: u64, config: LinkConfig) -> Arc<Link> {
        Arc::new(Link {
            config,
            state: Mutex::new(LinkState {
                rng: StdRng::seed_from_u64(seed),
                inboxes: HashMap::new(),
            }),
            cv: Condvar::new(),
        })
    }

    pub fn endpoint(self: &Arc<Link>, addr: SocketAddr) -> TestDatagram {
        self.state.lock().unwrap().inboxes.entry(addr).or_default();
        TestDatagram {
            link: Arc::clone(self),
            local: addr,
            timeout: Mutex::new(None),
        }
    }

    fn deliver(&self, to: SocketAddr, from: SocketAddr, bytes: [u8; SEGMENT_LEN]) {
        let mut state = self.state.lock().unwrap();

        if state.rng.gen_bool(self.config.loss) {
            return;
        }

        let corrupt = state.rng.gen_bool(self.config.corrupt);
        let duplicate = state.rng.gen_bool(self.config.duplicate);
        let reorder_front = state.rng.gen_bool(self.config.reorder);
        let ready_at = Instant::now() + self.config.delay;

        let mut payload = bytes;
        if corrupt {
            payload[5] ^= 0x01;
        }

        let inbox = state.inboxes.entry(to).or_default();
        if reorder_front && !inbox.is_empty() {
            inbox.insert(
                0,
                Queued {
                    bytes: payload,
                    from,
                    ready_at,
                },
            );
        } else {
            inbox.push_back(Queued {
                bytes: payload,
                from,
                ready_at,
            });
        }
        if duplicate {
            inbox.push_back(Queued {
                bytes: payload,
                from,
                ready_at,
            });
        }

        drop(state);
        self.cv.notify_all();
    }
}

pub struct TestDatagram {
    link: Arc<Link>,
    local: SocketAddr,
    timeout: Mutex<Option<Duration>>,
}

impl Datagram for TestDatagram {
    fn send(&self, segment: &Segment, peer: SocketAddr) -> std::io::Result<()> {
        self.link.deliver(peer, self.local, segment.encode());
        Ok(())
    }

    fn recv(&self) -> RecvOutcome {
        let deadline = (*self.timeout.lock().unwrap()).map(|t| Instant::now() + t);

        let mut state = self.link.state.lock().unwrap();
        loop {
            let now = Instant::now();
            let inbox = state.inboxes.entry(self.local).or_default();
            if let Some(pos) = inbox.iter().position(|q| q.ready_at <= now) {
                let item = inbox.remove(pos).unwrap();
                return match Segment::decode(&item.bytes) {
                    Ok(segment) => RecvOutcome::Segment(segment, item.from),
                    Err(_) => RecvOutcome::ChecksumMismatch,
                };
            }

            if let Some(deadline) = deadline {
                if now >= deadline {
                    return RecvOutcome::Timeout;
                }
                let wait_for = (deadline - now).min(Duration::from_millis(20));
                let (guard, _) = self.cv_wait(state, wait_for);
                state = guard;
            } else {
                let (guard, _) = self.cv_wait(state, Duration::from_millis(20));
                state = guard;
            }
        }
    }

    fn set_blocking(&self) -> std::io::Result<()> {
        *self.timeout.lock().unwrap() = None;
        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) -> std::io::Result<()> {
        *self.timeout.lock().unwrap() = Some(timeout);
        Ok(())
    }
}

impl TestDatagram {
    fn cv_wait<'a>(
        &'a self,
        state: std::sync::MutexGuard<'a, LinkState>,
        wait_for: Duration,
    ) -> (std::sync::MutexGuard<'a, LinkState>, std::sync::WaitTimeoutResult) {
        self.link.cv.wait_timeout(state, wait_for).unwrap()
    }
}
