// bTCP: a reliable, connection-oriented, unidirectional file-transfer
// protocol layered over UDP.
//
// The crate is organized the way the wire protocol itself is layered:
// [`segment`] is the on-the-wire codec, [`factory`] builds segments for
// a connection, [`transport`] is the datagram collaborator the state
// machines run over, and [`sender`]/[`receiver`] are the two halves of
// the handshake/transfer/teardown state machine.

pub mod config;
pub mod error;
pub mod factory;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod timer;
pub mod transport;

pub use error::Error;
pub use receiver::Receiver;
pub use sender::Sender;
