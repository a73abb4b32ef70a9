use std::io;

// Crate-wide error type.
//
// Transient wire conditions (timeout, checksum mismatch) are *not*
// represented here, they are handled locally by the state machines via
// [`crate::transport::RecvOutcome`] and never propagate as an `Error`.
// This type only carries construction errors and I/O errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("composite checksum mismatch")]
    ChecksumMismatch,

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("input requires {segments} segments, which does not fit the 16-bit sequence space")]
    InputTooLarge { segments: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
