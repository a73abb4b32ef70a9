// Operator configuration for the two binaries, parsed with `clap`'s
// derive API. Defaults match the ones registered by
// `bTCP_client.py`/`bTCP_server.py` in `original_source/`.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "btcp-sender", about = "Send a file over bTCP")]
pub struct SenderConfig {
    // Maximum number of unacknowledged segments in flight.
    #[arg(long, default_value_t = 100)]
    pub window: u8,

    // Retransmission timeout, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub timeout: u64,

    // File to read and transfer.
    #[arg(long, default_value = "tmp.file")]
    pub input: PathBuf,

    // Receiver's address.
    #[arg(long, default_value = "127.0.0.1")]
    pub destination: Ipv4Addr,

    // Receiver's port.
    #[arg(long, default_value_t = 9001)]
    pub port: u16,

    // Teardown retries before giving up.
    #[arg(long, default_value_t = 100)]
    pub retries: u32,

    // Send the input file's name in the SYN payload, for receivers
    // that opt in to honoring it with `--allow-client-filename`.
    #[arg(long)]
    pub suggest_filename: bool,
}

impl SenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[derive(Debug, Parser)]
#[command(name = "btcp-receiver", about = "Receive a file over bTCP")]
pub struct ReceiverConfig {
    // Advertised receive window, in segments.
    #[arg(long, default_value_t = 100)]
    pub window: u8,

    // Retransmission timeout, in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub timeout: u64,

    // File to write the received bytes to.
    #[arg(long, default_value = "tmp.file")]
    pub output: PathBuf,

    // Local address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub serverip: Ipv4Addr,

    // Local port to bind.
    #[arg(long, default_value_t = 9001)]
    pub serverport: u16,

    // Teardown retries before giving up.
    #[arg(long, default_value_t = 10)]
    pub retries: u32,

    // Soft cap, in bytes, on buffered-but-unpersisted output.
    #[arg(long, default_value_t = crate::receiver::DEFAULT_OUTPUT_CAP)]
    pub output_cap: usize,

    // Honor a client-suggested output filename carried in the SYN
    // payload instead of always writing to `--output`. Off by default.
    #[arg(long, default_value_t = false)]
    pub allow_client_filename: bool,
}

impl ReceiverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}
