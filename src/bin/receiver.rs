use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use btcp::config::ReceiverConfig;
use btcp::error::Error;
use btcp::receiver::Receiver;
use btcp::transport::UdpDatagram;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ReceiverConfig::parse();

    let local = SocketAddr::new(IpAddr::V4(config.serverip), config.serverport);
    let transport = UdpDatagram::bind(local)?;

    let mut receiver = Receiver::new(
        transport,
        config.output.clone(),
        config.window,
        config.timeout(),
        config.retries,
    )
    .with_output_cap(config.output_cap)
    .with_client_filename_allowed(config.allow_client_filename);

    receiver.run()?;
    tracing::info!("transfer complete");
    Ok(())
}
