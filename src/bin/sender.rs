use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use btcp::config::SenderConfig;
use btcp::error::Error;
use btcp::sender::Sender;
use btcp::transport::UdpDatagram;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SenderConfig::parse();

    let input = std::fs::read(&config.input)?;
    let peer = SocketAddr::new(IpAddr::V4(config.destination), config.port);
    let transport = UdpDatagram::bind(SocketAddr::new(IpAddr::V4([0, 0, 0, 0].into()), 0))?;

    let mut sender = Sender::new(
        transport,
        peer,
        input,
        config.window,
        config.timeout(),
        config.retries,
    )?;

    if config.suggest_filename {
        if let Some(name) = config.input.file_name() {
            sender = sender.with_suggested_filename(name.to_string_lossy().into_owned().into_bytes());
        }
    }

    sender.run()?;
    tracing::info!("transfer complete");
    Ok(())
}
