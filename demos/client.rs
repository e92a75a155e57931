//! Example PKG client.
//!
//! Connects to the example server, prints every DATA message, and answers
//! the server's CIAO with its own.

use clap::Parser;
use pkg_transport::codec::CStrCodec;
use pkg_transport::{ClientBuilder, Endpoint, MSG_CIAO, MSG_DATA};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pkg-client")]
#[command(about = "PKG example client")]
struct Args {
    /// address:port or unix:<path>
    #[arg(short, long, default_value = "127.0.0.1:2000")]
    endpoint: Endpoint,

    /// Magic identifier to greet with
    #[arg(long, default_value = pkg_transport::MAGIC_ID)]
    magic: String,

    /// Extra DATA messages to send before waiting for the server
    #[arg(short, long)]
    message: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut conn = ClientBuilder::new()
        .on(MSG_DATA, "DATA", |_ctx, payload| {
            info!("Received message from server: {}", CStrCodec::decode_lossy(&payload));
        })
        .default_handler(|ctx, payload| {
            info!("Ignoring message type {} ({} bytes)", ctx.msg_type(), payload.len());
        })
        .magic(args.magic)
        .connect(&args.endpoint)
        .await?;

    for text in &args.message {
        conn.send_data(text).await?;
    }

    let ciao = conn.bwaitfor(MSG_CIAO).await?;
    info!("Server says goodbye: {}", CStrCodec::decode_lossy(ciao.payload()));

    conn.acknowledge_termination("DONE").await?;
    conn.close().await?;
    Ok(())
}
