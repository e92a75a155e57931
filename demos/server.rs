//! Example PKG server.
//!
//! Waits for a client that greets with the right magic, sends it two DATA
//! messages, then terminates the session and waits for the client's CIAO.
//!
//! ```text
//! cargo run --example server -- --endpoint 2000
//! cargo run --example client -- --endpoint 127.0.0.1:2000
//! ```

use clap::Parser;
use pkg_transport::codec::CStrCodec;
use pkg_transport::{DispatchTable, Endpoint, Server, ServerConfig, MSG_CIAO, MSG_DATA, MSG_HELO};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pkg-server")]
#[command(about = "One-shot PKG example server")]
struct Args {
    /// Port, address:port, or unix:<path>
    #[arg(short, long, default_value = "2000")]
    endpoint: Endpoint,

    /// Magic identifier clients must send
    #[arg(long, default_value = pkg_transport::MAGIC_ID)]
    magic: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let table = DispatchTable::new()
        .on(MSG_HELO, "HELO", |_ctx, _payload| {
            info!("Unexpected HELO encountered");
        })
        .on(MSG_DATA, "DATA", |_ctx, payload| {
            info!("Received message from client: {}", CStrCodec::decode_lossy(&payload));
        })
        .on(MSG_CIAO, "CIAO", |_ctx, payload| {
            info!("CIAO encountered: {}", CStrCodec::decode_lossy(&payload));
        });

    let config = ServerConfig::new(args.endpoint).magic(args.magic);
    let mut server = Server::bind(config, table).await?;
    info!("Listening on {}", server.local_endpoint());

    let mut conn = server.accept_client().await?;

    conn.send_data("This is a message from the server.").await?;
    conn.send_data("Yet another message from the server.").await?;

    let reply = conn.terminate("DONE").await?;
    info!("Client finished: {}", CStrCodec::decode_lossy(reply.payload()));

    conn.close().await?;
    Ok(())
}
