use std::sync::Arc;

use clap::Parser;
use strand_rpc::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "RPC throughput benchmark client")]
struct Args {
    /// Number of concurrent callers.
    #[arg(default_value_t = 100)]
    count: usize,

    /// Server address.
    #[arg(default_value = "127.0.0.1:1234")]
    addr: String,

    /// CA certificate for mutual TLS.
    #[arg(long, requires_all = ["cert", "key"])]
    ca: Option<String>,

    /// Client certificate.
    #[arg(long)]
    cert: Option<String>,

    /// Client private key.
    #[arg(long)]
    key: Option<String>,
}

/// Hammer `Add` until something goes wrong, checking every echo.
async fn caller(client: Arc<Client>) {
    let mut i = 0u32;
    loop {
        let mut out = 0u32;
        if let Err(e) = client.call("Add", i, &mut out).await {
            error!(error = %e, "call failed");
            break;
        }
        if out != i {
            error!(sent = i, got = out, "echo mismatch");
            break;
        }
        i = i.wrapping_add(1);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    info!(count = args.count, addr = %args.addr, "starting");

    let client = Client::new(&args.addr);
    if let (Some(ca), Some(cert), Some(key)) = (&args.ca, &args.cert, &args.key) {
        client.tls_enable(ca, cert, key);
    }
    client.start().await?;
    let client = Arc::new(client);

    let mut workers = Vec::with_capacity(args.count);
    for _ in 0..args.count {
        workers.push(tokio::spawn(caller(client.clone())));
    }
    for worker in workers {
        let _ = worker.await;
    }

    client.stop().await?;
    Ok(())
}
