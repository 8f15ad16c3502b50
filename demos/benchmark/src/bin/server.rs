use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use strand_rpc::{Server, get_stat};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "RPC throughput benchmark server")]
struct Args {
    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:1234")]
    addr: String,

    /// CA certificate for mutual TLS.
    #[arg(long, requires_all = ["cert", "key"])]
    ca: Option<String>,

    /// Server certificate.
    #[arg(long)]
    cert: Option<String>,

    /// Server private key.
    #[arg(long)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let server = Server::bind(&args.addr).await?;
    server.register("Add", |a: u32, b: &mut u32| {
        *b = a;
        Ok(())
    })?;
    server.register("Sub", |a: u32, b: &mut u32| {
        *b = a;
        Ok(())
    })?;

    if let (Some(ca), Some(cert), Some(key)) = (&args.ca, &args.cert, &args.key) {
        server.tls_enable(ca, cert, key)?;
        info!("mutual TLS enabled");
    }

    info!(addr = %args.addr, "serving");
    let server = Arc::new(server);
    let background = server.clone();
    tokio::spawn(async move {
        if let Err(e) = background.serve().await {
            tracing::error!(error = %e, "serve failed");
        }
    });

    // Sample the global counters once a second and report the send rate.
    let mut last = get_stat();
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let now = get_stat();
        let delta = now.sub(last);
        last = now;
        info!("throughput {:.3} kTPS", delta.send as f32 / 1024.0);
    }
}
