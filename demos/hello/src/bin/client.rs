use clap::Parser;
use demo_hello::{InputParam, OutputParam};
use strand_rpc::{Client, PendingCall, RpcError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Hello-world RPC client")]
struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:1200")]
    addr: String,
}

/// One synchronous call: the output lands in place before `call` returns.
async fn client_sync(client: &Client) -> Result<(), RpcError> {
    let input = InputParam {
        a32: 1000,
        b32: (0..100).collect(),
    };
    let mut out = OutputParam::default();
    client.call("Add", input, &mut out).await?;
    info!(sum = %out.sum, "sync call");
    Ok(())
}

/// The same call through the async path, resolving the handle later.
async fn client_async(client: &Client) -> Result<(), RpcError> {
    let input = InputParam {
        a32: 500,
        b32: (0..50).collect(),
    };
    let pending: PendingCall<OutputParam> = client.call_async("Add", input).await;
    let out = pending.await?;
    info!(sum = %out.sum, "async call");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let client = Client::new(&args.addr);
    client.start().await?;

    client_sync(&client).await?;
    client_async(&client).await?;

    client.stop().await?;
    Ok(())
}
