use clap::Parser;
use demo_hello::{InputParam, OutputParam};
use strand_rpc::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Hello-world RPC server")]
struct Args {
    /// Address to listen on.
    #[arg(default_value = "127.0.0.1:1200")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let server = Server::bind(&args.addr).await?;
    server.register("Add", |input: InputParam, out: &mut OutputParam| {
        let sum: u32 = input.b32.iter().sum();
        out.sum = format!("no : {} , sum : {}", input.a32, sum);
        info!(a32 = input.a32, values = input.b32.len(), sum = %out.sum, "call");
        Ok(())
    })?;

    info!(addr = %args.addr, "serving");
    server.serve().await?;
    Ok(())
}
