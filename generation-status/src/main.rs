use clap::Parser;
use generation_status::cli::{run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("generation_status={}", args.log_level).into()),
        )
        .with_writer(std::io::stderr)
        .init();

    run(args).await
}
