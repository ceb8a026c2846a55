use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "drawdown=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = drawdown::api::run_cli().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
