#[tokio::main]
async fn main() {
    if let Err(error) = market_sync::run().await {
        eprintln!("market-sync: {error}");
        std::process::exit(1);
    }
}
