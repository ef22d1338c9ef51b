#[tokio::main]
async fn main() {
    if let Err(err) = sentryfrogg::mcp::server::run_stdio().await {
        eprintln!("sentryfrogg: {}", err);
        std::process::exit(1);
    }
}
