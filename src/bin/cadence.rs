/// Cadence CLI
///
/// Lowers JSON-serialized composed trees into state machines and runs them
/// against the simulation host.

use cadence_core::cli;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
