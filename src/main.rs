//! image-courier command line entry point

use image_courier::cli::{AppConfig, Args, Runner};
use image_courier::cli::runner::EXIT_FATAL;

#[tokio::main]
async fn main() {
    let args = Args::parse_args();
    let config = AppConfig::from_args(&args).with_env();

    if let Err(e) = config.validate() {
        eprintln!("❌ {}", e);
        std::process::exit(EXIT_FATAL);
    }

    let code = Runner::new(config).run().await;
    std::process::exit(code);
}
