//! Visual novel player.
//!
//! A line-oriented interface for playing with an AI narrator, suitable for
//! terminals, scripts and automated testing:
//!
//! ```bash
//! cargo run -p novel -- --name "Alex" --save-dir saves
//! ```

mod headless;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Check for API key
    if !api_key_configured(|var| std::env::var(var).ok()) {
        eprintln!("Error: GEMINI_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export GEMINI_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let options = headless::parse_options_from_args(&args);
    headless::run_headless(options).await.map_err(|e| e.into())
}

/// Whether a usable (non-blank) API key is set.
fn api_key_configured(lookup: impl Fn(&str) -> Option<String>) -> bool {
    gemini::api_key_from(lookup).is_some()
}

fn print_help() {
    println!("novel - visual novel with an AI narrator");
    println!();
    println!("Usage: novel [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --name <name>      Player name (default: Player)");
    println!("  --model <model>    Narrator model");
    println!("  --save-dir <dir>   Directory for the save slot (default: .)");
    println!("  --load             Resume from the save slot if present");
    println!("  -h, --help         Show this help");
    println!();
    println!("Environment:");
    println!("  GEMINI_API_KEY     API key (API_KEY is also accepted)");
    println!("  RUST_LOG           Log filter, logs go to stderr (default: warn)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_not_configured() {
        let blank = |var: &str| (var == "GEMINI_API_KEY").then(|| "  ".to_string());
        assert!(!api_key_configured(blank));

        let fallback = |var: &str| (var == "API_KEY").then(|| "secret".to_string());
        assert!(api_key_configured(fallback));
    }
}
