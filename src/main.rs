use std::env;

use chrono::Utc;
use dotenv::dotenv;
use log::{error, info, warn};

use token_buyer_analyzer::{Analyzer, AnalyzerConfig, FetchRequest};

const DEFAULT_LIMIT: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    let request = parse_args()?;
    let config = AnalyzerConfig::load_from_env()?;
    info!("Loaded configuration: {:?}", config);

    let analyzer = Analyzer::from_config(&config)?;

    match analyzer.token_info(&request.token).await {
        Ok(Some(token)) => info!(
            "{} ({}): price {:?}, 24h volume {:?}",
            token.name.as_deref().unwrap_or("unknown"),
            token.symbol.as_deref().unwrap_or("?"),
            token.price,
            token.volume_24h
        ),
        Ok(None) => {}
        Err(e) => warn!("Token info unavailable: {}", e),
    }

    info!(
        "Analyzing {} (limit {}, {:?} to {:?})",
        request.token, request.limit, request.time_range.start, request.time_range.end
    );
    let result = match analyzer.fetch_and_classify(&request).await {
        Ok(result) => result,
        Err(e) => {
            error!("Analysis failed: {}", e);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_args() -> Result<FetchRequest, Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let token = args
        .next()
        .ok_or("usage: token-buyer-analyzer <token-mint> [limit]")?;
    let limit = match args.next() {
        Some(raw) => raw.parse::<usize>()?,
        None => DEFAULT_LIMIT,
    };
    Ok(FetchRequest::new(token, limit).with_default_window(Utc::now()))
}
