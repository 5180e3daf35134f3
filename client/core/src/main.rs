//! Pre-bid Blocking - Host Entry Point
//!
//! Issues one block status request and prints the outcome.
//!
//! Usage: `prebid-blocking [default|always-block|never-block]`

use prebid_blocking::{
    init_tracing, set_log_level, AppContext, BlockStatus, BlockingMode, BlockingSettings, DecisionEngine,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "/etc/prebid-blocking/settings.json".into());

    let settings = match BlockingSettings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Settings not loaded from {config_path} ({e}), using defaults");
            BlockingSettings::default()
        }
    };

    set_log_level(settings.log_level);
    init_tracing(settings.log_level);
    tracing::info!("Pre-bid Blocking v{}", env!("CARGO_PKG_VERSION"));

    let mode = match std::env::args().nth(1).as_deref() {
        None | Some("default") => BlockingMode::Default,
        Some("always-block") => BlockingMode::AlwaysBlock,
        Some("never-block") => BlockingMode::NeverBlock,
        Some(other) => return Err(format!("unknown blocking mode: {other}").into()),
    };

    let mut context = AppContext::new(env!("CARGO_PKG_NAME"));
    if let Ok(user_agent) = std::env::var("USER_AGENT") {
        context = context.with_property(prebid_blocking::platform::USER_AGENT_PROPERTY, user_agent);
    }
    let context = Arc::new(context);

    let engine = DecisionEngine::new();
    engine.initialize(&context, settings.into_builder().build()?)?;

    match engine.request_block_status(mode).await?.await {
        BlockStatus::Block => println!("block"),
        BlockStatus::Allow => println!("allow"),
        BlockStatus::Error { code, message } => {
            println!("error {code}: {message}");
            std::process::exit(1);
        }
    }

    Ok(())
}
