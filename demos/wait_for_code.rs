//! Example: Waiting for a verification code with tracing enabled.
//!
//! Every step of the wait emits tracing spans and events; this example prints
//! them with `tracing-subscriber`.
//!
//! # Usage
//!
//! ```bash
//! export EMAIL_ADDRESS="your@gmail.com"
//! export EMAIL_APP_PASSWORD="your-app-password"
//! export CODE_SENDER="no-reply@service.example"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=mailcode=debug
//!
//! cargo run --example wait_for_code
//! ```
//!
//! The variables can also be placed in a `.env` file.

use mailcode::{wait_for_code, WaitConfig};
use std::env;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mailcode::Result<()> {
    dotenvy::dotenv().ok();

    // Example: RUST_LOG=mailcode=debug,info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailcode=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let email = env::var("EMAIL_ADDRESS").expect("EMAIL_ADDRESS environment variable required");
    let password =
        env::var("EMAIL_APP_PASSWORD").expect("EMAIL_APP_PASSWORD environment variable required");
    let sender = env::var("CODE_SENDER").expect("CODE_SENDER environment variable required");

    tracing::info!(email = %email, sender = %sender, "Waiting for a verification code");

    let config = WaitConfig::builder()
        .email(&email)
        .app_password(password)
        .from_email(sender)
        .poll_interval(Duration::from_secs(3))
        .timeout(Duration::from_secs(120))
        .build()?;

    match wait_for_code(config).await {
        Ok(code) => {
            tracing::info!("Verification code received");
            println!("\nCode: {code}");
        }
        Err(e) => {
            tracing::warn!(error = %e, category = %e.category(), "No code received");
            println!("\nNo code: {e}");
        }
    }

    Ok(())
}
