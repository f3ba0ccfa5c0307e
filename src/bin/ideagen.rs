//! Terminal client for the business idea generator.
//!
//! Resolves the signed-in account's entitlement and either streams a freshly generated business
//! idea, rendered as markdown, or shows the pricing table.
//!
//! # Usage
//!
//! ```bash
//! # Stream from the default endpoint with the token in $IDEAGEN_TOKEN
//! ideagen --claims
//!
//! # Read settings from a file and the token from a file refreshed by another process
//! ideagen --config ideagen.yaml --token-file ~/.config/ideagen/session
//!
//! # Disable colors (useful for piping output)
//! ideagen --claims --no-color > idea.md
//! ```
//!
//! Exits 0 once the idea has streamed completely or the pricing table was shown, and 1 when
//! authentication is required, the connection failed, or the configuration is invalid.  Logs go
//! to stderr and are controlled by `RUST_LOG` (default `ideagen=warn`).

use std::process::ExitCode;
use std::sync::Arc;

use arrrg::CommandLine;
use tracing_subscriber::EnvFilter;

use ideagen::{
    ClaimsEntitlements, EnvToken, Entitlements, FileToken, HttpTransport, IdeaArgs, IdeaConfig,
    IdeaStream, Outcome, Page, PageView, PlainTextRenderer, Renderer, StaticEntitlements,
    StaticToken, TokenSetting, TokenSource,
};

/// Main entry point for the ideagen application.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ideagen=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, free) = IdeaArgs::from_command_line_relaxed("ideagen [OPTIONS]");
    if !free.is_empty() {
        tracing::warn!(?free, "ignoring positional arguments");
    }
    let config = match IdeaConfig::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ideagen: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut renderer = PlainTextRenderer::with_color(config.use_color);

    let tokens = token_source(&config);
    let entitlements: Arc<dyn Entitlements> = if config.claims {
        Arc::new(ClaimsEntitlements::new(Arc::clone(&tokens)))
    } else {
        Arc::new(StaticEntitlements::new(
            config.account.clone(),
            config.plans.clone(),
        ))
    };

    let page = Page::from_config(entitlements, &config);
    let resolved = match page.resolve().await {
        Ok(resolved) => resolved,
        Err(err) => {
            renderer.print_error(&format!("Failed to check subscription: {err}"));
            return ExitCode::FAILURE;
        }
    };
    renderer.print_account(resolved.account.as_ref());

    match resolved.view {
        PageView::Pricing(tiers) => {
            renderer.print_pricing(&tiers);
            ExitCode::SUCCESS
        }
        PageView::Generator => generate(&config, tokens, &mut renderer).await,
    }
}

fn token_source(config: &IdeaConfig) -> Arc<dyn TokenSource> {
    match config.token_setting() {
        TokenSetting::Static(token) => Arc::new(StaticToken::new(token)),
        TokenSetting::File(path) => Arc::new(FileToken::new(path)),
        TokenSetting::Env(var) => Arc::new(EnvToken::new(var)),
    }
}

async fn generate(
    config: &IdeaConfig,
    tokens: Arc<dyn TokenSource>,
    renderer: &mut PlainTextRenderer,
) -> ExitCode {
    let transport = match HttpTransport::with_options(&config.endpoint, config.connect_timeout()) {
        Ok(transport) => transport,
        Err(err) => {
            renderer.print_error(&err.to_string());
            return ExitCode::FAILURE;
        }
    };

    renderer.start_generator();
    let stream = IdeaStream::mount(Arc::new(transport), tokens, config.reconnect_policy());

    // Ctrl+C unmounts the stream and leaves the last view on screen.
    let abort = stream.abort_handle();
    if let Err(err) = ctrlc::set_handler(move || abort.cancel()) {
        tracing::warn!(%err, "could not install Ctrl+C handler");
    }

    let mut views = stream.view();
    let first = views.borrow_and_update().clone();
    renderer.print_view(&first);
    let outcome = loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break stream.wait_settled().await;
                }
                let view = views.borrow_and_update().clone();
                renderer.print_view(&view);
            }
            outcome = stream.wait_settled() => break outcome,
        }
    };
    renderer.print_view(&stream.current_view());
    renderer.finish();
    stream.unmount().await;

    match outcome {
        Outcome::Closed | Outcome::Unmounted => ExitCode::SUCCESS,
        Outcome::AuthenticationRequired | Outcome::ConnectionFailed => ExitCode::FAILURE,
    }
}
