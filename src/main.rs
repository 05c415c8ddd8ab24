//! NTRIP Caster - relays GNSS correction streams over HTTP.
//!
//! This binary starts the listeners and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ntrip_caster::{
    config::{AuthMode, Cli, Command, ServeConfig, SignConfig, SignOutputFormat},
    Caster, ListenError, RouterConfig, SignedUrlAuth,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Sign(config) => run_sign(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let authorizer = match config.build_authorizer() {
        Ok(authorizer) => authorizer,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("NTRIP caster v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Timeout: {}s", config.timeout);
    info!("  Conduit capacity: {} chunks", config.conduit_capacity);
    match config.auth {
        AuthMode::None => {
            warn!("  Auth: DISABLED - anyone can publish and subscribe");
            warn!("        Enable for production: --auth basic or --auth signed");
        }
        AuthMode::Basic => info!("  Auth: basic ({} user(s))", config.users.len()),
        AuthMode::Signed => info!("  Auth: signed URLs"),
    }

    let caster = Arc::new(
        Caster::new(authorizer, config.timeout()).with_conduit_capacity(config.conduit_capacity),
    );
    let router_config = RouterConfig::new().with_tracing(!config.no_tracing);

    let addr = config.bind_address();
    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Caster listening on: http://{}", addr);
    if let Some(tls_addr) = config.tls_bind_address() {
        info!("  TLS listening on:    https://{}", tls_addr);
    }
    info!("");
    info!("  Publish a stream:");
    info!("    curl -T- -H 'Transfer-Encoding: chunked' http://{}/MOUNT", addr);
    info!("  Receive a stream:");
    info!("    curl -N http://{}/MOUNT", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let http = Arc::clone(&caster).listen_http(addr, router_config.clone());
    let https = async {
        match (config.tls_bind_address(), &config.tls_cert, &config.tls_key) {
            (Some(tls_addr), Some(cert), Some(key)) => {
                Arc::clone(&caster)
                    .listen_https(tls_addr, cert, key, router_config.clone())
                    .await
            }
            _ => std::future::pending::<Result<(), ListenError>>().await,
        }
    };

    let result = tokio::select! {
        result = http => result,
        result = https => result,
        _ = shutdown_signal() => {
            info!("Shutting down");
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Listener failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "ntrip_caster=debug,tower_http=debug"
    } else {
        "ntrip_caster=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Sign Command
// =============================================================================

fn run_sign(config: SignConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let params = match config.parse_params() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let auth = SignedUrlAuth::new(&config.secret);
    let ttl = Duration::from_secs(config.ttl);

    let params_ref: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let (signature, expiry) = auth.sign_with_params(&config.path, ttl, &params_ref);
    let signed = auth.signed_url_with_expiry(
        config.base_url.as_deref().unwrap_or(""),
        &config.path,
        expiry,
        &params_ref,
    );
    let url = config.base_url.as_ref().map(|_| signed.clone());

    match config.format {
        SignOutputFormat::Signature => {
            println!("{}", signature);
        }
        SignOutputFormat::Json => {
            let json = serde_json::json!({
                "signature": signature,
                "expiry": expiry,
                "path": config.path,
                "ttl": config.ttl,
                "url": url,
            });
            match serde_json::to_string_pretty(&json) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        SignOutputFormat::Url => match url {
            Some(url) => println!("{}", url),
            None => {
                println!("{}", signed);
                eprintln!();
                eprintln!("Tip: Use --base-url to generate a complete URL");
            }
        },
    }

    ExitCode::SUCCESS
}
