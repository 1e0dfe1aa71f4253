use std::sync::Arc;

use clap::Subcommand;
use outdial_core::{
    Config, ConnectionState, ConnectionTracker, HandshakeCoordinator, HandshakeOutcome,
    HttpBackend, KeyringCache, LinkCache, LoopbackSurface,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Link the Microsoft account (runs the full OAuth handshake)
    Connect,
    /// Remove the link and clear cached state
    Disconnect,
    /// Show cached and live connection status
    Status,
}

pub async fn run(action: AuthAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let user_id = super::require_user_id(&config)?;

    let backend = Arc::new(HttpBackend::new(config.api.base_url.clone()));
    let cache = LinkCache::new(Arc::new(KeyringCache::new()));
    let tracker = ConnectionTracker::new(backend.clone(), cache.clone(), user_id.clone());

    match action {
        AuthAction::Connect => {
            let surface = Arc::new(LoopbackSurface::new(config.link.callback_port));
            let coordinator = HandshakeCoordinator::new(
                backend,
                cache,
                surface,
                user_id,
                config.link.clone(),
            );
            println!("Opening the Microsoft sign-in page in your browser...");
            match coordinator.connect_or_refresh(&tracker).await? {
                HandshakeOutcome::Completed { last_refreshed_at } => {
                    println!(
                        "Microsoft account connected (refreshed {})",
                        last_refreshed_at.format("%Y-%m-%d %H:%M UTC")
                    );
                }
                HandshakeOutcome::Superseded => {
                    println!("connection attempt superseded by a newer one");
                }
            }
        }
        AuthAction::Disconnect => {
            if tracker.disconnect().await? {
                println!("Microsoft account disconnected");
            } else {
                println!("backend reported failure; local state cleared anyway");
            }
        }
        AuthAction::Status => {
            match tracker.current_status() {
                ConnectionState::Connected { last_refreshed_at } => {
                    match last_refreshed_at {
                        Some(at) => println!(
                            "cached: connected (last refresh {})",
                            at.format("%Y-%m-%d %H:%M UTC")
                        ),
                        None => println!("cached: connected"),
                    }
                }
                ConnectionState::Expired => println!("cached: expired, reconnect needed"),
                ConnectionState::Disconnected => println!("cached: not connected"),
            }
            let live = tracker.is_token_valid().await;
            println!(
                "backend: {}",
                if live { "token valid" } else { "no valid token" }
            );
        }
    }
    Ok(())
}
