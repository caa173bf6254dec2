//! warehouse-removal - ShipHero command-line client
//!
//! Thin caller over the library: token management, warehouse and
//! inventory listings, resumable bulk imports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warehouse_removal::config::Settings;
use warehouse_removal::models::Product;
use warehouse_removal::Session;

#[derive(Parser)]
#[command(name = "warehouse-removal")]
#[command(about = "ShipHero client for warehouse removals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a ShipHero refresh token and exchange it for an access token
    Login {
        /// Refresh token from the ShipHero developer settings
        refresh_token: String,
    },

    /// Clear stored tokens
    Logout,

    /// Show current token status
    Status,

    /// List account warehouses
    Warehouses {
        /// Bypass the cache
        #[arg(short, long)]
        refresh: bool,
    },

    /// List inventory, one row per product and warehouse
    Inventory {
        /// Only rows for this warehouse id
        #[arg(short, long)]
        warehouse: Option<String>,

        /// Only active products
        #[arg(short, long)]
        active: bool,

        /// Bypass the cache
        #[arg(short, long)]
        refresh: bool,
    },

    /// Walk the full product catalog, pacing requests against the credit budget
    Import {
        /// Resume after this cursor (printed by an earlier partial import)
        #[arg(long)]
        after: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = Settings::load()?;
    let mut session = Session::open(settings)?;

    match cli.command {
        Commands::Login { refresh_token } => {
            tracing::info!("Exchanging refresh token...");
            let record = session
                .tokens()
                .login(refresh_token.trim())
                .await
                .context("Login failed")?;
            println!("Logged in. Access token expires at {}", record.expires_at);
        }
        Commands::Logout => {
            session.logout()?;
            println!("Logged out.");
        }
        Commands::Status => {
            print_status(&session);
        }
        Commands::Warehouses { refresh } => {
            session.start_renewal();
            let warehouses = session.data().warehouses(refresh).await?;
            for w in &warehouses {
                println!(
                    "{:<28} {:<8} {}",
                    w.id,
                    w.identifier.as_deref().unwrap_or("-"),
                    w.display_name()
                );
            }
            println!("{} warehouses", warehouses.len());
        }
        Commands::Inventory {
            warehouse,
            active,
            refresh,
        } => {
            session.start_renewal();
            let mut inventory = match warehouse {
                Some(id) => session.data().inventory_by_warehouse(&id, refresh).await?,
                None => session.data().inventory(refresh).await?,
            };
            if active {
                inventory.rows.retain(|p| p.active);
            }
            print_inventory(&inventory.rows);
            if !inventory.complete {
                if let Some(reason) = &inventory.stop_reason {
                    println!("Inventory is partial: {}", reason);
                }
                if let Some(cursor) = &inventory.next_cursor {
                    println!("Continue with: warehouse-removal import --after {}", cursor);
                }
            }
        }
        Commands::Import { after } => {
            session.start_renewal();
            let fetch = session.data().import_products(after).await?;
            print_inventory(&fetch.items);
            println!("{} pages fetched", fetch.pages_fetched);
            if !fetch.complete {
                if let Some(reason) = &fetch.stop_reason {
                    println!("Import stopped early: {}", reason);
                }
                if let Some(cursor) = &fetch.next_cursor {
                    println!("Resume with: warehouse-removal import --after {}", cursor);
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn print_status(session: &Session) {
    let status = session.tokens().status();
    if status.has_refresh_token {
        println!("Refresh tok: present");
    } else {
        println!("Refresh tok: none");
    }
    match (status.has_access_token, status.usable) {
        (true, true) => println!("Access tok:  valid"),
        (true, false) => println!("Access tok:  expiring"),
        (false, _) => println!("Access tok:  none"),
    }
    if let Some(expires_at) = status.expires_at {
        println!("  expires_at: {}", expires_at);
    }
    if status.renewal_due {
        println!("  renewal due");
    }
}

fn print_inventory(rows: &[Product]) {
    for p in rows {
        println!(
            "{:<20} {:>6} {:>6} {:>6}  {:<24} {}",
            p.sku,
            p.inventory.available,
            p.inventory.on_hand,
            p.inventory.allocated,
            p.inventory.warehouse_name,
            p.name
        );
    }
    println!("{} rows", rows.len());
}
