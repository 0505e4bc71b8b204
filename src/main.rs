// src/main.rs
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::Path;
use std::time::Instant;

use reconcile_lib::{
    canonical, classify, cluster, db, models::ImportDomain, pms,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    info!("Starting legacy-data reconciliation engine");
    let start_time = Instant::now();

    // Try to load .env file if it exists
    let env_paths = [".env", ".env.local", "../.env"];
    let mut loaded_env = false;

    for path in env_paths.iter() {
        if Path::new(path).exists() {
            if let Err(e) = db::load_env_from_file(path) {
                warn!("Failed to load environment from {}: {}", path, e);
            } else {
                info!("Loaded environment variables from {}", path);
                loaded_env = true;
                break;
            }
        }
    }

    if !loaded_env {
        info!("No .env file found, using environment variables from system");
    }

    let pool = db::connect()
        .await
        .context("Failed to connect to database")?;
    info!("Successfully connected to the database");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("analyze") => {
            let (domain, file) = match (args.get(1), args.get(2)) {
                (Some(domain), Some(file)) => (domain, file),
                _ => bail!("Usage: reconcile analyze <domain> <file>"),
            };
            let domain = ImportDomain::from_str(domain)
                .with_context(|| format!("Unknown import domain: {}", domain))?;
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file))?;

            let records = canonical::parse_delimited(&content)?;
            let rows: Vec<_> = records
                .iter()
                .map(|rec| canonical::canonical_row(domain, rec))
                .collect();
            info!("Canonicalized {} rows from {}", rows.len(), file);

            let lookup = reconcile_lib::matching::BatchLookup::load(&pool, domain, &rows).await?;
            let tour_names = if domain == ImportDomain::TourBooking {
                let conn = pool.get().await.context("Failed to get DB connection")?;
                reconcile_lib::commit::load_tour_name_map(&conn).await?
            } else {
                classify::TourNameMap::new()
            };

            let result = classify::analyze_rows(domain, rows, &lookup, &tour_names);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some("duplicates") => {
            let clusters = cluster::find_duplicate_guests(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&clusters)?);
        }
        Some("orphans") => {
            let orphans = cluster::find_orphan_reservations(&pool).await?;
            println!("{}", serde_json::to_string_pretty(&orphans)?);
        }
        Some("pms") => {
            let Some(file) = args.get(1) else {
                bail!("Usage: reconcile pms <file>");
            };
            let xml = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file))?;
            let feed = pms::parse_pms_feed(&xml)?;
            info!("Parsed {} reservations from PMS feed", feed.len());
            let result = pms::import_pms_feed(&pool, &feed).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            bail!("Usage: reconcile <analyze <domain> <file> | duplicates | orphans | pms <file>>");
        }
    }

    info!("Done in {:.2?}", start_time.elapsed());
    Ok(())
}
