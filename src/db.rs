// src/db.rs

use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::{debug, info, warn};
use std::time::Duration;
use tokio_postgres::{Config, NoTls, Row as PgRow};

use crate::models::{Guest, GuestId, Vendor, VendorId};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Reads environment variables and constructs a PostgreSQL config.
fn build_pg_config() -> Config {
    let mut config = Config::new();
    let host = std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port_str = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
    let port = port_str.parse::<u16>().unwrap_or(5432);
    let dbname = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "guestservices".to_string());
    let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();

    info!(
        "DB Config: Host={}, Port={}, DB={}, User={}",
        host, port, dbname, user
    );
    config
        .host(&host)
        .port(port)
        .dbname(&dbname)
        .user(&user)
        .password(&password);
    config.application_name("legacy_reconciliation_engine");
    config.connect_timeout(Duration::from_secs(10));
    config
}

/// Initializes the database connection pool.
pub async fn connect() -> Result<PgPool> {
    let config = build_pg_config();
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(config, NoTls);

    let pool = Pool::builder()
        .max_size(20)
        .min_idle(Some(2))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    // Test connection
    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    info!("Database connection pool initialized successfully.");
    Ok(pool.clone())
}

/// Loads environment variables from a .env file.
pub fn load_env_from_file(file_path: &str) -> Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    info!(
        "Attempting to load environment variables from: {}",
        file_path
    );
    match File::open(file_path) {
        Ok(file) => {
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line.context("Failed to read line from env file")?;
                if line.starts_with('#') || line.trim().is_empty() {
                    continue;
                }
                if let Some(idx) = line.find('=') {
                    let key = line[..idx].trim();
                    let value = line[idx + 1..].trim().trim_matches('"');
                    if std::env::var(key).is_err() {
                        // Set only if not already set
                        std::env::set_var(key, value);
                        debug!(
                            "Set env var from file: {} = {}",
                            key,
                            if key == "POSTGRES_PASSWORD" {
                                "[hidden]"
                            } else {
                                value
                            }
                        );
                    }
                }
            }
            info!("Successfully processed env file: {}", file_path);
        }
        Err(e) => {
            warn!(
                "Could not open env file '{}': {}. Proceeding with system environment variables.",
                file_path, e
            );
            // .env file is optional.
        }
    }
    Ok(())
}

/// Column list every guest fetch in the engine shares, so row conversion
/// stays in one place.
pub const GUEST_COLUMNS: &str = "id, first_name, last_name, full_name, email, phone, \
     nationality, notes, legacy_ids, legacy_profiles, created_at, updated_at";

/// Converts a row selected with GUEST_COLUMNS into a Guest.
pub fn guest_from_row(row: &PgRow) -> Guest {
    let legacy_ids: Option<Vec<String>> = row.get("legacy_ids");
    let legacy_profiles: Option<serde_json::Value> = row.get("legacy_profiles");
    Guest {
        id: GuestId(row.get("id")),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        nationality: row.get("nationality"),
        notes: row.get("notes"),
        legacy_ids: legacy_ids.unwrap_or_default(),
        legacy_profiles: legacy_profiles.unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub const VENDOR_COLUMNS: &str = "id, name, category, color, email, phone, legacy_id, \
     active, legacy_profiles, created_at, updated_at";

/// Converts a row selected with VENDOR_COLUMNS into a Vendor.
pub fn vendor_from_row(row: &PgRow) -> Vendor {
    let legacy_profiles: Option<serde_json::Value> = row.get("legacy_profiles");
    Vendor {
        id: VendorId(row.get("id")),
        name: row.get("name"),
        category: row.get("category"),
        color: row.get("color"),
        email: row.get("email"),
        phone: row.get("phone"),
        legacy_id: row.get("legacy_id"),
        active: row.get("active"),
        legacy_profiles: legacy_profiles.unwrap_or_else(|| serde_json::Value::Array(Vec::new())),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
