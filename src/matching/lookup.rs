// src/matching/lookup.rs
//
// Bulk key lookup for one import batch. All candidate keys (legacy ids,
// names, emails, phones, date+vendor composites) are harvested from the
// batch first, then resolved with a fixed number of array-keyed queries, so
// DB round trips stay O(1) per key class instead of O(rows).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::db::PgPool;
use crate::models::{CanonicalRow, ImportDomain};

/// Lightweight reference to an existing entity, enough for the review table.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub id: String,
    pub label: String,
    /// Lowercased name used to decide whether a contact match is a conflict.
    pub normalized_name: Option<String>,
}

/// Composite natural key for dated bookings: date + legacy vendor id.
pub fn composite_key(date: NaiveDate, vendor_legacy_id: &str) -> String {
    format!("{}|{}", date.format("%Y-%m-%d"), vendor_legacy_id.trim())
}

pub fn normalize_name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Key→entity maps backing one batch's classification. Constructed from the
/// store with [`BatchLookup::load`]; tests build it directly from parts.
#[derive(Debug, Default)]
pub struct BatchLookup {
    pub by_legacy_id: HashMap<String, EntityRef>,
    pub by_natural_key: HashMap<String, EntityRef>,
    pub by_email: HashMap<String, EntityRef>,
    pub by_phone: HashMap<String, EntityRef>,
}

/// Candidate keys harvested from a batch before querying.
#[derive(Debug, Default)]
struct KeySets {
    legacy_ids: HashSet<String>,
    names: HashSet<String>,
    emails: HashSet<String>,
    phones: HashSet<String>,
    dates: HashSet<NaiveDate>,
}

fn harvest_keys(rows: &[CanonicalRow]) -> KeySets {
    let mut keys = KeySets::default();
    for row in rows {
        if let Some(id) = row.legacy_id() {
            keys.legacy_ids.insert(id.trim().to_string());
        }
        match row {
            CanonicalRow::Guest(r) => {
                if let Some(name) = &r.full_name {
                    keys.names.insert(normalize_name_key(name));
                }
                if let Some(email) = &r.email {
                    keys.emails.insert(email.trim().to_lowercase());
                }
                if let Some(phone) = &r.phone {
                    keys.phones.insert(phone.trim().to_string());
                }
            }
            CanonicalRow::Vendor(r) => {
                if let Some(name) = &r.name {
                    keys.names.insert(normalize_name_key(name));
                }
                if let Some(email) = &r.email {
                    keys.emails.insert(email.trim().to_lowercase());
                }
                if let Some(phone) = &r.phone {
                    keys.phones.insert(phone.trim().to_string());
                }
            }
            CanonicalRow::Transfer(r) => {
                if let Some(date) = r.transfer_date {
                    keys.dates.insert(date);
                }
            }
            CanonicalRow::TourBooking(r) => {
                if let Some(date) = r.activity_date {
                    keys.dates.insert(date);
                }
            }
            CanonicalRow::Reservation(r) => {
                if let Some(name) = &r.guest_name {
                    keys.names.insert(normalize_name_key(name));
                }
            }
        }
    }
    keys
}

impl BatchLookup {
    /// Loads every key map for the batch with a handful of bulk queries.
    pub async fn load(pool: &PgPool, domain: ImportDomain, rows: &[CanonicalRow]) -> Result<Self> {
        let start = Instant::now();
        let keys = harvest_keys(rows);
        let mut lookup = BatchLookup::default();

        let conn = pool
            .get()
            .await
            .context("Failed to get DB connection for batch lookup")?;

        match domain {
            ImportDomain::Guest => {
                let legacy_ids: Vec<String> = keys.legacy_ids.into_iter().collect();
                if !legacy_ids.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, full_name, email, phone, unnest(legacy_ids) AS legacy_id
                             FROM guests
                             WHERE legacy_ids && $1::text[]",
                            &[&legacy_ids],
                        )
                        .await
                        .context("Failed to bulk-query guests by legacy id")?;
                    for row in rows {
                        let entity = guest_ref(&row);
                        let legacy_id: String = row.get("legacy_id");
                        lookup.by_legacy_id.entry(legacy_id).or_insert(entity);
                    }
                }
                let names: Vec<String> = keys.names.into_iter().collect();
                if !names.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, full_name, email, phone
                             FROM guests
                             WHERE lower(full_name) = ANY($1)",
                            &[&names],
                        )
                        .await
                        .context("Failed to bulk-query guests by name")?;
                    for row in rows {
                        let entity = guest_ref(&row);
                        if let Some(key) = entity.normalized_name.clone() {
                            lookup.by_natural_key.entry(key).or_insert(entity);
                        }
                    }
                }
                let emails: Vec<String> = keys.emails.into_iter().collect();
                if !emails.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, full_name, email, phone
                             FROM guests
                             WHERE lower(email) = ANY($1)",
                            &[&emails],
                        )
                        .await
                        .context("Failed to bulk-query guests by email")?;
                    for row in rows {
                        let entity = guest_ref(&row);
                        let email: Option<String> = row.get("email");
                        if let Some(email) = email {
                            lookup
                                .by_email
                                .entry(email.trim().to_lowercase())
                                .or_insert(entity);
                        }
                    }
                }
                let phones: Vec<String> = keys.phones.into_iter().collect();
                if !phones.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, full_name, email, phone
                             FROM guests
                             WHERE phone = ANY($1)",
                            &[&phones],
                        )
                        .await
                        .context("Failed to bulk-query guests by phone")?;
                    for row in rows {
                        let entity = guest_ref(&row);
                        let phone: Option<String> = row.get("phone");
                        if let Some(phone) = phone {
                            lookup
                                .by_phone
                                .entry(phone.trim().to_string())
                                .or_insert(entity);
                        }
                    }
                }
            }
            ImportDomain::Vendor => {
                let legacy_ids: Vec<String> = keys.legacy_ids.into_iter().collect();
                if !legacy_ids.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, name, email, phone, legacy_id
                             FROM vendors
                             WHERE legacy_id = ANY($1)",
                            &[&legacy_ids],
                        )
                        .await
                        .context("Failed to bulk-query vendors by legacy id")?;
                    for row in rows {
                        let entity = vendor_ref(&row);
                        let legacy_id: Option<String> = row.get("legacy_id");
                        if let Some(legacy_id) = legacy_id {
                            lookup
                                .by_legacy_id
                                .entry(legacy_id.trim().to_string())
                                .or_insert(entity);
                        }
                    }
                }
                let names: Vec<String> = keys.names.into_iter().collect();
                if !names.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, name, email, phone, legacy_id
                             FROM vendors
                             WHERE lower(name) = ANY($1)",
                            &[&names],
                        )
                        .await
                        .context("Failed to bulk-query vendors by name")?;
                    for row in rows {
                        let entity = vendor_ref(&row);
                        if let Some(key) = entity.normalized_name.clone() {
                            lookup.by_natural_key.entry(key).or_insert(entity);
                        }
                    }
                }
                let emails: Vec<String> = keys.emails.into_iter().collect();
                if !emails.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, name, email, phone, legacy_id
                             FROM vendors
                             WHERE lower(email) = ANY($1)",
                            &[&emails],
                        )
                        .await
                        .context("Failed to bulk-query vendors by email")?;
                    for row in rows {
                        let entity = vendor_ref(&row);
                        let email: Option<String> = row.get("email");
                        if let Some(email) = email {
                            lookup
                                .by_email
                                .entry(email.trim().to_lowercase())
                                .or_insert(entity);
                        }
                    }
                }
                let phones: Vec<String> = keys.phones.into_iter().collect();
                if !phones.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT id, name, email, phone, legacy_id
                             FROM vendors
                             WHERE phone = ANY($1)",
                            &[&phones],
                        )
                        .await
                        .context("Failed to bulk-query vendors by phone")?;
                    for row in rows {
                        let entity = vendor_ref(&row);
                        let phone: Option<String> = row.get("phone");
                        if let Some(phone) = phone {
                            lookup
                                .by_phone
                                .entry(phone.trim().to_string())
                                .or_insert(entity);
                        }
                    }
                }
            }
            ImportDomain::Transfer => {
                lookup
                    .load_booking_keys(
                        &*conn,
                        "transfers",
                        "transfer_date",
                        keys.legacy_ids,
                        keys.dates,
                    )
                    .await?;
            }
            ImportDomain::TourBooking => {
                lookup
                    .load_booking_keys(
                        &*conn,
                        "tour_bookings",
                        "activity_date",
                        keys.legacy_ids,
                        keys.dates,
                    )
                    .await?;
            }
            ImportDomain::Reservation => {
                let legacy_ids: Vec<String> = keys.legacy_ids.into_iter().collect();
                if !legacy_ids.is_empty() {
                    let rows = conn
                        .query(
                            "SELECT r.id, r.legacy_id, r.arrival, g.full_name
                             FROM reservations r
                             LEFT JOIN guests g ON g.id = r.guest_id
                             WHERE r.legacy_id = ANY($1)",
                            &[&legacy_ids],
                        )
                        .await
                        .context("Failed to bulk-query reservations by legacy id")?;
                    for row in rows {
                        let id: String = row.get("id");
                        let legacy_id: Option<String> = row.get("legacy_id");
                        let full_name: Option<String> = row.get("full_name");
                        let entity = EntityRef {
                            label: full_name
                                .clone()
                                .unwrap_or_else(|| format!("Reservation {}", id)),
                            normalized_name: full_name.as_deref().map(normalize_name_key),
                            id,
                        };
                        if let Some(legacy_id) = legacy_id {
                            lookup
                                .by_legacy_id
                                .entry(legacy_id.trim().to_string())
                                .or_insert(entity);
                        }
                    }
                }
            }
        }

        info!(
            "Batch lookup for {} rows ({}) loaded in {:.2?}: {} legacy ids, {} natural keys, {} emails, {} phones",
            rows.len(),
            domain.as_str(),
            start.elapsed(),
            lookup.by_legacy_id.len(),
            lookup.by_natural_key.len(),
            lookup.by_email.len(),
            lookup.by_phone.len()
        );
        Ok(lookup)
    }

    /// Shared legacy-id + date|vendor composite loading for transfers and
    /// tour bookings.
    async fn load_booking_keys(
        &mut self,
        conn: &impl tokio_postgres::GenericClient,
        table: &str,
        date_column: &str,
        legacy_ids: HashSet<String>,
        dates: HashSet<NaiveDate>,
    ) -> Result<()> {
        let legacy_ids: Vec<String> = legacy_ids.into_iter().collect();
        if !legacy_ids.is_empty() {
            let sql = format!(
                "SELECT t.id, t.legacy_id, t.{date}, g.full_name
                 FROM {table} t
                 LEFT JOIN guests g ON g.id = t.guest_id
                 WHERE t.legacy_id = ANY($1)",
                date = date_column,
                table = table
            );
            let rows = conn
                .query(&sql, &[&legacy_ids])
                .await
                .with_context(|| format!("Failed to bulk-query {} by legacy id", table))?;
            for row in rows {
                let entity = booking_ref(&row, date_column);
                let legacy_id: Option<String> = row.get("legacy_id");
                if let Some(legacy_id) = legacy_id {
                    self.by_legacy_id
                        .entry(legacy_id.trim().to_string())
                        .or_insert(entity);
                }
            }
        }

        let dates: Vec<NaiveDate> = dates.into_iter().collect();
        if !dates.is_empty() {
            let sql = format!(
                "SELECT t.id, t.legacy_id, t.{date}, g.full_name, v.legacy_id AS vendor_legacy_id
                 FROM {table} t
                 LEFT JOIN guests g ON g.id = t.guest_id
                 LEFT JOIN vendors v ON v.id = t.vendor_id
                 WHERE t.{date} = ANY($1)",
                date = date_column,
                table = table
            );
            let rows = conn
                .query(&sql, &[&dates])
                .await
                .with_context(|| format!("Failed to bulk-query {} by date", table))?;
            for row in rows {
                let entity = booking_ref(&row, date_column);
                let date: Option<NaiveDate> = row.get(date_column);
                let vendor_legacy_id: Option<String> = row.get("vendor_legacy_id");
                if let (Some(date), Some(vendor_legacy_id)) = (date, vendor_legacy_id) {
                    self.by_natural_key
                        .entry(composite_key(date, &vendor_legacy_id))
                        .or_insert(entity);
                }
            }
        }
        debug!("Loaded booking keys for {}", table);
        Ok(())
    }
}

fn guest_ref(row: &tokio_postgres::Row) -> EntityRef {
    let id: String = row.get("id");
    let full_name: Option<String> = row.get("full_name");
    EntityRef {
        label: full_name.clone().unwrap_or_else(|| format!("Guest {}", id)),
        normalized_name: full_name.as_deref().map(normalize_name_key),
        id,
    }
}

fn vendor_ref(row: &tokio_postgres::Row) -> EntityRef {
    let id: String = row.get("id");
    let name: Option<String> = row.get("name");
    EntityRef {
        label: name.clone().unwrap_or_else(|| format!("Vendor {}", id)),
        normalized_name: name.as_deref().map(normalize_name_key),
        id,
    }
}

fn booking_ref(row: &tokio_postgres::Row, date_column: &str) -> EntityRef {
    let id: String = row.get("id");
    let full_name: Option<String> = row.get("full_name");
    let date: Option<NaiveDate> = row.get(date_column);
    let label = match (&full_name, date) {
        (Some(name), Some(date)) => format!("{} ({})", name, date),
        (Some(name), None) => name.clone(),
        (None, Some(date)) => format!("Booking on {}", date),
        (None, None) => format!("Booking {}", id),
    };
    EntityRef {
        label,
        normalized_name: full_name.as_deref().map(normalize_name_key),
        id,
    }
}
