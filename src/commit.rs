// src/commit.rs
//
// Batch Commit Executor: writes approved import rows to the store. Rows run
// strictly in file order, each inside its own transaction, so one bad row
// never takes down the batch and later rows see earlier rows' effects.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::HashMap;
use std::time::Instant;
use tokio_postgres::Transaction;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{
    CanonicalRow, Guest, GuestRow, ImportAction, ImportDomain, ImportRow, ReservationRow,
    TourBookingRow, TourProductId, TransferRow, Vendor, VendorId, VendorRow,
};
use crate::results::{CommitOutcome, RowError};

//------------------------------------------------------------------------------
// ROLES AND FIELD ALLOW-LISTS
//------------------------------------------------------------------------------

/// Caller roles the commit path distinguishes. Authentication happens
/// upstream; this layer only scopes which fields a commit may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitRole {
    Admin,
    Staff,
}

/// Declarative per-role field allow-list. Updates never touch a field absent
/// from this list, and an empty list means the role cannot commit the domain
/// at all. Checked before any row is processed, never mid-batch.
pub fn allowed_fields(role: CommitRole, domain: ImportDomain) -> &'static [&'static str] {
    match (role, domain) {
        (CommitRole::Admin, ImportDomain::Guest) => &[
            "first_name",
            "last_name",
            "full_name",
            "email",
            "phone",
            "nationality",
            "notes",
        ],
        (CommitRole::Admin, ImportDomain::Vendor) => &["name", "category", "email", "phone"],
        (CommitRole::Admin, ImportDomain::Transfer) => &[
            "transfer_date",
            "pickup",
            "dropoff",
            "num_guests",
            "price",
            "status",
            "notes",
        ],
        (CommitRole::Admin, ImportDomain::TourBooking) => &[
            "activity_date",
            "num_guests",
            "price",
            "status",
            "notes",
        ],
        (CommitRole::Admin, ImportDomain::Reservation) => &[
            "arrival",
            "departure",
            "room",
            "status",
            "notes",
        ],
        (CommitRole::Staff, ImportDomain::Guest) => &["email", "phone", "notes"],
        // Vendor records are admin-managed.
        (CommitRole::Staff, ImportDomain::Vendor) => &[],
        (CommitRole::Staff, ImportDomain::Transfer) => &["status", "notes"],
        (CommitRole::Staff, ImportDomain::TourBooking) => &["status", "notes"],
        (CommitRole::Staff, ImportDomain::Reservation) => &["status", "notes"],
    }
}

/// A row commits only when approved as CREATE, UPDATE, or INVALID_DATE with a
/// human-corrected date.
pub fn is_eligible(row: &ImportRow) -> bool {
    match row.action {
        ImportAction::Create | ImportAction::Update => true,
        ImportAction::InvalidDate => row.user_date.is_some(),
        ImportAction::Skip | ImportAction::Conflict => false,
    }
}

/// Stable reference for error reports: the legacy id when present, else the
/// 1-based row number.
pub fn row_ref(row: &ImportRow) -> String {
    match row.csv.legacy_id() {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => format!("row {}", row.row_number),
    }
}

//------------------------------------------------------------------------------
// FIELD DIFFS
//------------------------------------------------------------------------------

/// One audited field change: (field name, old value, new value).
pub type FieldChange = (&'static str, Option<String>, Option<String>);

fn guest_field<'a>(guest: &'a Guest, field: &str) -> Option<&'a Option<String>> {
    match field {
        "first_name" => Some(&guest.first_name),
        "last_name" => Some(&guest.last_name),
        "full_name" => Some(&guest.full_name),
        "email" => Some(&guest.email),
        "phone" => Some(&guest.phone),
        "nationality" => Some(&guest.nationality),
        "notes" => Some(&guest.notes),
        _ => None,
    }
}

fn guest_row_field<'a>(row: &'a GuestRow, field: &str) -> Option<&'a Option<String>> {
    match field {
        "first_name" => Some(&row.first_name),
        "last_name" => Some(&row.last_name),
        "full_name" => Some(&row.full_name),
        "email" => Some(&row.email),
        "phone" => Some(&row.phone),
        "nationality" => Some(&row.nationality),
        "notes" => Some(&row.notes),
        _ => None,
    }
}

/// Allow-listed fields where the incoming row carries a value different from
/// the stored one. Incoming blanks never erase stored data.
pub fn guest_changes(current: &Guest, incoming: &GuestRow, allowed: &[&'static str]) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for field in allowed {
        let (Some(old), Some(new)) = (guest_field(current, field), guest_row_field(incoming, field))
        else {
            continue;
        };
        if let Some(new_value) = new {
            if old.as_deref() != Some(new_value.as_str()) {
                changes.push((*field, old.clone(), Some(new_value.clone())));
            }
        }
    }
    changes
}

fn vendor_field<'a>(vendor: &'a Vendor, field: &str) -> Option<&'a Option<String>> {
    match field {
        "name" => Some(&vendor.name),
        "category" => Some(&vendor.category),
        "email" => Some(&vendor.email),
        "phone" => Some(&vendor.phone),
        _ => None,
    }
}

fn vendor_row_field<'a>(row: &'a VendorRow, field: &str) -> Option<&'a Option<String>> {
    match field {
        "name" => Some(&row.name),
        "category" => Some(&row.category),
        "email" => Some(&row.email),
        "phone" => Some(&row.phone),
        _ => None,
    }
}

pub fn vendor_changes(
    current: &Vendor,
    incoming: &VendorRow,
    allowed: &[&'static str],
) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    for field in allowed {
        let (Some(old), Some(new)) =
            (vendor_field(current, field), vendor_row_field(incoming, field))
        else {
            continue;
        };
        if let Some(new_value) = new {
            if old.as_deref() != Some(new_value.as_str()) {
                changes.push((*field, old.clone(), Some(new_value.clone())));
            }
        }
    }
    changes
}

//------------------------------------------------------------------------------
// BATCH COMMIT
//------------------------------------------------------------------------------

enum RowResult {
    Created,
    Updated,
    Skipped,
}

/// Commits a batch of reviewed rows. Rows run sequentially in their own
/// transactions; failures land in the error list and the batch continues.
pub async fn commit_rows(
    pool: &PgPool,
    domain: ImportDomain,
    rows: &[ImportRow],
    role: CommitRole,
) -> Result<CommitOutcome> {
    let allowed = allowed_fields(role, domain);
    if allowed.is_empty() {
        bail!(
            "Role {:?} is not permitted to commit {} records",
            role,
            domain.as_str()
        );
    }

    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for batch commit")?;

    // Tour bookings resolve activity names through the persisted mappings.
    let product_map = if domain == ImportDomain::TourBooking {
        load_tour_name_map(&conn).await?
    } else {
        HashMap::new()
    };

    let mut outcome = CommitOutcome::default();
    for row in rows {
        if !is_eligible(row) {
            outcome.skipped += 1;
            continue;
        }
        let tx = conn
            .transaction()
            .await
            .context("Failed to open row transaction")?;
        let result = commit_one(&tx, domain, row, allowed, &product_map).await;
        match result {
            Ok(action) => {
                if let Err(e) = tx.commit().await {
                    warn!("Row {} failed at commit: {}", row_ref(row), e);
                    outcome.errors.push(RowError {
                        row_ref: row_ref(row),
                        message: format!("commit failed: {}", e),
                    });
                    continue;
                }
                match action {
                    RowResult::Created => outcome.created += 1,
                    RowResult::Updated => outcome.updated += 1,
                    RowResult::Skipped => outcome.skipped += 1,
                }
            }
            Err(e) => {
                // Dropping the transaction rolls this row back.
                drop(tx);
                warn!("Row {} failed: {:#}", row_ref(row), e);
                outcome.errors.push(RowError {
                    row_ref: row_ref(row),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        "Committed {} batch: {} created, {} updated, {} skipped, {} errors in {:.2?}",
        domain.as_str(),
        outcome.created,
        outcome.updated,
        outcome.skipped,
        outcome.errors.len(),
        start.elapsed()
    );
    Ok(outcome)
}

async fn commit_one(
    tx: &Transaction<'_>,
    domain: ImportDomain,
    row: &ImportRow,
    allowed: &[&'static str],
    product_map: &HashMap<String, String>,
) -> Result<RowResult> {
    match (&row.csv, domain) {
        (CanonicalRow::Guest(r), ImportDomain::Guest) => commit_guest(tx, row, r, allowed).await,
        (CanonicalRow::Vendor(r), ImportDomain::Vendor) => commit_vendor(tx, row, r, allowed).await,
        (CanonicalRow::Transfer(r), ImportDomain::Transfer) => {
            commit_transfer(tx, row, r, allowed).await
        }
        (CanonicalRow::TourBooking(r), ImportDomain::TourBooking) => {
            commit_tour_booking(tx, row, r, allowed, product_map).await
        }
        (CanonicalRow::Reservation(r), ImportDomain::Reservation) => {
            commit_reservation(tx, row, r, allowed).await
        }
        _ => bail!("Row domain does not match batch domain {}", domain.as_str()),
    }
}

async fn commit_guest(
    tx: &Transaction<'_>,
    row: &ImportRow,
    r: &GuestRow,
    allowed: &[&'static str],
) -> Result<RowResult> {
    match existing_id(row) {
        Some(guest_id) => {
            let sql = format!(
                "SELECT {} FROM guests WHERE id = $1 FOR UPDATE",
                crate::db::GUEST_COLUMNS
            );
            let current_row = tx
                .query_opt(&sql, &[&guest_id])
                .await
                .context("Failed to load guest for update")?
                .ok_or_else(|| anyhow!("Matched guest {} no longer exists", guest_id))?;
            let current = crate::db::guest_from_row(&current_row);

            // A re-import of the same export may carry a legacy id the guest
            // does not know yet.
            if let Some(legacy_id) = r.legacy_id.as_deref() {
                if !current.legacy_ids.iter().any(|id| id == legacy_id) {
                    tx.execute(
                        "UPDATE guests SET legacy_ids = array_append(legacy_ids, $1),
                         updated_at = NOW() WHERE id = $2",
                        &[&legacy_id, &guest_id],
                    )
                    .await
                    .context("Failed to append guest legacy id")?;
                }
            }

            let changes = guest_changes(&current, r, allowed);
            if changes.is_empty() {
                return Ok(RowResult::Skipped);
            }
            for (field, old, new) in &changes {
                let sql = format!("UPDATE guests SET {} = $1, updated_at = NOW() WHERE id = $2", field);
                tx.execute(&sql, &[new, &guest_id])
                    .await
                    .with_context(|| format!("Failed to update guest field {}", field))?;
                record_field_change(tx, &guest_id, field, old.as_deref(), new.as_deref()).await?;
            }
            Ok(RowResult::Updated)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            let legacy_ids: Vec<String> = r.legacy_id.iter().map(|s| s.trim().to_string()).collect();
            tx.execute(
                "INSERT INTO guests (id, first_name, last_name, full_name, email, phone,
                    nationality, notes, legacy_ids, legacy_profiles, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '[]'::jsonb, NOW(), NOW())",
                &[
                    &id,
                    &r.first_name,
                    &r.last_name,
                    &r.full_name,
                    &r.email,
                    &r.phone,
                    &r.nationality,
                    &r.notes,
                    &legacy_ids,
                ],
            )
            .await
            .context("Failed to insert guest")?;
            Ok(RowResult::Created)
        }
    }
}

async fn commit_vendor(
    tx: &Transaction<'_>,
    row: &ImportRow,
    r: &VendorRow,
    allowed: &[&'static str],
) -> Result<RowResult> {
    match existing_id(row) {
        Some(vendor_id) => {
            let sql = format!(
                "SELECT {} FROM vendors WHERE id = $1 FOR UPDATE",
                crate::db::VENDOR_COLUMNS
            );
            let current_row = tx
                .query_opt(&sql, &[&vendor_id])
                .await
                .context("Failed to load vendor for update")?
                .ok_or_else(|| anyhow!("Matched vendor {} no longer exists", vendor_id))?;
            let current = crate::db::vendor_from_row(&current_row);

            if current.legacy_id.is_none() {
                if let Some(legacy_id) = r.legacy_id.as_deref() {
                    tx.execute(
                        "UPDATE vendors SET legacy_id = $1, updated_at = NOW() WHERE id = $2",
                        &[&legacy_id, &vendor_id],
                    )
                    .await
                    .context("Failed to set vendor legacy id")?;
                }
            }

            let changes = vendor_changes(&current, r, allowed);
            if changes.is_empty() {
                return Ok(RowResult::Skipped);
            }
            for (field, _, new) in &changes {
                let sql = format!("UPDATE vendors SET {} = $1, updated_at = NOW() WHERE id = $2", field);
                tx.execute(&sql, &[new, &vendor_id])
                    .await
                    .with_context(|| format!("Failed to update vendor field {}", field))?;
            }
            Ok(RowResult::Updated)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO vendors (id, name, category, email, phone, legacy_id, active,
                    legacy_profiles, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, TRUE, '[]'::jsonb, NOW(), NOW())",
                &[&id, &r.name, &r.category, &r.email, &r.phone, &r.legacy_id],
            )
            .await
            .context("Failed to insert vendor")?;
            Ok(RowResult::Created)
        }
    }
}

async fn commit_transfer(
    tx: &Transaction<'_>,
    row: &ImportRow,
    r: &TransferRow,
    allowed: &[&'static str],
) -> Result<RowResult> {
    let date = effective_date(row.user_date, r.transfer_date);

    match existing_id(row) {
        Some(transfer_id) => {
            update_booking_fields(
                tx,
                "transfers",
                &transfer_id,
                allowed,
                &[
                    ("transfer_date", &date),
                    ("pickup", &r.pickup),
                    ("dropoff", &r.dropoff),
                    ("num_guests", &r.num_guests),
                    ("price", &r.price),
                    ("status", &r.status.as_str()),
                    ("notes", &r.notes),
                ],
            )
            .await?;
            Ok(RowResult::Updated)
        }
        None => {
            // Linked entities are resolved only on insert; updates never
            // touch the guest/vendor links, so resolving earlier would leave
            // an orphan lazily-created record behind.
            let guest_id =
                resolve_or_create_guest(tx, r.guest_legacy_id.as_deref(), r.guest_name.as_deref())
                    .await?;
            let vendor_id = match r.vendor_legacy_id.as_deref() {
                Some(legacy) => Some(resolve_or_create_vendor(tx, legacy).await?),
                None => None,
            };
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO transfers (id, legacy_id, guest_id, vendor_id, transfer_date,
                    pickup, dropoff, num_guests, price, status, notes, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())",
                &[
                    &id,
                    &r.legacy_id,
                    &guest_id,
                    &vendor_id,
                    &date,
                    &r.pickup,
                    &r.dropoff,
                    &r.num_guests,
                    &r.price,
                    &r.status.as_str(),
                    &r.notes,
                ],
            )
            .await
            .context("Failed to insert transfer")?;
            Ok(RowResult::Created)
        }
    }
}

async fn commit_tour_booking(
    tx: &Transaction<'_>,
    row: &ImportRow,
    r: &TourBookingRow,
    allowed: &[&'static str],
    product_map: &HashMap<String, String>,
) -> Result<RowResult> {
    let date = effective_date(row.user_date, r.activity_date);

    match existing_id(row) {
        Some(booking_id) => {
            update_booking_fields(
                tx,
                "tour_bookings",
                &booking_id,
                allowed,
                &[
                    ("activity_date", &date),
                    ("num_guests", &r.num_guests),
                    ("price", &r.price),
                    ("status", &r.status.as_str()),
                    ("notes", &r.notes),
                ],
            )
            .await?;
            Ok(RowResult::Updated)
        }
        None => {
            let guest_id =
                resolve_or_create_guest(tx, r.guest_legacy_id.as_deref(), r.guest_name.as_deref())
                    .await?;
            let vendor_id = match r.vendor_legacy_id.as_deref() {
                Some(legacy) => Some(resolve_or_create_vendor(tx, legacy).await?),
                None => None,
            };
            let product_id: Option<String> = match r.activity_name.as_deref() {
                Some(name) => match product_map.get(&name.trim().to_lowercase()) {
                    Some(id) => Some(id.clone()),
                    None => bail!("Unmapped tour name: {}", name),
                },
                None => None,
            };
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO tour_bookings (id, legacy_id, guest_id, vendor_id, tour_product_id,
                    activity_date, num_guests, price, status, notes, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())",
                &[
                    &id,
                    &r.legacy_id,
                    &guest_id,
                    &vendor_id,
                    &product_id,
                    &date,
                    &r.num_guests,
                    &r.price,
                    &r.status.as_str(),
                    &r.notes,
                ],
            )
            .await
            .context("Failed to insert tour booking")?;
            Ok(RowResult::Created)
        }
    }
}

async fn commit_reservation(
    tx: &Transaction<'_>,
    row: &ImportRow,
    r: &ReservationRow,
    allowed: &[&'static str],
) -> Result<RowResult> {
    let arrival = effective_date(row.user_date, r.arrival);

    match existing_id(row) {
        Some(reservation_id) => {
            update_booking_fields(
                tx,
                "reservations",
                &reservation_id,
                allowed,
                &[
                    ("arrival", &arrival),
                    ("departure", &r.departure),
                    ("room", &r.room),
                    ("status", &r.status.as_str()),
                    ("notes", &r.notes),
                ],
            )
            .await?;
            Ok(RowResult::Updated)
        }
        None => {
            let guest_id = resolve_or_create_guest(tx, None, r.guest_name.as_deref()).await?;
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO reservations (id, legacy_id, guest_id, legacy_guest_name, arrival,
                    departure, room, status, notes, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())",
                &[
                    &id,
                    &r.legacy_id,
                    &guest_id,
                    &r.guest_name,
                    &arrival,
                    &r.departure,
                    &r.room,
                    &r.status.as_str(),
                    &r.notes,
                ],
            )
            .await
            .context("Failed to insert reservation")?;
            Ok(RowResult::Created)
        }
    }
}

//------------------------------------------------------------------------------
// LINKED ENTITY RESOLUTION
//------------------------------------------------------------------------------
// Per-row queries, not the batch lookup: sequential commits must see the
// guests and vendors created by earlier rows in the same batch.

async fn resolve_or_create_guest(
    tx: &Transaction<'_>,
    legacy_id: Option<&str>,
    name: Option<&str>,
) -> Result<String> {
    if let Some(legacy) = legacy_id.map(str::trim).filter(|s| !s.is_empty()) {
        let row = tx
            .query_opt(
                "SELECT id FROM guests WHERE $1 = ANY(legacy_ids) LIMIT 1",
                &[&legacy],
            )
            .await
            .context("Failed to look up linked guest by legacy id")?;
        if let Some(row) = row {
            return Ok(row.get(0));
        }
    }
    if let Some(name) = name.map(str::trim).filter(|s| !s.is_empty()) {
        let row = tx
            .query_opt(
                "SELECT id FROM guests WHERE lower(full_name) = lower($1)
                 ORDER BY created_at LIMIT 1",
                &[&name],
            )
            .await
            .context("Failed to look up linked guest by name")?;
        if let Some(row) = row {
            return Ok(row.get(0));
        }
    }

    // Minimal lazy creation so the dependent row gets a real FK target.
    let id = Uuid::new_v4().to_string();
    let legacy_ids: Vec<String> = legacy_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default();
    tx.execute(
        "INSERT INTO guests (id, full_name, legacy_ids, legacy_profiles, created_at, updated_at)
         VALUES ($1, $2, $3, '[]'::jsonb, NOW(), NOW())",
        &[&id, &name, &legacy_ids],
    )
    .await
    .context("Failed to lazily create linked guest")?;
    Ok(id)
}

async fn resolve_or_create_vendor(tx: &Transaction<'_>, legacy_id: &str) -> Result<VendorId> {
    let legacy = legacy_id.trim();
    if legacy.is_empty() {
        bail!("Empty vendor legacy id");
    }
    let row = tx
        .query_opt("SELECT id FROM vendors WHERE legacy_id = $1 LIMIT 1", &[&legacy])
        .await
        .context("Failed to look up linked vendor by legacy id")?;
    if let Some(row) = row {
        return Ok(VendorId(row.get(0)));
    }
    // Vendor name variants persisted by earlier classification rounds.
    let row = tx
        .query_opt(
            "SELECT vendor_id FROM vendor_name_mappings WHERE lower(raw_name) = lower($1)",
            &[&legacy],
        )
        .await
        .context("Failed to look up vendor name mapping")?;
    if let Some(row) = row {
        return Ok(VendorId(row.get(0)));
    }

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO vendors (id, legacy_id, active, legacy_profiles, created_at, updated_at)
         VALUES ($1, $2, TRUE, '[]'::jsonb, NOW(), NOW())",
        &[&id, &legacy],
    )
    .await
    .context("Failed to lazily create linked vendor")?;
    Ok(VendorId(id))
}

//------------------------------------------------------------------------------
// TOUR NAME NORMALIZATION
//------------------------------------------------------------------------------

/// A human decision for one raw activity-name cluster.
#[derive(Debug, Clone)]
pub enum TourNameChoice {
    /// Map the raw name onto an existing product.
    Existing(TourProductId),
    /// Create a new product and map the raw name onto it.
    Create {
        product_name: String,
        vendor_id: Option<VendorId>,
    },
}

#[derive(Debug, Clone)]
pub struct TourNameDecision {
    pub raw_name: String,
    pub choice: TourNameChoice,
}

/// Loads the persisted raw-name (lowercased) to product-id map.
pub async fn load_tour_name_map(
    conn: &tokio_postgres::Client,
) -> Result<HashMap<String, String>> {
    let rows = conn
        .query(
            "SELECT lower(raw_name) AS raw_name, tour_product_id FROM tour_name_mappings",
            &[],
        )
        .await
        .context("Failed to load tour name mappings")?;
    Ok(rows
        .iter()
        .map(|row| (row.get("raw_name"), row.get("tour_product_id")))
        .collect())
}

/// Two-phase tour commit. Phase one materializes "create" decisions into
/// tour_products and persists every name mapping in a single transaction, so
/// the next import of the same spreadsheet skips re-classification. Phase two
/// commits the booking rows against the now-complete map.
pub async fn commit_tour_names(
    pool: &PgPool,
    decisions: &[TourNameDecision],
    rows: &[ImportRow],
    role: CommitRole,
) -> Result<CommitOutcome> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for tour name commit")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to open tour name transaction")?;

    for decision in decisions {
        let product_id = match &decision.choice {
            TourNameChoice::Existing(id) => id.0.clone(),
            TourNameChoice::Create {
                product_name,
                vendor_id,
            } => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO tour_products (id, name, vendor_id, created_at)
                     VALUES ($1, $2, $3, NOW())",
                    &[&id, product_name, vendor_id],
                )
                .await
                .with_context(|| format!("Failed to create tour product {}", product_name))?;
                id
            }
        };
        tx.execute(
            "INSERT INTO tour_name_mappings (raw_name, tour_product_id)
             VALUES ($1, $2)
             ON CONFLICT (raw_name) DO UPDATE SET tour_product_id = EXCLUDED.tour_product_id",
            &[&decision.raw_name.trim().to_lowercase(), &product_id],
        )
        .await
        .with_context(|| format!("Failed to persist mapping for {}", decision.raw_name))?;
    }

    tx.commit()
        .await
        .context("Failed to commit tour name mappings")?;
    info!("Persisted {} tour name mappings", decisions.len());
    drop(conn);

    commit_rows(pool, ImportDomain::TourBooking, rows, role).await
}

//------------------------------------------------------------------------------
// HELPERS
//------------------------------------------------------------------------------

/// The update target for this row, if any. A row approved as CREATE always
/// inserts: a human may override a CONFLICT to CREATE, and the stale contact
/// match it still carries must not turn the insert into an update of the
/// conflicting record.
fn existing_id(row: &ImportRow) -> Option<String> {
    if row.action == ImportAction::Create {
        return None;
    }
    row.matched.as_ref().map(|m| m.id.clone())
}

fn effective_date(user_date: Option<NaiveDate>, parsed: Option<NaiveDate>) -> Option<NaiveDate> {
    user_date.or(parsed)
}

async fn record_field_change(
    tx: &Transaction<'_>,
    guest_id: &str,
    field: &str,
    old: Option<&str>,
    new: Option<&str>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO guest_field_history (id, guest_id, field_name, old_value, new_value, changed_at)
         VALUES ($1, $2, $3, $4, $5, NOW())",
        &[&Uuid::new_v4().to_string(), &guest_id, &field, &old, &new],
    )
    .await
    .context("Failed to record guest field history")?;
    Ok(())
}

/// Updates the allow-listed subset of a booking table's fields. Field names
/// come from the static per-role lists, never from input.
async fn update_booking_fields(
    tx: &Transaction<'_>,
    table: &str,
    id: &str,
    allowed: &[&'static str],
    fields: &[(&str, &(dyn tokio_postgres::types::ToSql + Sync))],
) -> Result<()> {
    for (field, value) in fields {
        if !allowed.contains(field) {
            continue;
        }
        let sql = format!(
            "UPDATE {table} SET {field} = $1, updated_at = NOW() WHERE id = $2",
            table = table,
            field = field
        );
        let n = tx
            .execute(&sql, &[*value, &id])
            .await
            .with_context(|| format!("Failed to update {} field {}", table, field))?;
        if n == 0 {
            bail!("Matched {} record {} no longer exists", table, id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchCandidate, MatchKind};
    use chrono::NaiveDateTime;

    fn import_row(action: ImportAction, user_date: Option<NaiveDate>) -> ImportRow {
        ImportRow {
            row_number: 7,
            csv: CanonicalRow::Guest(GuestRow::default()),
            matched: None,
            action,
            reason: String::new(),
            user_date,
        }
    }

    #[test]
    fn test_eligibility() {
        assert!(is_eligible(&import_row(ImportAction::Create, None)));
        assert!(is_eligible(&import_row(ImportAction::Update, None)));
        assert!(!is_eligible(&import_row(ImportAction::Skip, None)));
        assert!(!is_eligible(&import_row(ImportAction::Conflict, None)));
        assert!(!is_eligible(&import_row(ImportAction::InvalidDate, None)));
        let fixed = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert!(is_eligible(&import_row(ImportAction::InvalidDate, fixed)));
    }

    #[test]
    fn test_row_ref_prefers_legacy_id() {
        let mut row = import_row(ImportAction::Create, None);
        assert_eq!(row_ref(&row), "row 7");
        row.csv = CanonicalRow::Guest(GuestRow {
            legacy_id: Some(" G-17 ".into()),
            ..Default::default()
        });
        assert_eq!(row_ref(&row), "G-17");
    }

    // A human may override a CONFLICT to CREATE; the stale contact match the
    // row still carries must never be used as an update target, or the
    // commit would fold two different people together.
    #[test]
    fn test_create_override_ignores_stale_match() {
        let mut row = import_row(ImportAction::Conflict, None);
        row.matched = Some(MatchCandidate {
            id: "id-existing".into(),
            label: "Maria Lopez".into(),
            kind: MatchKind::Contact,
        });
        assert_eq!(existing_id(&row), Some("id-existing".into()));

        crate::classify::apply_override(&mut row, ImportAction::Create, None, None);
        assert!(row.matched.is_some());
        assert_eq!(existing_id(&row), None);

        crate::classify::apply_override(&mut row, ImportAction::Update, None, None);
        assert_eq!(existing_id(&row), Some("id-existing".into()));
    }

    // Updates never touch guest/vendor links, so the allow-lists must not
    // contain them; linked-entity resolution runs only on the insert path.
    #[test]
    fn test_update_allow_lists_never_touch_links() {
        for role in [CommitRole::Admin, CommitRole::Staff] {
            for domain in [
                ImportDomain::Transfer,
                ImportDomain::TourBooking,
                ImportDomain::Reservation,
            ] {
                let fields = allowed_fields(role, domain);
                for link in ["guest_id", "vendor_id", "tour_product_id"] {
                    assert!(
                        !fields.contains(&link),
                        "{:?}/{} allow-list exposes {}",
                        role,
                        domain.as_str(),
                        link
                    );
                }
            }
        }
    }

    #[test]
    fn test_staff_lists_are_subsets_of_admin() {
        for domain in [
            ImportDomain::Guest,
            ImportDomain::Vendor,
            ImportDomain::Transfer,
            ImportDomain::TourBooking,
            ImportDomain::Reservation,
        ] {
            let admin = allowed_fields(CommitRole::Admin, domain);
            for field in allowed_fields(CommitRole::Staff, domain) {
                assert!(admin.contains(field), "{} missing from admin list", field);
            }
        }
    }

    #[test]
    fn test_staff_cannot_commit_vendors() {
        assert!(allowed_fields(CommitRole::Staff, ImportDomain::Vendor).is_empty());
    }

    fn guest(email: Option<&str>, notes: Option<&str>) -> Guest {
        let ts = NaiveDateTime::default();
        Guest {
            id: crate::models::GuestId("g-1".into()),
            first_name: None,
            last_name: None,
            full_name: Some("Maria Lopez".into()),
            email: email.map(String::from),
            phone: None,
            nationality: None,
            notes: notes.map(String::from),
            legacy_ids: Vec::new(),
            legacy_profiles: serde_json::Value::Array(Vec::new()),
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_guest_changes_respect_allow_list_and_skip_blanks() {
        let current = guest(Some("old@x.com"), Some("keep"));
        let incoming = GuestRow {
            email: Some("new@x.com".into()),
            notes: None,
            full_name: Some("Maria L".into()),
            ..Default::default()
        };
        // Staff may touch email but not full_name; a None incoming value
        // never erases stored notes.
        let changes = guest_changes(&current, &incoming, &["email", "phone", "notes"]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "email");
        assert_eq!(changes[0].1.as_deref(), Some("old@x.com"));
        assert_eq!(changes[0].2.as_deref(), Some("new@x.com"));
    }

    #[test]
    fn test_guest_changes_empty_when_identical() {
        let current = guest(Some("same@x.com"), None);
        let incoming = GuestRow {
            email: Some("same@x.com".into()),
            ..Default::default()
        };
        assert!(guest_changes(&current, &incoming, &["email"]).is_empty());
    }

    #[test]
    fn test_effective_date_prefers_user_date() {
        let parsed = NaiveDate::from_ymd_opt(2024, 1, 1);
        let fixed = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(effective_date(fixed, parsed), fixed);
        assert_eq!(effective_date(None, parsed), parsed);
    }
}
