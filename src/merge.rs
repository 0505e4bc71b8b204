// src/merge.rs
//
// Merge Executor: human-approved folding of one identity record into another.
// A merge is a single transaction with a fixed step order; any failure rolls
// the whole thing back, so dependents are never left split across two owners.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use std::time::Instant;

use crate::db::{self, PgPool};
use crate::models::{GuestId, ReservationId, VendorId};
use crate::results::MergeOutcome;

/// Every table holding a guest foreign key. Exhaustive by construction: the
/// drift test below fails when this list and the registry disagree, so a new
/// guest-linked table cannot silently escape merges.
pub const GUEST_FK_TABLES: &[(&str, &str)] = &[
    ("reservations", "guest_id"),
    ("transfers", "guest_id"),
    ("tour_bookings", "guest_id"),
    ("special_requests", "guest_id"),
    ("conversations", "guest_id"),
    ("orders", "guest_id"),
];

/// Every table holding a vendor foreign key.
pub const VENDOR_FK_TABLES: &[(&str, &str)] = &[
    ("transfers", "vendor_id"),
    ("tour_bookings", "vendor_id"),
    ("tour_products", "vendor_id"),
    ("orders", "vendor_id"),
];

/// Merges the secondary guest into the primary. Step order is fixed:
/// snapshot, profile append, legacy-id fold, FK relinks, polymorphic message
/// repoint, secondary delete. All inside one transaction.
pub async fn merge_guests(
    pool: &PgPool,
    primary_id: &GuestId,
    secondary_id: &GuestId,
) -> Result<MergeOutcome> {
    if primary_id == secondary_id {
        bail!("Cannot merge guest {} into itself", primary_id);
    }
    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for guest merge")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to open merge transaction")?;

    let sql = format!(
        "SELECT {} FROM guests WHERE id = $1 FOR UPDATE",
        db::GUEST_COLUMNS
    );
    let primary_row = tx
        .query_opt(&sql, &[primary_id])
        .await
        .context("Failed to lock primary guest")?;
    let secondary_row = tx
        .query_opt(&sql, &[secondary_id])
        .await
        .context("Failed to lock secondary guest")?;
    let Some(primary_row) = primary_row else {
        bail!("Primary guest {} not found", primary_id);
    };
    let Some(secondary_row) = secondary_row else {
        bail!("Secondary guest {} not found", secondary_id);
    };
    let primary = db::guest_from_row(&primary_row);
    let secondary = db::guest_from_row(&secondary_row);

    // Full snapshot of the record about to disappear, appended to the
    // survivor's audit array.
    let snapshot = serde_json::json!({
        "merged_at": Utc::now().naive_utc(),
        "guest": serde_json::to_value(&secondary)
            .context("Failed to serialize secondary guest snapshot")?,
    });
    let mut profiles = match primary.legacy_profiles {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    profiles.push(snapshot);

    let mut legacy_ids = primary.legacy_ids.clone();
    let mut legacy_ids_added = 0;
    for id in &secondary.legacy_ids {
        if !legacy_ids.contains(id) {
            legacy_ids.push(id.clone());
            legacy_ids_added += 1;
        }
    }

    tx.execute(
        "UPDATE guests
         SET legacy_ids = $1, legacy_profiles = $2, updated_at = NOW()
         WHERE id = $3",
        &[
            &legacy_ids,
            &serde_json::Value::Array(profiles),
            primary_id,
        ],
    )
    .await
    .context("Failed to fold legacy data into primary guest")?;

    let mut relinked = Vec::with_capacity(GUEST_FK_TABLES.len() + 1);
    for (table, column) in GUEST_FK_TABLES {
        let sql = format!(
            "UPDATE {table} SET {col} = $1 WHERE {col} = $2",
            table = table,
            col = column
        );
        let n = tx
            .execute(&sql, &[primary_id, secondary_id])
            .await
            .with_context(|| format!("Failed to relink {} to primary guest", table))?;
        relinked.push((table.to_string(), n));
    }

    // Polymorphic sender link; not a plain FK, so it sits outside the table
    // registry.
    let n = tx
        .execute(
            "UPDATE messages SET sender_id = $1
             WHERE sender_type = 'guest' AND sender_id = $2",
            &[primary_id, secondary_id],
        )
        .await
        .context("Failed to repoint guest messages")?;
    relinked.push(("messages".to_string(), n));

    let deleted = tx
        .execute("DELETE FROM guests WHERE id = $1", &[secondary_id])
        .await
        .context("Failed to delete secondary guest")?;
    if deleted != 1 {
        bail!(
            "Expected to delete exactly one guest, deleted {}",
            deleted
        );
    }

    tx.commit()
        .await
        .context("Failed to commit guest merge transaction")?;

    info!(
        "Merged guest {} into {} ({} relink targets, {} legacy ids folded) in {:.2?}",
        secondary_id,
        primary_id,
        relinked.len(),
        legacy_ids_added,
        start.elapsed()
    );
    Ok(MergeOutcome {
        primary_id: primary_id.0.clone(),
        secondary_id: secondary_id.0.clone(),
        relinked,
        legacy_ids_added,
    })
}

/// Merges the secondary vendor into the primary, mirroring the guest merge
/// over the vendor FK registry.
pub async fn merge_vendors(
    pool: &PgPool,
    primary_id: &VendorId,
    secondary_id: &VendorId,
) -> Result<MergeOutcome> {
    if primary_id == secondary_id {
        bail!("Cannot merge vendor {} into itself", primary_id);
    }
    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vendor merge")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to open merge transaction")?;

    let sql = format!(
        "SELECT {} FROM vendors WHERE id = $1 FOR UPDATE",
        db::VENDOR_COLUMNS
    );
    let primary_row = tx
        .query_opt(&sql, &[primary_id])
        .await
        .context("Failed to lock primary vendor")?;
    let secondary_row = tx
        .query_opt(&sql, &[secondary_id])
        .await
        .context("Failed to lock secondary vendor")?;
    let Some(primary_row) = primary_row else {
        bail!("Primary vendor {} not found", primary_id);
    };
    let Some(secondary_row) = secondary_row else {
        bail!("Secondary vendor {} not found", secondary_id);
    };
    let primary = db::vendor_from_row(&primary_row);
    let secondary = db::vendor_from_row(&secondary_row);

    let snapshot = serde_json::json!({
        "merged_at": Utc::now().naive_utc(),
        "vendor": serde_json::to_value(&secondary)
            .context("Failed to serialize secondary vendor snapshot")?,
    });
    let mut profiles = match primary.legacy_profiles {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    profiles.push(snapshot);

    // Vendors carry a scalar legacy id; the secondary's fills a missing
    // primary value, otherwise it survives only inside the snapshot.
    let mut legacy_ids_added = 0;
    let legacy_id = match (&primary.legacy_id, &secondary.legacy_id) {
        (None, Some(s)) => {
            legacy_ids_added = 1;
            Some(s.clone())
        }
        (p, _) => p.clone(),
    };

    tx.execute(
        "UPDATE vendors
         SET legacy_id = $1, legacy_profiles = $2, updated_at = NOW()
         WHERE id = $3",
        &[
            &legacy_id,
            &serde_json::Value::Array(profiles),
            primary_id,
        ],
    )
    .await
    .context("Failed to fold legacy data into primary vendor")?;

    let mut relinked = Vec::with_capacity(VENDOR_FK_TABLES.len() + 1);
    for (table, column) in VENDOR_FK_TABLES {
        let sql = format!(
            "UPDATE {table} SET {col} = $1 WHERE {col} = $2",
            table = table,
            col = column
        );
        let n = tx
            .execute(&sql, &[primary_id, secondary_id])
            .await
            .with_context(|| format!("Failed to relink {} to primary vendor", table))?;
        relinked.push((table.to_string(), n));
    }

    let n = tx
        .execute(
            "UPDATE messages SET sender_id = $1
             WHERE sender_type = 'vendor' AND sender_id = $2",
            &[primary_id, secondary_id],
        )
        .await
        .context("Failed to repoint vendor messages")?;
    relinked.push(("messages".to_string(), n));

    let deleted = tx
        .execute("DELETE FROM vendors WHERE id = $1", &[secondary_id])
        .await
        .context("Failed to delete secondary vendor")?;
    if deleted != 1 {
        bail!(
            "Expected to delete exactly one vendor, deleted {}",
            deleted
        );
    }

    tx.commit()
        .await
        .context("Failed to commit vendor merge transaction")?;

    info!(
        "Merged vendor {} into {} in {:.2?}",
        secondary_id,
        primary_id,
        start.elapsed()
    );
    Ok(MergeOutcome {
        primary_id: primary_id.0.clone(),
        secondary_id: secondary_id.0.clone(),
        relinked,
        legacy_ids_added,
    })
}

/// Hard-deletes a junk duplicate guest. Refuses when dependent records still
/// point at it; those need a merge or relink first.
pub async fn delete_guest(pool: &PgPool, guest_id: &GuestId) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for guest delete")?;

    for (table, column) in GUEST_FK_TABLES {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE {col} = $1",
            table = table,
            col = column
        );
        let row = conn
            .query_one(&sql, &[guest_id])
            .await
            .with_context(|| format!("Failed to count {} dependents", table))?;
        let n: i64 = row.get(0);
        if n > 0 {
            warn!(
                "Refusing to delete guest {}: {} dependent rows in {}",
                guest_id, n, table
            );
            bail!(
                "Guest {} still has {} dependent records in {}; merge or relink them first",
                guest_id,
                n,
                table
            );
        }
    }

    let deleted = conn
        .execute("DELETE FROM guests WHERE id = $1", &[guest_id])
        .await
        .context("Failed to delete guest")?;
    if deleted == 0 {
        bail!("Guest {} not found", guest_id);
    }
    info!("Deleted guest {}", guest_id);
    Ok(())
}

/// Repoints a single reservation at a different guest. The fix-up arm of the
/// orphan scan.
pub async fn relink_reservation(
    pool: &PgPool,
    reservation_id: &ReservationId,
    guest_id: &GuestId,
) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for relink")?;

    let guest = conn
        .query_opt("SELECT id FROM guests WHERE id = $1", &[guest_id])
        .await
        .context("Failed to look up relink target guest")?;
    if guest.is_none() {
        bail!("Guest {} not found", guest_id);
    }

    let updated = conn
        .execute(
            "UPDATE reservations SET guest_id = $1, updated_at = NOW() WHERE id = $2",
            &[guest_id, reservation_id],
        )
        .await
        .context("Failed to relink reservation")?;
    if updated == 0 {
        bail!("Reservation {} not found", reservation_id);
    }
    info!("Relinked reservation {} to guest {}", reservation_id, guest_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Independent copy of the schema's FK registry. Adding a guest- or
    // vendor-linked table to the schema without updating the merge lists (or
    // the reverse) fails here.
    const EXPECTED_GUEST_FKS: &[(&str, &str)] = &[
        ("reservations", "guest_id"),
        ("transfers", "guest_id"),
        ("tour_bookings", "guest_id"),
        ("special_requests", "guest_id"),
        ("conversations", "guest_id"),
        ("orders", "guest_id"),
    ];

    const EXPECTED_VENDOR_FKS: &[(&str, &str)] = &[
        ("transfers", "vendor_id"),
        ("tour_bookings", "vendor_id"),
        ("tour_products", "vendor_id"),
        ("orders", "vendor_id"),
    ];

    #[test]
    fn test_guest_fk_registry_matches() {
        assert_eq!(GUEST_FK_TABLES, EXPECTED_GUEST_FKS);
    }

    #[test]
    fn test_vendor_fk_registry_matches() {
        assert_eq!(VENDOR_FK_TABLES, EXPECTED_VENDOR_FKS);
    }

    #[test]
    fn test_fk_tables_have_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for entry in GUEST_FK_TABLES {
            assert!(seen.insert(entry), "duplicate guest FK entry {:?}", entry);
        }
        seen.clear();
        for entry in VENDOR_FK_TABLES {
            assert!(seen.insert(entry), "duplicate vendor FK entry {:?}", entry);
        }
    }
}
