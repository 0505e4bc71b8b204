// src/cluster.rs
//
// Duplicate Cluster Finder: scans the live guests table for records that are
// probably the same person, grouped by a normalized fingerprint and ranked
// by record richness. Advisory only: nothing here mutates the store, and the
// suggested survivor is a suggestion, never an automatic decision.

use anyhow::{Context, Result};
use futures::future::try_join_all;
use log::{debug, info};
use std::collections::HashMap;
use std::time::Instant;

use crate::config;
use crate::db::{self, PgPool};
use crate::merge::GUEST_FK_TABLES;
use crate::models::{
    ClusterMember, DuplicateCluster, Guest, GuestId, OrphanCandidate, OrphanReservation,
    ReservationId,
};

/// Duplicate fingerprint: lower-cased name stripped of whitespace and
/// punctuation, combined with the raw email. A NULL email is its own group
/// key, so nameless-email collisions never cross into the no-email group.
pub fn fingerprint(full_name: Option<&str>, email: Option<&str>) -> String {
    let name_part: String = full_name
        .unwrap_or("")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    format!("{}|{}", name_part, email.unwrap_or(""))
}

/// Groups guest ids by fingerprint, keeps groups of two or more, and orders
/// them largest-first. Pure so the grouping rule is testable without a store.
pub fn group_by_fingerprint(
    guests: &[(GuestId, Option<String>, Option<String>)],
) -> Vec<(String, Vec<GuestId>)> {
    let mut groups: HashMap<String, Vec<GuestId>> = HashMap::new();
    for (id, name, email) in guests {
        // A guest with neither name nor email has nothing to collide on.
        if name.is_none() && email.is_none() {
            continue;
        }
        let key = fingerprint(name.as_deref(), email.as_deref());
        groups.entry(key).or_default().push(id.clone());
    }
    let mut clusters: Vec<(String, Vec<GuestId>)> = groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .collect();
    clusters.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    clusters
}

/// Ranks cluster members by dependent-record weight, heaviest first. The top
/// member is the advisory merge survivor.
pub fn rank_members(mut members: Vec<ClusterMember>) -> Vec<ClusterMember> {
    members.sort_by(|a, b| {
        b.weight
            .cmp(&a.weight)
            .then_with(|| a.guest.id.0.cmp(&b.guest.id.0))
    });
    members
}

/// Scans the guests table for duplicate clusters, capped for UI pagination.
pub async fn find_duplicate_guests(pool: &PgPool) -> Result<Vec<DuplicateCluster>> {
    let start = Instant::now();
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for duplicate scan")?;

    let rows = conn
        .query("SELECT id, full_name, email FROM guests", &[])
        .await
        .context("Failed to query guests for fingerprinting")?;
    let keys: Vec<(GuestId, Option<String>, Option<String>)> = rows
        .iter()
        .map(|row| {
            (
                GuestId(row.get("id")),
                row.get("full_name"),
                row.get("email"),
            )
        })
        .collect();
    info!("Fingerprinting {} guests", keys.len());

    let mut clusters = group_by_fingerprint(&keys);
    clusters.truncate(config::MAX_DUPLICATE_CLUSTERS);
    if clusters.is_empty() {
        return Ok(Vec::new());
    }

    // Bulk-fetch full member records and per-member dependent counts: one
    // query for the guests, one per dependent table.
    let member_ids: Vec<String> = clusters
        .iter()
        .flat_map(|(_, members)| members.iter().map(|id| id.0.clone()))
        .collect();

    let sql = format!(
        "SELECT {} FROM guests WHERE id = ANY($1)",
        db::GUEST_COLUMNS
    );
    let guest_rows = conn
        .query(&sql, &[&member_ids])
        .await
        .context("Failed to fetch duplicate cluster members")?;
    let guests: HashMap<String, Guest> = guest_rows
        .iter()
        .map(|row| {
            let guest = db::guest_from_row(row);
            (guest.id.0.clone(), guest)
        })
        .collect();

    // One count query per dependent table, pipelined on the connection.
    let count_queries = GUEST_FK_TABLES.iter().map(|(table, column)| {
        let conn = &conn;
        let member_ids = &member_ids;
        async move {
            let sql = format!(
                "SELECT {col}, COUNT(*) AS n FROM {table} WHERE {col} = ANY($1) GROUP BY {col}",
                col = column,
                table = table
            );
            let rows = conn
                .query(&sql, &[member_ids])
                .await
                .with_context(|| format!("Failed to count {} dependents", table))?;
            debug!("Counted dependents in {}", table);
            Ok::<_, anyhow::Error>((*table, rows))
        }
    });

    let mut reservation_counts: HashMap<String, i64> = HashMap::new();
    let mut other_counts: HashMap<String, i64> = HashMap::new();
    for (table, rows) in try_join_all(count_queries).await? {
        for row in rows {
            let guest_id: String = row.get(0);
            let n: i64 = row.get("n");
            if table == "reservations" {
                *reservation_counts.entry(guest_id).or_default() += n;
            } else {
                *other_counts.entry(guest_id).or_default() += n;
            }
        }
    }

    let mut result = Vec::with_capacity(clusters.len());
    for (key, member_ids) in clusters {
        let mut members = Vec::with_capacity(member_ids.len());
        for id in &member_ids {
            let Some(guest) = guests.get(&id.0) else {
                continue;
            };
            let reservations = reservation_counts.get(&id.0).copied().unwrap_or(0);
            let others = other_counts.get(&id.0).copied().unwrap_or(0);
            members.push(ClusterMember {
                guest: guest.clone(),
                weight: reservations * config::RESERVATION_WEIGHT + others,
                reservation_count: reservations,
                other_dependent_count: others,
            });
        }
        result.push(DuplicateCluster {
            fingerprint: key,
            members: rank_members(members),
        });
    }

    info!(
        "Duplicate scan found {} clusters in {:.2?}",
        result.len(),
        start.elapsed()
    );
    Ok(result)
}

/// True when a reservation's guest link looks wrong: the linked guest's last
/// name does not appear (case-insensitive) in the reservation's raw legacy
/// guest-name string.
pub fn is_suspect_link(raw_guest_name: &str, linked_last_name: &str) -> bool {
    let last = linked_last_name.trim().to_lowercase();
    if last.is_empty() {
        return false;
    }
    !raw_guest_name.to_lowercase().contains(&last)
}

/// Suggests up to MAX_ORPHAN_CANDIDATES guests whose last name is similar to
/// the last word of the raw legacy guest-name string.
pub fn suggest_candidates(
    raw_guest_name: &str,
    guests: &[(GuestId, Option<String>, Option<String>)],
) -> Vec<OrphanCandidate> {
    let raw_last = raw_guest_name
        .split_whitespace()
        .last()
        .unwrap_or("")
        .to_lowercase();
    if raw_last.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<OrphanCandidate> = guests
        .iter()
        .filter_map(|(id, full_name, last_name)| {
            let last = last_name.as_deref()?.trim().to_lowercase();
            if last.is_empty() {
                return None;
            }
            let similarity = strsim::jaro_winkler(&raw_last, &last);
            if similarity >= config::ORPHAN_CANDIDATE_MIN_SIMILARITY {
                Some(OrphanCandidate {
                    guest_id: id.clone(),
                    full_name: full_name.clone(),
                    similarity,
                })
            } else {
                None
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.guest_id.0.cmp(&b.guest_id.0))
    });
    scored.truncate(config::MAX_ORPHAN_CANDIDATES);
    scored
}

/// Locates reservations whose guest link is null or looks wrongly linked by
/// an earlier import, each with candidate guests for relinking.
pub async fn find_orphan_reservations(pool: &PgPool) -> Result<Vec<OrphanReservation>> {
    let start = Instant::now();
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for orphan scan")?;

    let rows = conn
        .query(
            "SELECT r.id, r.guest_id, r.legacy_guest_name,
                    g.full_name, g.last_name
             FROM reservations r
             LEFT JOIN guests g ON g.id = r.guest_id",
            &[],
        )
        .await
        .context("Failed to query reservations for orphan scan")?;

    let guest_rows = conn
        .query("SELECT id, full_name, last_name FROM guests", &[])
        .await
        .context("Failed to query guests for orphan candidates")?;
    let guests: Vec<(GuestId, Option<String>, Option<String>)> = guest_rows
        .iter()
        .map(|row| {
            (
                GuestId(row.get("id")),
                row.get("full_name"),
                row.get("last_name"),
            )
        })
        .collect();

    let mut orphans = Vec::new();
    for row in rows {
        let guest_id: Option<String> = row.get("guest_id");
        let raw_name: Option<String> = row.get("legacy_guest_name");
        let linked_last: Option<String> = row.get("last_name");

        let suspect = match (&guest_id, &raw_name, &linked_last) {
            (None, Some(raw), _) if !raw.trim().is_empty() => true,
            (Some(_), Some(raw), Some(last)) => is_suspect_link(raw, last),
            _ => false,
        };
        if !suspect {
            continue;
        }

        let candidates = raw_name
            .as_deref()
            .map(|raw| suggest_candidates(raw, &guests))
            .unwrap_or_default();
        orphans.push(OrphanReservation {
            reservation_id: ReservationId(row.get("id")),
            raw_guest_name: raw_name,
            linked_guest_id: guest_id.map(GuestId),
            linked_guest_name: row.get("full_name"),
            candidates,
        });
    }

    info!(
        "Orphan scan found {} suspect reservations in {:.2?}",
        orphans.len(),
        start.elapsed()
    );
    Ok(orphans)
}
