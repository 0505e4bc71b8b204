// src/pms.rs
//
// PMS feed specialization: the property-management system exports an XML
// feed of room reservations. The feed is re-sent wholesale, so the import
// must detect true no-ops instead of rewriting every row on every sync.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Instant;
use uuid::Uuid;

use crate::canonical::{normalize_status, parse_flexible_date};
use crate::db::PgPool;
use crate::models::BookingStatus;
use crate::results::{PmsImportResult, RowError};

/// One flat reservation row extracted from the feed, whatever grouping
/// elements surrounded it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PmsReservation {
    /// The PMS confirmation number; the stable upsert key.
    pub external_id: Option<String>,
    pub guest_name: Option<String>,
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
    pub status: BookingStatus,
    pub room: Option<String>,
}

impl PmsReservation {
    fn is_empty(&self) -> bool {
        self.external_id.is_none() && self.guest_name.is_none() && self.room.is_none()
    }
}

fn record_tag(name: &str) -> bool {
    matches!(name, "reservation" | "booking")
}

fn assign_field(row: &mut PmsReservation, tag: &str, text: &str) {
    let value = text.trim();
    if value.is_empty() {
        return;
    }
    match tag {
        "id" | "externalid" | "reservationid" | "confirmation" | "confirmationnumber" => {
            row.external_id = Some(value.to_string());
        }
        "guest" | "guestname" | "name" => row.guest_name = Some(value.to_string()),
        "arrival" | "arrivaldate" | "checkin" => row.arrival = parse_flexible_date(value),
        "departure" | "departuredate" | "checkout" => row.departure = parse_flexible_date(value),
        "status" => row.status = normalize_status(value),
        "room" | "roomnumber" | "unit" => row.room = Some(value.to_string()),
        // Unknown elements are feed noise, not errors.
        _ => {}
    }
}

/// Parses the PMS XML feed with an event loop. Grouping depth is arbitrary
/// (feeds wrap reservations in property/date/channel containers at will), so
/// the parser keys on the record tag and its leaf children only.
pub fn parse_pms_feed(xml: &str) -> Result<Vec<PmsReservation>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut current: Option<PmsReservation> = None;
    let mut current_tag: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .context("Malformed PMS feed XML")?
        {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                let tag = tag.replace(['-', '_'], "");
                if record_tag(&tag) {
                    current = Some(PmsReservation::default());
                    current_tag = None;
                } else if current.is_some() {
                    current_tag = Some(tag);
                }
            }
            Event::Text(t) => {
                if let (Some(row), Some(tag)) = (current.as_mut(), current_tag.as_deref()) {
                    let text = t.unescape().context("Bad text node in PMS feed")?;
                    assign_field(row, tag, &text);
                }
            }
            Event::End(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_lowercase();
                let tag = tag.replace(['-', '_'], "");
                if record_tag(&tag) {
                    if let Some(row) = current.take() {
                        if !row.is_empty() {
                            rows.push(row);
                        }
                    }
                } else {
                    current_tag = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// True when the stored reservation already reflects the feed row. The feed
/// resends everything, so status and room are the change signal. A feed row
/// without a room element leaves the stored room alone, in the diff and in
/// the update, so replaying such a feed stays a no-op.
pub fn is_noop(
    current_status: BookingStatus,
    current_room: Option<&str>,
    incoming: &PmsReservation,
) -> bool {
    if current_status != incoming.status {
        return false;
    }
    match incoming.room.as_deref() {
        Some(room) => current_room == Some(room),
        None => true,
    }
}

/// Upserts a parsed feed. Per row: guest by exact full name, reservation by
/// PMS external id, unchanged rows counted instead of rewritten. Row errors
/// are collected; the feed import never aborts on one bad row.
pub async fn import_pms_feed(pool: &PgPool, feed: &[PmsReservation]) -> Result<PmsImportResult> {
    let start = Instant::now();
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for PMS import")?;

    let mut result = PmsImportResult::default();
    for (index, row) in feed.iter().enumerate() {
        let row_ref = row
            .external_id
            .clone()
            .unwrap_or_else(|| format!("row {}", index + 1));
        let tx = conn
            .transaction()
            .await
            .context("Failed to open PMS row transaction")?;
        match import_one(&tx, row).await {
            Ok(outcome) => {
                if let Err(e) = tx.commit().await {
                    warn!("PMS row {} failed at commit: {}", row_ref, e);
                    result.errors.push(RowError {
                        row_ref,
                        message: format!("commit failed: {}", e),
                    });
                    continue;
                }
                match outcome {
                    PmsRowOutcome::Created => result.created += 1,
                    PmsRowOutcome::Updated => result.updated += 1,
                    PmsRowOutcome::Unchanged => result.unchanged += 1,
                }
            }
            Err(e) => {
                drop(tx);
                warn!("PMS row {} failed: {:#}", row_ref, e);
                result.errors.push(RowError {
                    row_ref,
                    message: format!("{:#}", e),
                });
            }
        }
    }

    info!(
        "PMS import: {} created, {} updated, {} unchanged, {} errors in {:.2?}",
        result.created,
        result.updated,
        result.unchanged,
        result.errors.len(),
        start.elapsed()
    );
    Ok(result)
}

enum PmsRowOutcome {
    Created,
    Updated,
    Unchanged,
}

async fn import_one(
    tx: &tokio_postgres::Transaction<'_>,
    row: &PmsReservation,
) -> Result<PmsRowOutcome> {
    let Some(external_id) = row.external_id.as_deref() else {
        anyhow::bail!("Feed row has no confirmation number");
    };

    let existing = tx
        .query_opt(
            "SELECT id, status, room FROM reservations WHERE legacy_id = $1",
            &[&external_id],
        )
        .await
        .context("Failed to look up reservation by PMS id")?;

    if let Some(existing) = existing {
        let current_status = BookingStatus::from_str(existing.get::<_, &str>("status"));
        let current_room: Option<String> = existing.get("room");
        if is_noop(current_status, current_room.as_deref(), row) {
            return Ok(PmsRowOutcome::Unchanged);
        }
        let id: String = existing.get("id");
        tx.execute(
            "UPDATE reservations
             SET status = $1, room = COALESCE($2, room), arrival = COALESCE($3, arrival),
                 departure = COALESCE($4, departure), updated_at = NOW()
             WHERE id = $5",
            &[
                &row.status.as_str(),
                &row.room,
                &row.arrival,
                &row.departure,
                &id,
            ],
        )
        .await
        .context("Failed to update reservation from feed")?;
        return Ok(PmsRowOutcome::Updated);
    }

    let guest_id = resolve_or_create_guest(tx, row.guest_name.as_deref()).await?;
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO reservations (id, legacy_id, guest_id, legacy_guest_name, arrival,
            departure, room, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())",
        &[
            &id,
            &external_id,
            &guest_id,
            &row.guest_name,
            &row.arrival,
            &row.departure,
            &row.room,
            &row.status.as_str(),
        ],
    )
    .await
    .context("Failed to insert reservation from feed")?;
    Ok(PmsRowOutcome::Created)
}

async fn resolve_or_create_guest(
    tx: &tokio_postgres::Transaction<'_>,
    name: Option<&str>,
) -> Result<String> {
    if let Some(name) = name.map(str::trim).filter(|s| !s.is_empty()) {
        let existing = tx
            .query_opt(
                "SELECT id FROM guests WHERE lower(full_name) = lower($1)
                 ORDER BY created_at LIMIT 1",
                &[&name],
            )
            .await
            .context("Failed to look up feed guest by name")?;
        if let Some(row) = existing {
            return Ok(row.get(0));
        }
    }
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO guests (id, full_name, legacy_ids, legacy_profiles, created_at, updated_at)
         VALUES ($1, $2, '{}', '[]'::jsonb, NOW(), NOW())",
        &[&id, &name],
    )
    .await
    .context("Failed to create guest from feed")?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"
        <pms-export>
          <property code="CR-01">
            <reservations>
              <reservation>
                <confirmation-number>PMS-1001</confirmation-number>
                <guest-name>Maria Lopez</guest-name>
                <check-in>3/5/2024</check-in>
                <check-out>3/9/2024</check-out>
                <status>Confirmed</status>
                <room>12B</room>
              </reservation>
              <reservation>
                <confirmation-number>PMS-1002</confirmation-number>
                <guest-name>Juan &amp; Ana Perez</guest-name>
                <status>cancelado</status>
              </reservation>
            </reservations>
          </property>
        </pms-export>"#;

    #[test]
    fn test_parse_feed_with_nested_grouping() {
        let rows = parse_pms_feed(FEED).unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.external_id.as_deref(), Some("PMS-1001"));
        assert_eq!(first.guest_name.as_deref(), Some("Maria Lopez"));
        assert_eq!(first.arrival, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(first.departure, NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(first.status, BookingStatus::Confirmed);
        assert_eq!(first.room.as_deref(), Some("12B"));

        // Escaped entity and Spanish status both survive.
        let second = &rows[1];
        assert_eq!(second.guest_name.as_deref(), Some("Juan & Ana Perez"));
        assert_eq!(second.status, BookingStatus::Cancelled);
        assert!(second.room.is_none());
    }

    #[test]
    fn test_unknown_elements_are_ignored() {
        let xml = r#"
            <feed><reservation>
              <id>R-1</id>
              <channel>OTA</channel>
              <rate-plan>FLEX</rate-plan>
              <status>confirmed</status>
            </reservation></feed>"#;
        let rows = parse_pms_feed(xml).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].external_id.as_deref(), Some("R-1"));
        assert_eq!(rows[0].status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_empty_records_are_dropped() {
        let xml = "<feed><reservation></reservation></feed>";
        assert!(parse_pms_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_noop_detection() {
        let incoming = PmsReservation {
            external_id: Some("PMS-1001".into()),
            status: BookingStatus::Confirmed,
            room: Some("12B".into()),
            ..Default::default()
        };
        assert!(is_noop(BookingStatus::Confirmed, Some("12B"), &incoming));
        // Status change and room change are both real updates.
        assert!(!is_noop(BookingStatus::Pending, Some("12B"), &incoming));
        assert!(!is_noop(BookingStatus::Confirmed, Some("14A"), &incoming));
        assert!(!is_noop(BookingStatus::Confirmed, None, &incoming));
    }

    // A feed row carrying no room element never erases the stored room: the
    // update COALESCEs it, and the diff treats it as unchanged so replays of
    // such a feed stay no-ops.
    #[test]
    fn test_missing_room_in_feed_is_not_a_change() {
        let incoming = PmsReservation {
            external_id: Some("PMS-1001".into()),
            status: BookingStatus::Confirmed,
            room: None,
            ..Default::default()
        };
        assert!(is_noop(BookingStatus::Confirmed, Some("12B"), &incoming));
        assert!(is_noop(BookingStatus::Confirmed, None, &incoming));
        assert!(!is_noop(BookingStatus::Pending, Some("12B"), &incoming));
    }

    #[test]
    fn test_replayed_feed_rows_diff_as_unchanged() {
        let rows = parse_pms_feed(FEED).unwrap();
        for row in &rows {
            assert!(is_noop(row.status, row.room.as_deref(), row));
        }
    }
}
