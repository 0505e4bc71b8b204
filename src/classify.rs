// src/classify.rs
//
// Batch Classifier: turns canonical rows + matcher results into actions with
// machine-checkable reasons, plus the summary counts the review UI shows.
// Structural problems are classifications, never errors; one bad row must
// not take the batch down.

use chrono::NaiveDate;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::matching::{self, BatchLookup};
use crate::models::{CanonicalRow, ImportAction, ImportDomain, ImportRow, MatchKind};
use crate::results::{AnalysisResult, ImportSummary};

pub const REASON_BLANK_ROW: &str = "Blank row";
pub const REASON_JUNK_VALUE: &str = "Junk sentinel value";
pub const REASON_DUPLICATE_IN_BATCH: &str = "Duplicate legacy ID in batch";
pub const REASON_UNPARSEABLE_DATE: &str = "Unparseable date";
pub const REASON_NO_MATCH: &str = "No existing match";
pub const REASON_HUMAN_OVERRIDE: &str = "Human override";

/// Sentinel strings the historical exports use to mean "nothing here".
const JUNK_SENTINELS: &[&str] = &[
    "n/a",
    "na",
    "none",
    "null",
    "ninguno",
    "no aplica",
    "cancelado",
    "sin nombre",
    "unknown",
    "desconocido",
    "x",
    "xx",
    "xxx",
];

static HAS_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]").unwrap());

/// True for blank text, known junk sentinels, and symbol-only strings.
pub fn is_junk_value(raw: &str) -> bool {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }
    if JUNK_SENTINELS.contains(&text.as_str()) {
        return true;
    }
    !HAS_ALPHANUMERIC.is_match(&text)
}

/// Persisted raw-name→product-id mappings (lowercased raw name as key),
/// used to short-circuit tour-name classification on repeat imports.
pub type TourNameMap = HashMap<String, String>;

/// Classifies one batch. `seen_legacy_ids` accumulates across the batch so a
/// spreadsheet that repeats a legacy id only imports the first occurrence.
pub fn analyze_rows(
    domain: ImportDomain,
    rows: Vec<CanonicalRow>,
    lookup: &BatchLookup,
    tour_names: &TourNameMap,
) -> AnalysisResult {
    let start = Instant::now();
    let mut seen_legacy_ids: HashSet<String> = HashSet::new();
    let mut unmapped_tour_names: Vec<String> = Vec::new();
    let mut seen_unmapped: HashSet<String> = HashSet::new();
    let mut analysis = Vec::with_capacity(rows.len());

    for (idx, row) in rows.into_iter().enumerate() {
        let row_number = idx + 1;
        let (action, reason, matched) =
            classify_row(&row, lookup, &mut seen_legacy_ids);

        if let CanonicalRow::TourBooking(booking) = &row {
            if let Some(name) = &booking.activity_name {
                let key = name.trim().to_lowercase();
                if !tour_names.contains_key(&key)
                    && !is_junk_value(name)
                    && seen_unmapped.insert(key)
                {
                    unmapped_tour_names.push(name.trim().to_string());
                }
            }
        }

        debug!(
            "Row {} ({}): {} [{}]",
            row_number,
            domain.as_str(),
            action.as_str(),
            reason
        );
        analysis.push(ImportRow {
            row_number,
            csv: row,
            matched,
            action,
            reason,
            user_date: None,
        });
    }

    let summary = ImportSummary::tally(&analysis);
    info!(
        "Classified {} {} rows in {:.2?}: {} create, {} update, {} conflict, {} skip, {} invalid date",
        summary.total,
        domain.as_str(),
        start.elapsed(),
        summary.create,
        summary.update,
        summary.conflict,
        summary.skip,
        summary.invalid_date
    );
    AnalysisResult {
        summary,
        analysis,
        unmapped_tour_names,
    }
}

fn classify_row(
    row: &CanonicalRow,
    lookup: &BatchLookup,
    seen_legacy_ids: &mut HashSet<String>,
) -> (ImportAction, String, Option<crate::models::MatchCandidate>) {
    // Structural checks first: a row we cannot identify at all is skipped
    // before any matching happens.
    if is_structurally_blank(row) {
        return (ImportAction::Skip, REASON_BLANK_ROW.to_string(), None);
    }
    if let Some(identity) = identity_text(row) {
        if is_junk_value(identity) {
            return (ImportAction::Skip, REASON_JUNK_VALUE.to_string(), None);
        }
    }
    if let Some(legacy_id) = row.legacy_id() {
        if !seen_legacy_ids.insert(legacy_id.trim().to_string()) {
            return (
                ImportAction::Skip,
                REASON_DUPLICATE_IN_BATCH.to_string(),
                None,
            );
        }
    }

    // A non-empty date that failed to parse needs a human-corrected date
    // before the row is eligible for commit.
    if let Some(raw) = failed_date(row) {
        return (
            ImportAction::InvalidDate,
            format!("{}: {}", REASON_UNPARSEABLE_DATE, raw),
            None,
        );
    }

    match matching::match_row(row, lookup) {
        Some(candidate) => {
            let reason = matching::reason_for(candidate.kind).to_string();
            let action = match candidate.kind {
                MatchKind::Contact => ImportAction::Conflict,
                MatchKind::LegacyId | MatchKind::NaturalKey => ImportAction::Update,
            };
            (action, reason, Some(candidate))
        }
        None => (ImportAction::Create, REASON_NO_MATCH.to_string(), None),
    }
}

fn is_structurally_blank(row: &CanonicalRow) -> bool {
    match row {
        CanonicalRow::Guest(r) => {
            r.legacy_id.is_none() && r.full_name.is_none() && r.email.is_none() && r.phone.is_none()
        }
        CanonicalRow::Vendor(r) => r.legacy_id.is_none() && r.name.is_none(),
        CanonicalRow::Transfer(r) => {
            r.legacy_id.is_none() && r.guest_name.is_none() && r.raw_date.is_none()
        }
        CanonicalRow::TourBooking(r) => {
            r.legacy_id.is_none()
                && r.guest_name.is_none()
                && r.activity_name.is_none()
                && r.raw_date.is_none()
        }
        CanonicalRow::Reservation(r) => {
            r.legacy_id.is_none() && r.guest_name.is_none() && r.raw_date.is_none()
        }
    }
}

/// The text that identifies the row to a human; a junk sentinel here means
/// the whole row is junk.
fn identity_text(row: &CanonicalRow) -> Option<&str> {
    match row {
        CanonicalRow::Guest(r) => r.full_name.as_deref(),
        CanonicalRow::Vendor(r) => r.name.as_deref(),
        CanonicalRow::Transfer(r) => r.guest_name.as_deref(),
        CanonicalRow::TourBooking(r) => r.guest_name.as_deref(),
        CanonicalRow::Reservation(r) => r.guest_name.as_deref(),
    }
}

/// The raw date text when it was present but did not parse.
fn failed_date(row: &CanonicalRow) -> Option<&str> {
    match row {
        CanonicalRow::Transfer(r) => match (&r.raw_date, r.transfer_date) {
            (Some(raw), None) => Some(raw.as_str()),
            _ => None,
        },
        CanonicalRow::TourBooking(r) => match (&r.raw_date, r.activity_date) {
            (Some(raw), None) => Some(raw.as_str()),
            _ => None,
        },
        CanonicalRow::Reservation(r) => match (&r.raw_date, r.arrival) {
            (Some(raw), None) => Some(raw.as_str()),
            _ => None,
        },
        // Guests and vendors carry no date columns.
        _ => None,
    }
}

/// Applies a human decision to an already-classified row. The matcher is not
/// re-run: the override simply replaces the action and reason. A corrected
/// date makes an INVALID_DATE row eligible for commit.
pub fn apply_override(
    row: &mut ImportRow,
    action: ImportAction,
    reason: Option<String>,
    user_date: Option<NaiveDate>,
) {
    row.action = action;
    row.reason = reason.unwrap_or_else(|| REASON_HUMAN_OVERRIDE.to_string());
    if user_date.is_some() {
        row.user_date = user_date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::EntityRef;
    use crate::models::{GuestRow, TourBookingRow, TransferRow};
    use chrono::NaiveDate;

    fn guest(legacy_id: Option<&str>, name: Option<&str>, email: Option<&str>) -> CanonicalRow {
        CanonicalRow::Guest(GuestRow {
            legacy_id: legacy_id.map(String::from),
            full_name: name.map(String::from),
            email: email.map(String::from),
            ..Default::default()
        })
    }

    fn entity(id: &str, name: &str) -> EntityRef {
        EntityRef {
            id: id.to_string(),
            label: name.to_string(),
            normalized_name: Some(name.to_lowercase()),
        }
    }

    #[test]
    fn test_junk_detection() {
        assert!(is_junk_value(""));
        assert!(is_junk_value("  "));
        assert!(is_junk_value("N/A"));
        assert!(is_junk_value("cancelado"));
        assert!(is_junk_value("???"));
        assert!(is_junk_value("---"));
        assert!(!is_junk_value("Maria Lopez"));
        assert!(!is_junk_value("G-17"));
    }

    #[test]
    fn test_blank_and_junk_rows_skip() {
        let rows = vec![
            guest(None, None, None),
            guest(None, Some("n/a"), None),
            guest(None, Some("Maria Lopez"), None),
        ];
        let result = analyze_rows(
            ImportDomain::Guest,
            rows,
            &BatchLookup::default(),
            &TourNameMap::new(),
        );
        assert_eq!(result.summary.skip, 2);
        assert_eq!(result.summary.create, 1);
        assert_eq!(result.analysis[0].reason, REASON_BLANK_ROW);
        assert_eq!(result.analysis[1].reason, REASON_JUNK_VALUE);
    }

    #[test]
    fn test_duplicate_legacy_id_in_batch_skips_second() {
        let rows = vec![
            guest(Some("G-17"), Some("Maria Lopez"), None),
            guest(Some("G-17"), Some("Maria Lopez"), None),
        ];
        let result = analyze_rows(
            ImportDomain::Guest,
            rows,
            &BatchLookup::default(),
            &TourNameMap::new(),
        );
        assert_eq!(result.summary.create, 1);
        assert_eq!(result.summary.skip, 1);
        assert_eq!(result.analysis[1].reason, REASON_DUPLICATE_IN_BATCH);
    }

    #[test]
    fn test_update_conflict_create_actions() {
        let mut lookup = BatchLookup::default();
        lookup
            .by_legacy_id
            .insert("G-1".to_string(), entity("id-1", "Maria Lopez"));
        lookup
            .by_email
            .insert("ana@example.com".to_string(), entity("id-2", "Ana Ruiz"));

        let rows = vec![
            guest(Some("G-1"), Some("Maria Lopez"), None),
            guest(None, Some("Ana Maria Ruiz"), Some("ana@example.com")),
            guest(None, Some("Nobody Known"), None),
        ];
        let result = analyze_rows(
            ImportDomain::Guest,
            rows,
            &lookup,
            &TourNameMap::new(),
        );
        assert_eq!(result.analysis[0].action, ImportAction::Update);
        assert_eq!(result.analysis[1].action, ImportAction::Conflict);
        assert_eq!(
            result.analysis[1].reason,
            matching::REASON_CONTACT_CONFLICT
        );
        assert_eq!(result.analysis[2].action, ImportAction::Create);
        assert_eq!(result.summary.conflict, 1);
    }

    #[test]
    fn test_invalid_date_classification() {
        let rows = vec![CanonicalRow::Transfer(TransferRow {
            guest_name: Some("Maria Lopez".to_string()),
            raw_date: Some("13/45/2024".to_string()),
            transfer_date: None,
            ..Default::default()
        })];
        let result = analyze_rows(
            ImportDomain::Transfer,
            rows,
            &BatchLookup::default(),
            &TourNameMap::new(),
        );
        assert_eq!(result.analysis[0].action, ImportAction::InvalidDate);
        assert!(result.analysis[0].reason.starts_with(REASON_UNPARSEABLE_DATE));
        assert_eq!(result.summary.invalid_date, 1);
    }

    // The spec-level scenario: a booking whose activity name already has a
    // persisted mapping classifies as a new booking without re-asking for
    // tour-name classification.
    #[test]
    fn test_mapped_tour_name_short_circuits() {
        let mut tour_names = TourNameMap::new();
        tour_names.insert("snorkel trip".to_string(), "prod-1".to_string());

        let rows = vec![CanonicalRow::TourBooking(TourBookingRow {
            legacy_id: Some("42".to_string()),
            guest_name: Some("Maria Lopez".to_string()),
            activity_name: Some("Snorkel trip".to_string()),
            raw_date: Some("3/5/24".to_string()),
            activity_date: NaiveDate::from_ymd_opt(2024, 3, 5),
            ..Default::default()
        })];
        let result = analyze_rows(
            ImportDomain::TourBooking,
            rows,
            &BatchLookup::default(),
            &tour_names,
        );
        assert_eq!(result.analysis[0].action, ImportAction::Create);
        assert!(result.unmapped_tour_names.is_empty());
        match &result.analysis[0].csv {
            CanonicalRow::TourBooking(r) => {
                assert_eq!(r.activity_date, NaiveDate::from_ymd_opt(2024, 3, 5));
            }
            other => panic!("unexpected row: {:?}", other),
        }
    }

    #[test]
    fn test_unmapped_tour_name_is_collected_once() {
        let booking = |name: &str| {
            CanonicalRow::TourBooking(TourBookingRow {
                guest_name: Some("Maria Lopez".to_string()),
                activity_name: Some(name.to_string()),
                raw_date: Some("3/5/24".to_string()),
                activity_date: NaiveDate::from_ymd_opt(2024, 3, 5),
                ..Default::default()
            })
        };
        let rows = vec![booking("Snorkel trip"), booking("snorkel TRIP")];
        let result = analyze_rows(
            ImportDomain::TourBooking,
            rows,
            &BatchLookup::default(),
            &TourNameMap::new(),
        );
        assert_eq!(result.unmapped_tour_names, vec!["Snorkel trip"]);
    }

    #[test]
    fn test_apply_override_resolves_conflict() {
        let mut row = ImportRow {
            row_number: 1,
            csv: guest(None, Some("Ana"), None),
            matched: None,
            action: ImportAction::Conflict,
            reason: matching::REASON_CONTACT_CONFLICT.to_string(),
            user_date: None,
        };
        apply_override(&mut row, ImportAction::Update, None, None);
        assert_eq!(row.action, ImportAction::Update);
        assert_eq!(row.reason, REASON_HUMAN_OVERRIDE);
    }

    #[test]
    fn test_all_skip_is_valid_analysis() {
        let rows = vec![guest(None, Some("n/a"), None), guest(None, None, None)];
        let result = analyze_rows(
            ImportDomain::Guest,
            rows,
            &BatchLookup::default(),
            &TourNameMap::new(),
        );
        assert_eq!(result.summary.skip, result.summary.total);
    }
}
