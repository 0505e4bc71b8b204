// src/matching/mod.rs
//
// Identity Matcher: classify one canonical row against the existing store.
// Strategies run in strict order, first hit wins. A contact match with a
// different name is surfaced as a conflict, never resolved automatically:
// a wrongful auto-merge is irreversible, an extra human click is not.

pub mod lookup;

pub use lookup::{composite_key, normalize_name_key, BatchLookup, EntityRef};

use crate::models::{CanonicalRow, MatchCandidate, MatchKind};

pub const REASON_LEGACY_ID: &str = "Legacy ID match";
pub const REASON_NATURAL_KEY: &str = "Name/Composite match";
pub const REASON_CONTACT_CONFLICT: &str = "Contact match with different name";

/// Looks a canonical row up against the batch's key maps. Returns the match
/// candidate, if any; the kind tells the classifier whether this is a safe
/// update target or a conflict needing a human decision.
pub fn match_row(row: &CanonicalRow, lookup: &BatchLookup) -> Option<MatchCandidate> {
    // Tier 1: exact legacy external identifier, the strongest signal.
    if let Some(legacy_id) = row.legacy_id() {
        if let Some(entity) = lookup.by_legacy_id.get(legacy_id.trim()) {
            return Some(candidate(entity, MatchKind::LegacyId));
        }
    }

    // Tier 2: natural key.
    if let Some(key) = natural_key(row) {
        if let Some(entity) = lookup.by_natural_key.get(&key) {
            return Some(candidate(entity, MatchKind::NaturalKey));
        }
    }

    // Tier 3: contact fields. Only meaningful when the name differs from the
    // stored record; an identical name would have hit tier 2.
    let (row_name, email, phone) = contact_fields(row);
    let contact_hit = email
        .and_then(|e| lookup.by_email.get(&e.trim().to_lowercase()))
        .or_else(|| phone.and_then(|p| lookup.by_phone.get(p.trim())));
    if let Some(entity) = contact_hit {
        let same_name = match (&row_name, &entity.normalized_name) {
            (Some(a), Some(b)) => normalize_name_key(a) == *b,
            _ => false,
        };
        if !same_name {
            return Some(candidate(entity, MatchKind::Contact));
        }
        // Same name reached through contact only: the natural key map did
        // not contain it (e.g. batch harvested no name), treat as natural.
        return Some(candidate(entity, MatchKind::NaturalKey));
    }

    None
}

/// The reason string carried on the row for the given match kind.
pub fn reason_for(kind: MatchKind) -> &'static str {
    match kind {
        MatchKind::LegacyId => REASON_LEGACY_ID,
        MatchKind::NaturalKey => REASON_NATURAL_KEY,
        MatchKind::Contact => REASON_CONTACT_CONFLICT,
    }
}

fn candidate(entity: &EntityRef, kind: MatchKind) -> MatchCandidate {
    MatchCandidate {
        id: entity.id.clone(),
        label: entity.label.clone(),
        kind,
    }
}

fn natural_key(row: &CanonicalRow) -> Option<String> {
    match row {
        CanonicalRow::Guest(r) => r.full_name.as_deref().map(normalize_name_key),
        CanonicalRow::Vendor(r) => r.name.as_deref().map(normalize_name_key),
        CanonicalRow::Transfer(r) => match (r.transfer_date, r.vendor_legacy_id.as_deref()) {
            (Some(date), Some(vendor)) => Some(composite_key(date, vendor)),
            _ => None,
        },
        CanonicalRow::TourBooking(r) => match (r.activity_date, r.vendor_legacy_id.as_deref()) {
            (Some(date), Some(vendor)) => Some(composite_key(date, vendor)),
            _ => None,
        },
        // Reservations key on the legacy (PMS) id alone.
        CanonicalRow::Reservation(_) => None,
    }
}

fn contact_fields(row: &CanonicalRow) -> (Option<String>, Option<&str>, Option<&str>) {
    match row {
        CanonicalRow::Guest(r) => (
            r.full_name.clone(),
            r.email.as_deref(),
            r.phone.as_deref(),
        ),
        CanonicalRow::Vendor(r) => (r.name.clone(), r.email.as_deref(), r.phone.as_deref()),
        // Dependent-record domains carry no contact columns of their own.
        _ => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuestRow;
    use std::collections::HashMap;

    fn entity(id: &str, name: &str) -> EntityRef {
        EntityRef {
            id: id.to_string(),
            label: name.to_string(),
            normalized_name: Some(normalize_name_key(name)),
        }
    }

    fn guest_row(legacy_id: Option<&str>, name: Option<&str>, email: Option<&str>) -> CanonicalRow {
        CanonicalRow::Guest(GuestRow {
            legacy_id: legacy_id.map(String::from),
            full_name: name.map(String::from),
            email: email.map(String::from),
            ..Default::default()
        })
    }

    fn lookup_with(
        legacy: &[(&str, EntityRef)],
        names: &[(&str, EntityRef)],
        emails: &[(&str, EntityRef)],
    ) -> BatchLookup {
        BatchLookup {
            by_legacy_id: legacy
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            by_natural_key: names
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            by_email: emails
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            by_phone: HashMap::new(),
        }
    }

    #[test]
    fn test_legacy_id_wins_over_everything() {
        let lookup = lookup_with(
            &[("G-17", entity("id-1", "Maria Lopez"))],
            &[("maria lopez", entity("id-2", "Maria Lopez"))],
            &[],
        );
        let row = guest_row(Some("G-17"), Some("Maria Lopez"), None);
        let m = match_row(&row, &lookup).unwrap();
        assert_eq!(m.id, "id-1");
        assert_eq!(m.kind, MatchKind::LegacyId);
        assert_eq!(reason_for(m.kind), "Legacy ID match");
    }

    #[test]
    fn test_name_match_case_insensitive() {
        let lookup = lookup_with(&[], &[("maria lopez", entity("id-2", "Maria Lopez"))], &[]);
        let row = guest_row(None, Some("MARIA LOPEZ"), None);
        let m = match_row(&row, &lookup).unwrap();
        assert_eq!(m.id, "id-2");
        assert_eq!(m.kind, MatchKind::NaturalKey);
    }

    #[test]
    fn test_contact_match_with_different_name_is_conflict() {
        let lookup = lookup_with(
            &[],
            &[],
            &[("maria@example.com", entity("id-3", "Maria Lopez"))],
        );
        let row = guest_row(None, Some("M. Lopez Garcia"), Some("maria@example.com"));
        let m = match_row(&row, &lookup).unwrap();
        assert_eq!(m.id, "id-3");
        assert_eq!(m.kind, MatchKind::Contact);
        assert_eq!(reason_for(m.kind), "Contact match with different name");
    }

    #[test]
    fn test_no_match_at_all() {
        let lookup = BatchLookup::default();
        let row = guest_row(Some("G-99"), Some("New Person"), Some("new@example.com"));
        assert!(match_row(&row, &lookup).is_none());
    }
}
