// src/config.rs
//
// Every silent data-repair decision the engine makes lives here as a named
// constant, so a reviewer can find and challenge each one in a single place.

/// Two-digit years in legacy spreadsheet exports are anchored to the 2000s
/// ("1/1/99" parses as 2099-01-01, not 1999). The historical tooling that
/// produced these files never predates 2000.
pub const TWO_DIGIT_YEAR_ANCHOR: i32 = 2000;

/// Years outside this range are treated as parse failures, never clamped.
pub const PLAUSIBLE_YEAR_MIN: i32 = 1990;
pub const PLAUSIBLE_YEAR_MAX: i32 = 2100;

/// One known-dirty export wrote garbage years (e.g. 2923) into its date
/// column. Years beyond this cutoff on that column collapse to
/// LEGACY_EXPORT_FALLBACK_YEAR. Applies only via
/// canonical::date::repair_legacy_export_year, never to general parsing.
pub const LEGACY_EXPORT_YEAR_CUTOFF: i32 = 2030;
pub const LEGACY_EXPORT_FALLBACK_YEAR: i32 = 2024;

/// Historical exports leave guest counts blank or garbled; a booking always
/// involves at least one guest, so unparseable counts default to 1.
pub const DEFAULT_GUEST_COUNT: i32 = 1;

/// Duplicate-cluster scans are paged for human review; the UI shows at most
/// this many clusters per call.
pub const MAX_DUPLICATE_CLUSTERS: usize = 30;

/// A reservation is the strongest signal that a guest profile is the real
/// one, so it counts this much toward a cluster member's weight. Every other
/// dependent record counts 1.
pub const RESERVATION_WEIGHT: i64 = 3;

/// Orphan fixing suggests at most this many candidate guests per record.
pub const MAX_ORPHAN_CANDIDATES: usize = 3;

/// Minimum Jaro-Winkler last-name similarity for an orphan candidate.
pub const ORPHAN_CANDIDATE_MIN_SIMILARITY: f64 = 0.85;
