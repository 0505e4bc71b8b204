// src/canonical/mod.rs
//
// Canonicalizer: raw delimited text / XML into typed per-domain rows.
// Header synonym resolution is the only place untyped access happens; from
// here on everything is an explicit struct field.

pub mod date;
pub mod rows;
pub mod status;
pub mod table;

pub use date::{parse_flexible_date, parse_legacy_export_date, repair_legacy_export_year};
pub use rows::canonical_row;
pub use status::normalize_status;
pub use table::{parse_delimited, RawRecord};
