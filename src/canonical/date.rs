// src/canonical/date.rs

use chrono::{Datelike, NaiveDate};
use log::trace;

use crate::config;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Parses the date formats seen across the historical exports:
/// `M/D/YYYY`, `M/D/YY` (anchored to the 2000s), `YYYY-MM-DD` (with a
/// month/day transposition heuristic), and long-form
/// `Weekday, Month D, YYYY`. Returns None on anything else; years outside
/// the plausible bound are failures, never clamped.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = parse_slash_date(text) {
        return Some(date);
    }
    if let Some(date) = parse_iso_date(text) {
        return Some(date);
    }
    if let Some(date) = parse_long_form(text) {
        return Some(date);
    }
    trace!("Unparseable date text: {:?}", text);
    None
}

fn year_is_plausible(year: i32) -> bool {
    (config::PLAUSIBLE_YEAR_MIN..=config::PLAUSIBLE_YEAR_MAX).contains(&year)
}

/// `M/D/YYYY` or `M/D/YY`.
fn parse_slash_date(text: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.split('/').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let month: u32 = parts[0].parse().ok()?;
    let day: u32 = parts[1].parse().ok()?;
    let mut year: i32 = parts[2].parse().ok()?;
    if parts[2].len() <= 2 {
        year += config::TWO_DIGIT_YEAR_ANCHOR;
    }
    if !year_is_plausible(year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `YYYY-MM-DD`, with a swap heuristic: a "month" over 12 paired with a
/// "day" of at most 12 indicates a transposed export, so the two are
/// exchanged.
fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.split('-').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let year: i32 = parts[0].parse().ok()?;
    let mut month: u32 = parts[1].parse().ok()?;
    let mut day: u32 = parts[2].parse().ok()?;
    if !year_is_plausible(year) {
        return None;
    }
    if month > 12 && day <= 12 {
        std::mem::swap(&mut month, &mut day);
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `Weekday, Month D, YYYY` in English. The weekday token is ignored rather
/// than validated; exports routinely carry the wrong one.
fn parse_long_form(text: &str) -> Option<NaiveDate> {
    let after_weekday = match text.split_once(',') {
        Some((_, rest)) => rest.trim(),
        None => text,
    };
    let (month_name, rest) = after_weekday.split_once(' ')?;
    let month = MONTH_NAMES
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month_name))
        .map(|idx| idx as u32 + 1)?;
    let (day_text, year_text) = rest.split_once(',')?;
    let day: u32 = day_text.trim().parse().ok()?;
    let year: i32 = year_text.trim().parse().ok()?;
    if !year_is_plausible(year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Isolated repair rule for one known-dirty historical export whose date
/// column carries garbage years (e.g. 2923): anything beyond the cutoff
/// collapses to the documented fallback year. Only call sites ingesting that
/// specific export apply this; it is deliberately not part of
/// parse_flexible_date.
pub fn repair_legacy_export_year(date: NaiveDate) -> NaiveDate {
    if date.year() > config::LEGACY_EXPORT_YEAR_CUTOFF {
        date.with_year(config::LEGACY_EXPORT_FALLBACK_YEAR)
            .unwrap_or(date)
    } else {
        date
    }
}

/// Parse variant for the known-dirty export column: component parsing is
/// done without the plausibility bound so a garbage year like 2923 survives
/// long enough for repair_legacy_export_year to collapse it.
pub fn parse_legacy_export_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let (year, month, day) = if text.contains('/') {
        let parts: Vec<&str> = text.split('/').map(str::trim).collect();
        if parts.len() != 3 {
            return None;
        }
        let mut year: i32 = parts[2].parse().ok()?;
        if parts[2].len() <= 2 {
            year += config::TWO_DIGIT_YEAR_ANCHOR;
        }
        (year, parts[0].parse().ok()?, parts[1].parse().ok()?)
    } else if text.contains('-') {
        let parts: Vec<&str> = text.split('-').map(str::trim).collect();
        if parts.len() != 3 {
            return None;
        }
        (
            parts[0].parse().ok()?,
            parts[1].parse().ok()?,
            parts[2].parse().ok()?,
        )
    } else {
        return None;
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let repaired = repair_legacy_export_year(date);
    if year_is_plausible(repaired.year()) {
        Some(repaired)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_slash_four_digit_year() {
        assert_eq!(parse_flexible_date("3/5/2024"), Some(d(2024, 3, 5)));
        assert_eq!(parse_flexible_date("12/31/1999"), Some(d(1999, 12, 31)));
    }

    #[test]
    fn test_slash_two_digit_year_anchor() {
        // Two-digit years anchor to the 2000s, so 99 is 2099, not 1999.
        assert_eq!(parse_flexible_date("1/1/99"), Some(d(2099, 1, 1)));
        assert_eq!(parse_flexible_date("6/15/07"), Some(d(2007, 6, 15)));
    }

    #[test]
    fn test_impossible_month_day_fails() {
        assert_eq!(parse_flexible_date("13/45/2024"), None);
        assert_eq!(parse_flexible_date("0/10/2024"), None);
    }

    #[test]
    fn test_leap_year() {
        assert_eq!(parse_flexible_date("02/29/2024"), Some(d(2024, 2, 29)));
        assert_eq!(parse_flexible_date("02/29/2023"), None);
    }

    #[test]
    fn test_iso_and_transposition() {
        assert_eq!(parse_flexible_date("2024-03-05"), Some(d(2024, 3, 5)));
        // Transposed day/month export: month 25 is impossible, day 3 fits.
        assert_eq!(parse_flexible_date("2024-25-03"), Some(d(2024, 3, 25)));
        // Both over 12 is not repairable.
        assert_eq!(parse_flexible_date("2024-25-13"), None);
    }

    #[test]
    fn test_long_form() {
        assert_eq!(
            parse_flexible_date("Tuesday, March 5, 2024"),
            Some(d(2024, 3, 5))
        );
        // The weekday token is not validated.
        assert_eq!(
            parse_flexible_date("Friday, March 5, 2024"),
            Some(d(2024, 3, 5))
        );
    }

    #[test]
    fn test_implausible_years_fail() {
        assert_eq!(parse_flexible_date("1/1/1889"), None);
        assert_eq!(parse_flexible_date("1/1/2923"), None);
        assert_eq!(parse_flexible_date("2923-01-15"), None);
    }

    #[test]
    fn test_blank_and_junk_fail() {
        assert_eq!(parse_flexible_date(""), None);
        assert_eq!(parse_flexible_date("   "), None);
        assert_eq!(parse_flexible_date("mañana"), None);
        assert_eq!(parse_flexible_date("3/5"), None);
    }

    // The year-collapse repair is tested in isolation from general parsing:
    // it applies only to the one known-dirty export column.
    #[test]
    fn test_repair_legacy_export_year() {
        assert_eq!(
            repair_legacy_export_year(d(2923, 1, 15)),
            d(2024, 1, 15)
        );
        assert_eq!(
            repair_legacy_export_year(d(2031, 6, 1)),
            d(2024, 6, 1)
        );
        // At or below the cutoff, dates pass through untouched.
        assert_eq!(repair_legacy_export_year(d(2030, 6, 1)), d(2030, 6, 1));
        assert_eq!(repair_legacy_export_year(d(2024, 2, 29)), d(2024, 2, 29));
    }

    #[test]
    fn test_parse_legacy_export_date_coerces_garbage_year() {
        assert_eq!(
            parse_legacy_export_date("1/15/2923"),
            Some(d(2024, 1, 15))
        );
        assert_eq!(
            parse_legacy_export_date("2923-01-15"),
            Some(d(2024, 1, 15))
        );
        // Sane dates on the dirty column pass through unchanged.
        assert_eq!(parse_legacy_export_date("3/5/2024"), Some(d(2024, 3, 5)));
    }
}
