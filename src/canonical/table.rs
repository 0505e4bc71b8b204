// src/canonical/table.rs

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;

/// One source row as a flat header→value map, headers already normalized.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    /// Returns the first synonym with a non-empty value. Synonym lists are
    /// ordered strongest-first (English name, Spanish name, abbreviations).
    pub fn first_of(&self, synonyms: &[&str]) -> Option<&str> {
        for key in synonyms {
            if let Some(value) = self.fields.get(*key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
        None
    }

    pub fn first_of_owned(&self, synonyms: &[&str]) -> Option<String> {
        self.first_of(synonyms).map(|s| s.to_string())
    }

    /// True when every field is blank.
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

/// Lower-cases a header, collapses whitespace runs to underscores, and strips
/// everything that is not alphanumeric or underscore, so "  Fecha Llegada "
/// and "fecha_llegada" resolve to the same key.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for ch in raw.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_underscore = false;
        } else if ch.is_whitespace() || ch == '_' || ch == '-' {
            if !last_was_underscore && !out.is_empty() {
                out.push('_');
                last_was_underscore = true;
            }
        }
        // Any other punctuation is dropped.
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Parses comma-delimited text (double-quote escaping, embedded commas inside
/// quotes) into an ordered sequence of RawRecords. Rows shorter or longer
/// than the header are tolerated; missing cells read as empty.
pub fn parse_delimited(content: &str) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(normalize_header)
        .collect();
    debug!("Resolved {} normalized headers", headers.len());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let mut fields = HashMap::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            if header.is_empty() {
                continue;
            }
            let value = record.get(idx).unwrap_or("").to_string();
            fields.insert(header.clone(), value);
        }
        records.push(RawRecord::new(fields));
    }
    debug!("Parsed {} raw records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Fecha Llegada "), "fecha_llegada");
        assert_eq!(normalize_header("Guest  Name"), "guest_name");
        assert_eq!(normalize_header("E-mail"), "e_mail");
        assert_eq!(normalize_header("Precio ($)"), "precio");
        assert_eq!(normalize_header("ID"), "id");
    }

    #[test]
    fn test_parse_delimited_quoted_commas() {
        let csv = "name,notes\n\"Lopez, Maria\",\"likes \"\"quiet\"\" rooms\"\n";
        let records = parse_delimited(csv).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].first_of(&["name"]), Some("Lopez, Maria"));
        assert_eq!(
            records[0].first_of(&["notes"]),
            Some("likes \"quiet\" rooms")
        );
    }

    #[test]
    fn test_first_of_synonym_order() {
        let csv = "huesped,guest_name\nMaria Lopez,\n";
        let records = parse_delimited(csv).unwrap();
        // guest_name is empty, so the Spanish synonym wins.
        assert_eq!(
            records[0].first_of(&["guest_name", "huesped"]),
            Some("Maria Lopez")
        );
    }

    #[test]
    fn test_short_row_reads_as_empty() {
        let csv = "a,b,c\n1,2\n";
        let records = parse_delimited(csv).unwrap();
        assert_eq!(records[0].first_of(&["c"]), None);
        assert_eq!(records[0].first_of(&["b"]), Some("2"));
    }

    #[test]
    fn test_blank_row() {
        let csv = "a,b\n,\n";
        let records = parse_delimited(csv).unwrap();
        assert!(records[0].is_blank());
    }
}
