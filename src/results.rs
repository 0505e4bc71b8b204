// src/results.rs
//
// Result shapes handed back to the HTTP collaborators. Everything here is
// serde-serializable; the web layer returns these as JSON bodies.

use serde::{Deserialize, Serialize};

use crate::models::{ImportAction, ImportRow};

/// Batch-level counts shown above the review table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub total: usize,
    pub create: usize,
    pub update: usize,
    pub conflict: usize,
    pub skip: usize,
    pub invalid_date: usize,
}

impl ImportSummary {
    pub fn tally(rows: &[ImportRow]) -> Self {
        let mut summary = ImportSummary {
            total: rows.len(),
            ..Default::default()
        };
        for row in rows {
            match row.action {
                ImportAction::Create => summary.create += 1,
                ImportAction::Update => summary.update += 1,
                ImportAction::Conflict => summary.conflict += 1,
                ImportAction::Skip => summary.skip += 1,
                ImportAction::InvalidDate => summary.invalid_date += 1,
            }
        }
        summary
    }
}

/// Full analysis returned after canonicalization + classification. An
/// all-SKIP analysis is a valid, non-error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: ImportSummary,
    pub analysis: Vec<ImportRow>,
    /// Tour activity names with no persisted product mapping yet; these need
    /// human classification before their bookings can be committed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped_tour_names: Vec<String>,
}

/// One failed row in a commit, with enough context to find the bad record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    /// Stable row reference: the legacy id when present, else the row number.
    pub row_ref: String,
    pub message: String,
}

/// Outcome of a batch commit. Errors never abort the batch; the counts
/// cover only what actually happened.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
}

/// Outcome of a PMS feed import. `unchanged` counts true no-ops detected by
/// diffing, so replaying an unchanged feed reports unchanged == total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PmsImportResult {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: Vec<RowError>,
}

/// Outcome of a completed merge, for the caller's audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub primary_id: String,
    pub secondary_id: String,
    /// Rows relinked per dependent table, in relink order.
    pub relinked: Vec<(String, u64)>,
    /// Legacy ids folded from the secondary into the primary.
    pub legacy_ids_added: usize,
}
