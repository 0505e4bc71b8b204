// src/lib.rs
pub mod canonical;
pub mod classify;
pub mod cluster;
pub mod commit;
pub mod config;
pub mod db;
pub mod matching;
pub mod merge;
pub mod models;
pub mod pms;
pub mod results;

// Re-export common types for easier access
pub use models::{
    BookingStatus, CanonicalRow, DuplicateCluster, Guest, GuestId, ImportAction, ImportDomain,
    ImportRow, MatchCandidate, MatchKind, OrphanReservation, ReservationId, TourProductId, Vendor,
    VendorId,
};

// Re-export important functionality
pub use classify::analyze_rows;
pub use db::PgPool;
pub use results::{AnalysisResult, CommitOutcome, ImportSummary, MergeOutcome, PmsImportResult};
