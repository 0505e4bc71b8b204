// src/models.rs

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use postgres_types::{FromSql, IsNull, ToSql, Type};
use serde::{Deserialize, Serialize};
use std::error::Error;

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Newtype pattern so guest/vendor/product ids can never be mixed up in a
// merge or relink call.

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl ToSql for $name {
            fn to_sql(
                &self,
                ty: &Type,
                out: &mut BytesMut,
            ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
                self.0.to_sql(ty, out)
            }

            fn accepts(ty: &Type) -> bool {
                <String as ToSql>::accepts(ty)
            }

            fn to_sql_checked(
                &self,
                ty: &Type,
                out: &mut BytesMut,
            ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
                self.0.to_sql_checked(ty, out)
            }
        }

        impl<'a> FromSql<'a> for $name {
            fn from_sql(ty: &Type, raw: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
                let s = String::from_sql(ty, raw)?;
                Ok($name(s))
            }

            fn accepts(ty: &Type) -> bool {
                <String as FromSql>::accepts(ty)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Strongly typed identifier for Guest records
    GuestId
);
string_id!(
    /// Strongly typed identifier for Vendor records
    VendorId
);
string_id!(
    /// Strongly typed identifier for TourProduct records
    TourProductId
);
string_id!(
    /// Strongly typed identifier for Reservation records
    ReservationId
);

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// A guest identity record.
///
/// The goal is at most one live Guest per real person, but duplicates can
/// transiently exist until a human-approved merge folds them together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub id: GuestId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub notes: Option<String>,

    /// Opaque keys from prior systems; the durable join key across repeated
    /// imports of the same historical export. Never normalized.
    pub legacy_ids: Vec<String>,

    /// Append-only array of JSON snapshots of merged-away guests. Audit trail
    /// for a human to see what got folded in; never mutated after append.
    pub legacy_profiles: serde_json::Value,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A service-provider identity record, with the same duplicate/merge
/// dynamics as Guest but scoped separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: Option<String>,
    pub category: Option<String>,
    /// UI color tag, carried through merges untouched.
    pub color: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub legacy_id: Option<String>,
    pub active: bool,
    pub legacy_profiles: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A canonical named activity, optionally linked to a vendor. Created
/// manually or by the tour-name-grouping step when a CSV name cluster is
/// classified as "new".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourProduct {
    pub id: TourProductId,
    pub name: String,
    pub vendor_id: Option<VendorId>,
    pub created_at: NaiveDateTime,
}

//------------------------------------------------------------------------------
// BOOKING STATUS
//------------------------------------------------------------------------------

/// Closed status vocabulary all localized source statuses normalize into.
/// Pending is the default: an unknown status is safer to re-review than to
/// guess at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "confirmed" => Self::Confirmed,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "no_show" => Self::NoShow,
            _ => Self::Pending,
        }
    }
}

//------------------------------------------------------------------------------
// CANONICAL ROWS
//------------------------------------------------------------------------------
// Typed per-domain rows produced by the Canonicalizer. All fields optional:
// historical exports omit anything. Legacy ids pass through byte-for-byte.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestRow {
    pub legacy_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorRow {
    pub legacy_id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferRow {
    pub legacy_id: Option<String>,
    pub transfer_date: Option<NaiveDate>,
    /// Raw date text as it appeared in the source; kept so a failed parse can
    /// be surfaced to the reviewer verbatim.
    pub raw_date: Option<String>,
    pub guest_name: Option<String>,
    pub guest_legacy_id: Option<String>,
    pub vendor_legacy_id: Option<String>,
    pub pickup: Option<String>,
    pub dropoff: Option<String>,
    pub num_guests: i32,
    pub price: Option<f64>,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TourBookingRow {
    pub legacy_id: Option<String>,
    pub activity_date: Option<NaiveDate>,
    pub raw_date: Option<String>,
    /// Raw activity name; resolved to a TourProduct through the persisted
    /// name mappings, or surfaced for classification when unmapped.
    pub activity_name: Option<String>,
    pub guest_name: Option<String>,
    pub guest_legacy_id: Option<String>,
    pub vendor_legacy_id: Option<String>,
    pub num_guests: i32,
    pub price: Option<f64>,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationRow {
    pub legacy_id: Option<String>,
    pub guest_name: Option<String>,
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
    pub raw_date: Option<String>,
    pub room: Option<String>,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

/// Union of the per-domain canonical rows carried through one import batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "fields", rename_all = "snake_case")]
pub enum CanonicalRow {
    Guest(GuestRow),
    Vendor(VendorRow),
    Transfer(TransferRow),
    TourBooking(TourBookingRow),
    Reservation(ReservationRow),
}

impl CanonicalRow {
    /// The legacy external identifier, if the source carried one.
    pub fn legacy_id(&self) -> Option<&str> {
        match self {
            Self::Guest(r) => r.legacy_id.as_deref(),
            Self::Vendor(r) => r.legacy_id.as_deref(),
            Self::Transfer(r) => r.legacy_id.as_deref(),
            Self::TourBooking(r) => r.legacy_id.as_deref(),
            Self::Reservation(r) => r.legacy_id.as_deref(),
        }
    }
}

/// Source domains an uploaded file can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportDomain {
    Guest,
    Vendor,
    Transfer,
    TourBooking,
    Reservation,
}

impl ImportDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Vendor => "vendor",
            Self::Transfer => "transfer",
            Self::TourBooking => "tour_booking",
            Self::Reservation => "reservation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "guest" | "guests" => Some(Self::Guest),
            "vendor" | "vendors" => Some(Self::Vendor),
            "transfer" | "transfers" => Some(Self::Transfer),
            "tour_booking" | "tour_bookings" | "tour" | "tours" => Some(Self::TourBooking),
            "reservation" | "reservations" => Some(Self::Reservation),
            _ => None,
        }
    }
}

//------------------------------------------------------------------------------
// CLASSIFICATION TYPES
//------------------------------------------------------------------------------

/// Action assigned to each import row. Serialized as the UPPER_SNAKE strings
/// the review UI round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportAction {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "SKIP")]
    Skip,
    #[serde(rename = "INVALID_DATE")]
    InvalidDate,
}

impl ImportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Conflict => "CONFLICT",
            Self::Skip => "SKIP",
            Self::InvalidDate => "INVALID_DATE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "CONFLICT" => Some(Self::Conflict),
            "SKIP" => Some(Self::Skip),
            "INVALID_DATE" => Some(Self::InvalidDate),
            _ => None,
        }
    }
}

/// How a match candidate was found, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Exact match on a trimmed legacy external identifier.
    LegacyId,
    /// Exact match on the domain's natural key (name, or date+vendor
    /// composite for transfers and tours).
    NaturalKey,
    /// Same email or phone but a different name. Surfaced as CONFLICT for a
    /// human decision, never auto-merged.
    Contact,
}

/// An existing entity a row resolved to, plus how it was found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: String,
    /// Human-readable label for the review table (name, or name + date).
    pub label: String,
    pub kind: MatchKind,
}

/// One unit of work during import analysis. Created by the Canonicalizer,
/// classified by the matcher, possibly overridden by a human, consumed by the
/// Batch Commit Executor. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    /// Stable position in the uploaded file (1-based, excluding the header),
    /// used as the row reference in error reports.
    pub row_number: usize,
    pub csv: CanonicalRow,
    #[serde(rename = "match")]
    pub matched: Option<MatchCandidate>,
    pub action: ImportAction,
    pub reason: String,
    /// Human-supplied corrected date for an approved INVALID_DATE row.
    #[serde(rename = "userDate", skip_serializing_if = "Option::is_none")]
    pub user_date: Option<NaiveDate>,
}

//------------------------------------------------------------------------------
// DUPLICATE DISCOVERY TYPES
//------------------------------------------------------------------------------

/// One member of a duplicate cluster, annotated with its dependent-record
/// weight. The top-weighted member is the advisory merge survivor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub guest: Guest,
    /// Reservations weighted per config::RESERVATION_WEIGHT, every other
    /// dependent record at 1.
    pub weight: i64,
    pub reservation_count: i64,
    pub other_dependent_count: i64,
}

/// A group of guests sharing a duplicate fingerprint, members ranked
/// weight-descending. Advisory only: merges always require a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub fingerprint: String,
    pub members: Vec<ClusterMember>,
}

/// A guest suggested as the true owner of an orphaned reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanCandidate {
    pub guest_id: GuestId,
    pub full_name: Option<String>,
    pub similarity: f64,
}

/// A reservation whose guest link is missing or looks wrongly linked:
/// either the FK is null, or the linked guest's last name does not appear in
/// the reservation's raw legacy guest-name string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanReservation {
    pub reservation_id: ReservationId,
    pub raw_guest_name: Option<String>,
    pub linked_guest_id: Option<GuestId>,
    pub linked_guest_name: Option<String>,
    pub candidates: Vec<OrphanCandidate>,
}
