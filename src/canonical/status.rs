// src/canonical/status.rs

use crate::models::BookingStatus;

// Closed synonym table covering the English and Spanish status vocabularies
// seen across the historical exports, including the common misspellings.
const CONFIRMED: &[&str] = &[
    "confirmed",
    "confirm",
    "confirmado",
    "confirmada",
    "confimado",
    "reservado",
    "booked",
    "ok",
    "si",
    "sí",
    "yes",
];

const COMPLETED: &[&str] = &[
    "completed",
    "complete",
    "done",
    "completado",
    "completada",
    "finalizado",
    "finalizada",
    "realizado",
    "realizada",
];

const CANCELLED: &[&str] = &[
    "cancelled",
    "canceled",
    "cancel",
    "cancelado",
    "cancelada",
    "cancelacion",
    "cancelación",
    "cx",
];

const NO_SHOW: &[&str] = &[
    "no show",
    "no-show",
    "no_show",
    "noshow",
    "no se presento",
    "no se presentó",
    "no llego",
    "no llegó",
];

const PENDING: &[&str] = &[
    "pending",
    "pendiente",
    "por confirmar",
    "tentative",
    "tentativo",
    "en espera",
];

/// Maps a localized free-text status onto the closed BookingStatus set.
/// Unrecognized input defaults to Pending: an unknown status is safer to
/// re-review than to guess at.
pub fn normalize_status(raw: &str) -> BookingStatus {
    let text = raw.trim().to_lowercase();
    if text.is_empty() {
        return BookingStatus::Pending;
    }
    if CONFIRMED.contains(&text.as_str()) {
        BookingStatus::Confirmed
    } else if COMPLETED.contains(&text.as_str()) {
        BookingStatus::Completed
    } else if CANCELLED.contains(&text.as_str()) {
        BookingStatus::Cancelled
    } else if NO_SHOW.contains(&text.as_str()) {
        BookingStatus::NoShow
    } else if PENDING.contains(&text.as_str()) {
        BookingStatus::Pending
    } else {
        BookingStatus::Pending
    }
}
