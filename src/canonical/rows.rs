// src/canonical/rows.rs
//
// Per-domain row builders. Each field is read through an ordered synonym
// list (English/Spanish variants, abbreviations); the first non-empty value
// wins. Legacy identifiers pass through unaltered — they are exact-match
// keys later on.

use crate::canonical::date::{parse_flexible_date, parse_legacy_export_date};
use crate::canonical::status::normalize_status;
use crate::canonical::table::RawRecord;
use crate::config;
use crate::models::{
    BookingStatus, CanonicalRow, GuestRow, ImportDomain, ReservationRow, TourBookingRow,
    TransferRow, VendorRow,
};

const LEGACY_ID: &[&str] = &["legacy_id", "id", "codigo", "folio", "no", "num"];
const FIRST_NAME: &[&str] = &["first_name", "firstname", "nombre", "first"];
const LAST_NAME: &[&str] = &["last_name", "lastname", "apellido", "apellidos", "last"];
const FULL_NAME: &[&str] = &[
    "full_name",
    "name",
    "nombre_completo",
    "guest_name",
    "guest",
    "huesped",
    "cliente",
];
const EMAIL: &[&str] = &["email", "e_mail", "mail", "correo", "correo_electronico"];
const PHONE: &[&str] = &["phone", "telefono", "tel", "celular", "movil", "whatsapp"];
const NATIONALITY: &[&str] = &["nationality", "nacionalidad", "pais", "country"];
const NOTES: &[&str] = &["notes", "notas", "observaciones", "comentarios", "comments"];
const STATUS: &[&str] = &["status", "estado", "estatus"];
const DATE: &[&str] = &["date", "fecha", "fecha_servicio", "service_date"];
const GUEST_REF: &[&str] = &[
    "guest",
    "guest_name",
    "huesped",
    "cliente",
    "passenger",
    "pasajero",
    "nombre",
];
const GUEST_LEGACY_ID: &[&str] = &["guest_id", "guest_legacy_id", "id_huesped", "id_cliente"];
const VENDOR_LEGACY_ID: &[&str] = &[
    "vendor_id",
    "vendor_legacy_id",
    "proveedor_id",
    "id_proveedor",
    "proveedor",
];
const NUM_GUESTS: &[&str] = &[
    "pax",
    "num_guests",
    "guests",
    "personas",
    "huespedes",
    "cantidad",
];
const PRICE: &[&str] = &["price", "precio", "monto", "total", "costo", "importe"];
const VENDOR_NAME: &[&str] = &["name", "vendor", "vendor_name", "proveedor", "empresa"];
const CATEGORY: &[&str] = &["category", "type", "categoria", "tipo", "servicio"];
const PICKUP: &[&str] = &["pickup", "origen", "from", "desde", "recogida", "origin"];
const DROPOFF: &[&str] = &["dropoff", "destino", "to", "hasta", "destination"];
const ACTIVITY: &[&str] = &[
    "activity",
    "actividad",
    "tour",
    "tour_name",
    "excursion",
    "servicio",
];
const ACTIVITY_DATE: &[&str] = &[
    "activity_date",
    "fecha_actividad",
    "tour_date",
    "date",
    "fecha",
];
const ARRIVAL: &[&str] = &[
    "arrival",
    "check_in",
    "checkin",
    "llegada",
    "fecha_llegada",
    "arrival_date",
];
const DEPARTURE: &[&str] = &[
    "departure",
    "check_out",
    "checkout",
    "salida",
    "fecha_salida",
    "departure_date",
];
const ROOM: &[&str] = &["room", "room_number", "habitacion", "hab", "cuarto"];

/// Defensive integer parse for guest counts: historical exports carry
/// "2 pax", blanks, and garbage. Falls back to DEFAULT_GUEST_COUNT.
fn parse_count(raw: Option<&str>) -> i32 {
    let Some(text) = raw else {
        return config::DEFAULT_GUEST_COUNT;
    };
    let trimmed = text.trim();
    if let Ok(n) = trimmed.parse::<i32>() {
        if n > 0 {
            return n;
        }
        return config::DEFAULT_GUEST_COUNT;
    }
    // "2 pax", "2 adultos": take the leading digit run.
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i32>() {
        Ok(n) if n > 0 => n,
        _ => config::DEFAULT_GUEST_COUNT,
    }
}

/// Defensive price parse: strips currency symbols and thousands separators.
/// Unparseable prices are None, not zero — absence and free are different.
fn parse_price(raw: Option<&str>) -> Option<f64> {
    let text = raw?.trim().replace(['$', ','], "");
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn status_of(rec: &RawRecord) -> BookingStatus {
    rec.first_of(STATUS)
        .map(normalize_status)
        .unwrap_or(BookingStatus::Pending)
}

pub fn build_guest_row(rec: &RawRecord) -> GuestRow {
    let first_name = rec.first_of_owned(FIRST_NAME);
    let last_name = rec.first_of_owned(LAST_NAME);
    let full_name = rec.first_of_owned(FULL_NAME).or_else(|| {
        // Compose when the export splits the name across two columns.
        match (&first_name, &last_name) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    });
    GuestRow {
        legacy_id: rec.first_of_owned(LEGACY_ID),
        first_name,
        last_name,
        full_name,
        email: rec.first_of_owned(EMAIL),
        phone: rec.first_of_owned(PHONE),
        nationality: rec.first_of_owned(NATIONALITY),
        notes: rec.first_of_owned(NOTES),
    }
}

pub fn build_vendor_row(rec: &RawRecord) -> VendorRow {
    VendorRow {
        legacy_id: rec.first_of_owned(LEGACY_ID),
        name: rec.first_of_owned(VENDOR_NAME),
        category: rec.first_of_owned(CATEGORY),
        email: rec.first_of_owned(EMAIL),
        phone: rec.first_of_owned(PHONE),
    }
}

pub fn build_transfer_row(rec: &RawRecord) -> TransferRow {
    let raw_date = rec.first_of_owned(DATE);
    // The transfer export is the one known-dirty date column (garbage years
    // like 2923), so dates that fail general parsing get the documented
    // year-collapse repair. No other domain applies it.
    let transfer_date = raw_date
        .as_deref()
        .and_then(|raw| parse_flexible_date(raw).or_else(|| parse_legacy_export_date(raw)));
    TransferRow {
        legacy_id: rec.first_of_owned(LEGACY_ID),
        transfer_date,
        raw_date,
        guest_name: rec.first_of_owned(GUEST_REF),
        guest_legacy_id: rec.first_of_owned(GUEST_LEGACY_ID),
        vendor_legacy_id: rec.first_of_owned(VENDOR_LEGACY_ID),
        pickup: rec.first_of_owned(PICKUP),
        dropoff: rec.first_of_owned(DROPOFF),
        num_guests: parse_count(rec.first_of(NUM_GUESTS)),
        price: parse_price(rec.first_of(PRICE)),
        status: status_of(rec),
        notes: rec.first_of_owned(NOTES),
    }
}

pub fn build_tour_booking_row(rec: &RawRecord) -> TourBookingRow {
    let raw_date = rec.first_of_owned(ACTIVITY_DATE);
    TourBookingRow {
        legacy_id: rec.first_of_owned(LEGACY_ID),
        activity_date: raw_date.as_deref().and_then(parse_flexible_date),
        raw_date,
        activity_name: rec.first_of_owned(ACTIVITY),
        guest_name: rec.first_of_owned(GUEST_REF),
        guest_legacy_id: rec.first_of_owned(GUEST_LEGACY_ID),
        vendor_legacy_id: rec.first_of_owned(VENDOR_LEGACY_ID),
        num_guests: parse_count(rec.first_of(NUM_GUESTS)),
        price: parse_price(rec.first_of(PRICE)),
        status: status_of(rec),
        notes: rec.first_of_owned(NOTES),
    }
}

pub fn build_reservation_row(rec: &RawRecord) -> ReservationRow {
    let raw_arrival = rec.first_of_owned(ARRIVAL);
    ReservationRow {
        legacy_id: rec.first_of_owned(LEGACY_ID),
        guest_name: rec.first_of_owned(GUEST_REF),
        arrival: raw_arrival.as_deref().and_then(parse_flexible_date),
        departure: rec.first_of(DEPARTURE).and_then(parse_flexible_date),
        raw_date: raw_arrival,
        room: rec.first_of_owned(ROOM),
        status: status_of(rec),
        notes: rec.first_of_owned(NOTES),
    }
}

/// Builds the typed canonical row for one record in the given domain.
pub fn canonical_row(domain: ImportDomain, rec: &RawRecord) -> CanonicalRow {
    match domain {
        ImportDomain::Guest => CanonicalRow::Guest(build_guest_row(rec)),
        ImportDomain::Vendor => CanonicalRow::Vendor(build_vendor_row(rec)),
        ImportDomain::Transfer => CanonicalRow::Transfer(build_transfer_row(rec)),
        ImportDomain::TourBooking => CanonicalRow::TourBooking(build_tour_booking_row(rec)),
        ImportDomain::Reservation => CanonicalRow::Reservation(build_reservation_row(rec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::table::parse_delimited;
    use chrono::NaiveDate;

    #[test]
    fn test_guest_row_spanish_headers() {
        let csv = "codigo,nombre,apellido,correo,telefono,nacionalidad\n\
                   G-17,Maria,Lopez,maria@example.com,555-0101,MX\n";
        let recs = parse_delimited(csv).unwrap();
        let row = build_guest_row(&recs[0]);
        assert_eq!(row.legacy_id.as_deref(), Some("G-17"));
        assert_eq!(row.full_name.as_deref(), Some("Maria Lopez"));
        assert_eq!(row.email.as_deref(), Some("maria@example.com"));
        assert_eq!(row.nationality.as_deref(), Some("MX"));
    }

    #[test]
    fn test_legacy_id_passes_through_verbatim() {
        let csv = "id,name\n  00-ABC_9/x ,Maria\n";
        let recs = parse_delimited(csv).unwrap();
        let row = build_guest_row(&recs[0]);
        // Trimmed but otherwise untouched: it is an exact-match key later.
        assert_eq!(row.legacy_id.as_deref(), Some("00-ABC_9/x"));
    }

    #[test]
    fn test_transfer_row_defaults() {
        let csv = "fecha,huesped,pax,precio,estado\n3/5/24,Maria Lopez,dos,n/a,confirmado\n";
        let recs = parse_delimited(csv).unwrap();
        let row = build_transfer_row(&recs[0]);
        assert_eq!(
            row.transfer_date,
            Some(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
        );
        // "dos" is unparseable, so the documented default applies.
        assert_eq!(row.num_guests, crate::config::DEFAULT_GUEST_COUNT);
        assert_eq!(row.price, None);
        assert_eq!(row.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_transfer_date_applies_export_year_repair() {
        let csv = "fecha,huesped\n1/15/2923,Maria Lopez\n";
        let recs = parse_delimited(csv).unwrap();
        let row = build_transfer_row(&recs[0]);
        assert_eq!(
            row.transfer_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        // The repair is scoped to the transfer export; tour bookings treat
        // the same garbage year as an unparseable date.
        let csv = "fecha,actividad,huesped\n1/15/2923,Snorkel trip,Maria Lopez\n";
        let recs = parse_delimited(csv).unwrap();
        let booking = build_tour_booking_row(&recs[0]);
        assert_eq!(booking.activity_date, None);
        assert_eq!(booking.raw_date.as_deref(), Some("1/15/2923"));
    }

    #[test]
    fn test_count_takes_leading_digits() {
        assert_eq!(parse_count(Some("2 pax")), 2);
        assert_eq!(parse_count(Some("4")), 4);
        assert_eq!(parse_count(Some("0")), crate::config::DEFAULT_GUEST_COUNT);
        assert_eq!(parse_count(None), crate::config::DEFAULT_GUEST_COUNT);
    }

    #[test]
    fn test_price_strips_currency() {
        assert_eq!(parse_price(Some("$1,250.50")), Some(1250.50));
        assert_eq!(parse_price(Some("free?")), None);
        assert_eq!(parse_price(None), None);
    }

    #[test]
    fn test_tour_booking_unparseable_date_keeps_raw() {
        let csv = "fecha,actividad,huesped\nmanana,Snorkel trip,Maria Lopez\n";
        let recs = parse_delimited(csv).unwrap();
        let row = build_tour_booking_row(&recs[0]);
        assert_eq!(row.activity_date, None);
        assert_eq!(row.raw_date.as_deref(), Some("manana"));
        assert_eq!(row.activity_name.as_deref(), Some("Snorkel trip"));
    }
}
