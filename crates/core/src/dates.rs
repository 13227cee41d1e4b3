use chrono::{Duration, NaiveDate, NaiveDateTime};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 9999-12-31 as a spreadsheet serial.
const MAX_SERIAL: f64 = 2_958_465.0;

const FALLBACK_FORMATS: [&str; 4] = ["%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Reads a due-date cell as written by people or by the spreadsheet itself:
/// ISO dates, ISO datetimes, serial day numbers, and a few day/month layouts.
pub fn normalize_sheet_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_FORMAT) {
        return Some(date);
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Some(datetime.date());
        }
    }

    if let Some(date) = from_serial(trimmed) {
        return Some(date);
    }

    FALLBACK_FORMATS.iter().find_map(|layout| NaiveDate::parse_from_str(trimmed, layout).ok())
}

fn from_serial(value: &str) -> Option<NaiveDate> {
    let serial = value.replace(',', ".").parse::<f64>().ok()?;
    if !serial.is_finite() || !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let origin = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    origin.checked_add_signed(Duration::try_days(serial.trunc() as i64)?)
}
