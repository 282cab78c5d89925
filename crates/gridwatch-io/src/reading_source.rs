//! SQLite-backed reading source (spec §4.2/§6), grounded on
//! `original_source/server/drivers/database.py`'s `fetch_batches`: one
//! distinct-timestamp query against `modbus_logs`, then per timestamp a
//! `modbus_logs` row set plus exactly one `site_totals` row.
//!
//! The original yields `reading_set` with `site_totals` appended as the
//! last element and has the caller `.pop()` it back off; we return the
//! pair directly instead since Rust has no reason to round-trip through a
//! mixed-type list.

use rusqlite::{Connection, OptionalExtension, Row};

use gridwatch_core::error::{GridError, GridResult};

/// One `modbus_logs` row. Any column may be `NULL` in the source database;
/// the original's schema guarantees `timestamp`/`device_name` are present
/// for every row that was actually inserted (see `database_integrity.py`'s
/// own re-insertion of fully-`NULL` placeholder rows).
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_key: u32,
    pub timestamp: String,
    pub current_a: Option<f64>,
    pub current_b: Option<f64>,
    pub current_c: Option<f64>,
    pub power_active: Option<f64>,
    pub power_reactive: Option<f64>,
    pub power_apparent: Option<f64>,
    pub power_factor: Option<f64>,
    pub voltage_an: Option<f64>,
    pub voltage_bn: Option<f64>,
    pub voltage_cn: Option<f64>,
    pub voltage_ab: Option<f64>,
    pub voltage_bc: Option<f64>,
    pub voltage_ca: Option<f64>,
    pub cumulative_active_energy: Option<f64>,
}

impl Reading {
    /// A reading is usable iff both active and reactive power are present
    /// and finite (spec §3 "Reading").
    pub fn is_usable(&self) -> bool {
        matches!(
            (self.power_active, self.power_reactive),
            (Some(p), Some(q)) if p.is_finite() && q.is_finite()
        )
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
        let device_name: String = row.get("device_name")?;
        let device_key = device_name.parse::<u32>().map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                0,
                "device_name".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;
        Ok(Reading {
            device_key,
            timestamp: row.get("timestamp")?,
            current_a: row.get("current_a")?,
            current_b: row.get("current_b")?,
            current_c: row.get("current_c")?,
            power_active: row.get("power_active")?,
            power_reactive: row.get("power_reactive")?,
            power_apparent: row.get("power_apparent")?,
            power_factor: row.get("power_factor")?,
            voltage_an: row.get("voltage_an")?,
            voltage_bn: row.get("voltage_bn")?,
            voltage_cn: row.get("voltage_cn")?,
            voltage_ab: row.get("voltage_ab")?,
            voltage_bc: row.get("voltage_bc")?,
            voltage_ca: row.get("voltage_ca")?,
            cumulative_active_energy: row.get("cumulative_active_energy")?,
        })
    }
}

/// Per-timestamp site aggregate (spec §3 "SiteTotals"). Column names mirror
/// `ansto_total_kw` / `ansto_total_kvar`, kept verbatim since they're the
/// actual schema in the source database, not a naming choice of ours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteTotals {
    pub timestamp_unix: i64,
    pub total_active_mw: f64,
    pub total_reactive_mvar: f64,
}

/// A lazy, finite, ordered sequence of `(SiteTotals, Vec<Reading>)` batches,
/// opened once against a SQLite database (spec §4.2).
pub struct ReadingSource {
    conn: Connection,
    timestamps: std::vec::IntoIter<String>,
}

impl ReadingSource {
    /// Open the database and pre-fetch the ordered list of distinct
    /// timestamps at or after `start_time` (an `modbus_logs`-native
    /// timestamp string, e.g. `"2023-12-29 04:45:00"`).
    pub fn open(db_path: &str, start_time: &str) -> GridResult<ReadingSource> {
        let conn = Connection::open(db_path)
            .map_err(|e| GridError::SourceUnavailable(format!("{db_path}: {e}")))?;

        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT timestamp FROM modbus_logs WHERE timestamp >= ?1 ORDER BY timestamp",
            )
            .map_err(|e| GridError::SourceUnavailable(e.to_string()))?;
        let timestamps: Vec<String> = stmt
            .query_map([start_time], |row| row.get(0))
            .map_err(|e| GridError::SourceUnavailable(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?;
        drop(stmt);

        Ok(ReadingSource {
            conn,
            timestamps: timestamps.into_iter(),
        })
    }

    fn fetch_batch(&self, timestamp: &str) -> GridResult<(SiteTotals, Vec<Reading>)> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM modbus_logs WHERE timestamp = ?1")
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?;
        let readings = stmt
            .query_map([timestamp], Reading::from_row)
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?;
        drop(stmt);

        let mut totals_stmt = self
            .conn
            .prepare("SELECT * FROM site_totals WHERE timestamp = ?1")
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?;
        let totals_row = totals_stmt
            .query_row([timestamp], |row| {
                let ts_text: String = row.get("timestamp")?;
                let total_active_kw: f64 = row.get("ansto_total_kw")?;
                let total_reactive_kvar: f64 = row.get("ansto_total_kvar")?;
                Ok((ts_text, total_active_kw, total_reactive_kvar))
            })
            .optional()
            .map_err(|e| GridError::SourceCorrupt(e.to_string()))?;

        let (ts_text, total_active_kw, total_reactive_kvar) = totals_row.ok_or_else(|| {
            GridError::SourceCorrupt(format!(
                "no site_totals row for timestamp '{timestamp}'"
            ))
        })?;

        let timestamp_unix = parse_timestamp(&ts_text)?;

        Ok((
            SiteTotals {
                timestamp_unix,
                total_active_mw: total_active_kw / 1000.0,
                total_reactive_mvar: total_reactive_kvar / 1000.0,
            },
            readings,
        ))
    }
}

impl Iterator for ReadingSource {
    type Item = GridResult<(SiteTotals, Vec<Reading>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let ts = self.timestamps.next()?;
        Some(self.fetch_batch(&ts))
    }
}

/// Parse the source's `"%Y-%m-%d %H:%M:%S"` timestamp string into a Unix
/// epoch second count, matching `database_integrity.py`'s own format string.
fn parse_timestamp(text: &str) -> GridResult<i64> {
    let (date, time) = text.split_once(' ').ok_or_else(|| {
        GridError::SourceCorrupt(format!("malformed timestamp '{text}'"))
    })?;
    let mut date_parts = date.split('-');
    let mut time_parts = time.split(':');
    let bad = || GridError::SourceCorrupt(format!("malformed timestamp '{text}'"));

    let year: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let month: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let day: i64 = date_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let hour: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minute: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let second: i64 = time_parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;

    Ok(days_from_civil(year, month, day) * 86_400 + hour * 3600 + minute * 60 + second)
}

/// Howard Hinnant's days-from-civil algorithm (proleptic Gregorian, no
/// external date/time crate needed for this one conversion).
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE modbus_logs (
                timestamp TEXT, device_name TEXT,
                current_a REAL, current_b REAL, current_c REAL,
                power_active REAL, power_reactive REAL, power_apparent REAL, power_factor REAL,
                voltage_an REAL, voltage_bn REAL, voltage_cn REAL,
                voltage_ab REAL, voltage_bc REAL, voltage_ca REAL,
                cumulative_active_energy REAL
            );
            CREATE TABLE site_totals (timestamp TEXT, ansto_total_kw REAL, ansto_total_kvar REAL);
            INSERT INTO modbus_logs (timestamp, device_name, power_active, power_reactive)
                VALUES ('2023-12-29 04:45:00', '1', 1500.0, 300.0);
            INSERT INTO site_totals (timestamp, ansto_total_kw, ansto_total_kvar)
                VALUES ('2023-12-29 04:45:00', 5000.0, 1200.0);
            INSERT INTO modbus_logs (timestamp, device_name, power_active, power_reactive)
                VALUES ('2023-12-29 05:00:00', '2', NULL, NULL);
            ",
        )
        .unwrap();
        file
    }

    #[test]
    fn yields_batches_in_timestamp_order() {
        let file = make_db();
        let source = ReadingSource::open(file.path().to_str().unwrap(), "2023-12-29 00:00:00").unwrap();
        let batches: Vec<_> = source.collect::<GridResult<Vec<_>>>().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0.total_active_mw, 5.0);
        assert_eq!(batches[0].1.len(), 1);
        assert_eq!(batches[0].1[0].device_key, 1);
        assert!(batches[0].1[0].is_usable());
        assert!(!batches[1].1[0].is_usable());
    }

    #[test]
    fn start_time_filters_earlier_batches() {
        let file = make_db();
        let source = ReadingSource::open(file.path().to_str().unwrap(), "2023-12-29 05:00:00").unwrap();
        let batches: Vec<_> = source.collect::<GridResult<Vec<_>>>().unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn missing_site_totals_row_is_source_corrupt() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute_batch(
            "CREATE TABLE modbus_logs (timestamp TEXT, device_name TEXT, power_active REAL, power_reactive REAL);
             CREATE TABLE site_totals (timestamp TEXT, ansto_total_kw REAL, ansto_total_kvar REAL);
             INSERT INTO modbus_logs (timestamp, device_name, power_active, power_reactive)
                 VALUES ('2024-01-01 00:00:00', '1', 1.0, 1.0);",
        )
        .unwrap();

        let source = ReadingSource::open(file.path().to_str().unwrap(), "2000-01-01 00:00:00").unwrap();
        let results: Vec<_> = source.collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(GridError::SourceCorrupt(_))));
    }

    #[test]
    fn nonexistent_database_is_source_unavailable() {
        let result = ReadingSource::open("/nonexistent/path/does-not-exist.db", "2020-01-01 00:00:00");
        assert!(matches!(result, Err(GridError::SourceUnavailable(_))));
    }

    #[test]
    fn parses_timestamp_to_unix_seconds() {
        assert_eq!(parse_timestamp("1970-01-01 00:00:00").unwrap(), 0);
        assert_eq!(parse_timestamp("2023-12-29 04:45:00").unwrap(), 1703825100);
    }
}
