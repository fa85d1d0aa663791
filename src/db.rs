use crate::types::{ScanEntry, ScanRecord, Vehicle};
use rusqlite::{params, Connection, OptionalExtension, Result, NO_PARAMS};

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    create_tables(&conn)?;
    Ok(conn)
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS vehicle (
            id INTEGER PRIMARY KEY,
            owner_name TEXT NOT NULL,
            engine_number TEXT NOT NULL,
            chassis_number TEXT NOT NULL,
            plate_number TEXT NOT NULL UNIQUE,
            vehicle_type TEXT NOT NULL,
            status TEXT NOT NULL
        )",
        NO_PARAMS,
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scan_log (
            id INTEGER PRIMARY KEY,
            plate_text TEXT NOT NULL,
            is_match TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        NO_PARAMS,
    )?;
    Ok(())
}

/// Exact match on the plate number.
pub fn find_vehicle(conn: &Connection, plate: &str) -> Result<Option<Vehicle>> {
    conn.query_row(
        "SELECT owner_name, engine_number, chassis_number, plate_number, vehicle_type, status
         FROM vehicle WHERE plate_number = ?1",
        params![plate],
        |row| {
            Ok(Vehicle {
                owner_name: row.get(0)?,
                engine_number: row.get(1)?,
                chassis_number: row.get(2)?,
                plate_number: row.get(3)?,
                vehicle_type: row.get(4)?,
                status: row.get(5)?,
            })
        },
    )
    .optional()
}

pub fn register_vehicle(conn: &Connection, vehicle: &Vehicle) -> Result<i64> {
    conn.execute(
        "INSERT INTO vehicle(owner_name, engine_number, chassis_number, plate_number, vehicle_type, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            vehicle.owner_name,
            vehicle.engine_number,
            vehicle.chassis_number,
            vehicle.plate_number,
            vehicle.vehicle_type,
            vehicle.status
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts a row into 'scan_log'; returns its id.
pub fn record_scan(conn: &Connection, record: &ScanRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO scan_log(plate_text, is_match, created_at) VALUES (?1, ?2, ?3)",
        params![record.plate_text, record.is_match, record.created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_scans(conn: &Connection) -> Result<Vec<ScanEntry>> {
    let mut stmt =
        conn.prepare("SELECT id, plate_text, is_match, created_at FROM scan_log ORDER BY id")?;
    let rows = stmt.query_map(NO_PARAMS, |row| {
        Ok(ScanEntry {
            id: row.get(0)?,
            plate_text: row.get(1)?,
            is_match: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    rows.collect()
}

/// Overrides the match verdict of a scan. Returns false if no such scan.
pub fn verify_scan(conn: &Connection, id: i64, status: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE scan_log SET is_match = ?1 WHERE id = ?2",
        params![status, id],
    )?;
    Ok(updated > 0)
}

/// True if `e` is a UNIQUE/PRIMARY KEY violation.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    create_tables(&conn).unwrap();
    conn
}
