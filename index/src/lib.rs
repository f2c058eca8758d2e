//! The relational index backing query and retrieve services.
//!
//! The index keeps the patient / study / series / instance hierarchy,
//! performed procedure steps and the modality worklist in SQLite.
//! Multi-table mutations run in one transaction so that the index
//! never references a missing parent row; deleting a study cascades
//! to its series and instances, while deleting a patient is refused
//! while studies remain.

pub mod error;
pub mod mpps;
pub mod query;
pub mod records;
pub mod worklist;

pub use error::{Error, Result};
pub use records::*;

use error::*;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use snafu::{ensure, ResultExt};
use tracing::{debug, info};

/// Schema migrations, applied in order; `PRAGMA user_version`
/// records how many have run.
const MIGRATIONS: &[&str] = &[
    // v1: the full hierarchy plus workflow tables
    "
    CREATE TABLE patients (
        patient_id      TEXT PRIMARY KEY,
        name            TEXT NOT NULL DEFAULT '',
        birth_date      TEXT NOT NULL DEFAULT '',
        sex             TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE studies (
        study_uid           TEXT PRIMARY KEY,
        patient_id          TEXT NOT NULL REFERENCES patients(patient_id),
        accession           TEXT NOT NULL DEFAULT '',
        study_date          TEXT NOT NULL DEFAULT '',
        study_time          TEXT NOT NULL DEFAULT '',
        referring_physician TEXT NOT NULL DEFAULT '',
        description         TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE series (
        series_uid  TEXT PRIMARY KEY,
        study_uid   TEXT NOT NULL REFERENCES studies(study_uid) ON DELETE CASCADE,
        modality    TEXT NOT NULL DEFAULT '',
        number      TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        body_part   TEXT NOT NULL DEFAULT '',
        station     TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE instances (
        sop_instance_uid    TEXT PRIMARY KEY,
        series_uid          TEXT NOT NULL REFERENCES series(series_uid) ON DELETE CASCADE,
        sop_class_uid       TEXT NOT NULL DEFAULT '',
        path                TEXT NOT NULL DEFAULT '',
        size                INTEGER NOT NULL DEFAULT 0,
        transfer_syntax_uid TEXT NOT NULL DEFAULT '',
        instance_number     TEXT NOT NULL DEFAULT ''
    );
    CREATE TABLE mpps (
        mpps_uid    TEXT PRIMARY KEY,
        station     TEXT NOT NULL DEFAULT '',
        modality    TEXT NOT NULL DEFAULT '',
        study_uid   TEXT NOT NULL DEFAULT '',
        accession   TEXT NOT NULL DEFAULT '',
        start_dt    TEXT NOT NULL DEFAULT '',
        state       TEXT NOT NULL CHECK (state IN ('IN_PROGRESS','COMPLETED','DISCONTINUED'))
    );
    CREATE TABLE worklist (
        step_id                 TEXT PRIMARY KEY,
        patient_id              TEXT NOT NULL DEFAULT '',
        patient_name            TEXT NOT NULL DEFAULT '',
        birth_date              TEXT NOT NULL DEFAULT '',
        sex                     TEXT NOT NULL DEFAULT '',
        accession               TEXT NOT NULL DEFAULT '',
        requested_proc_id       TEXT NOT NULL DEFAULT '',
        study_uid               TEXT NOT NULL DEFAULT '',
        scheduled_dt            TEXT NOT NULL DEFAULT '',
        station_ae              TEXT NOT NULL DEFAULT '',
        station_name            TEXT NOT NULL DEFAULT '',
        modality                TEXT NOT NULL DEFAULT '',
        procedure_desc          TEXT NOT NULL DEFAULT '',
        referring_physician     TEXT NOT NULL DEFAULT '',
        referring_physician_id  TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX idx_studies_patient ON studies(patient_id);
    CREATE INDEX idx_series_study ON series(study_uid);
    CREATE INDEX idx_instances_series ON instances(series_uid);
    CREATE INDEX idx_worklist_station ON worklist(station_ae);
    ",
];

/// Handle to the index database.
///
/// Readers and writers go through the same connection;
/// writers serialize on the inner lock while SQLite's WAL journal
/// keeps readers unblocked in other processes.
pub struct IndexDatabase {
    conn: Mutex<Connection>,
}

impl IndexDatabase {
    /// Open (or create) the index at the given path,
    /// applying pending migrations and the crash recovery sweep.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .context(OpenDatabaseSnafu { path })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context(OpenDatabaseSnafu { path })?;
        Self::init(conn)
    }

    /// Open a private in-memory index (used by tests and tools).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context(OpenDatabaseSnafu { path: ":memory:" })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context(SqliteSnafu {
                operation: "enable foreign keys",
            })?;

        let version: usize = conn
            .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
            .context(SqliteSnafu {
                operation: "read schema version",
            })? as usize;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(version) {
            conn.execute_batch(migration).context(SqliteSnafu {
                operation: "apply migration",
            })?;
            conn.pragma_update(None, "user_version", (i + 1) as i64)
                .context(SqliteSnafu {
                    operation: "bump schema version",
                })?;
            info!(version = i + 1, "applied index schema migration");
        }

        let db = IndexDatabase {
            conn: Mutex::new(conn),
        };
        db.recover()?;
        Ok(db)
    }

    /// Crash recovery: drop instance rows whose parent series vanished.
    fn recover(&self) -> Result<()> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM instances
                 WHERE series_uid NOT IN (SELECT series_uid FROM series)",
                [],
            )
            .context(SqliteSnafu {
                operation: "recovery sweep",
            })?;
        if removed > 0 {
            debug!(removed, "removed orphaned instance rows");
        }
        Ok(())
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Insert or update a patient row.
    pub fn upsert_patient(&self, patient: &PatientRecord) -> Result<()> {
        self.with_conn(|conn| upsert_patient_tx(conn, patient))
    }

    /// Insert or update a study row.
    pub fn upsert_study(&self, study: &StudyRecord) -> Result<()> {
        self.with_conn(|conn| upsert_study_tx(conn, study))
    }

    /// Insert or update a series row.
    pub fn upsert_series(&self, series: &SeriesRecord) -> Result<()> {
        self.with_conn(|conn| upsert_series_tx(conn, series))
    }

    /// Insert or update an instance row.
    pub fn upsert_instance(&self, instance: &InstanceRecord) -> Result<()> {
        self.with_conn(|conn| upsert_instance_tx(conn, instance))
    }

    /// Ingest one stored instance: upsert its whole lineage
    /// inside a single transaction.
    pub fn ingest(
        &self,
        patient: &PatientRecord,
        study: &StudyRecord,
        series: &SeriesRecord,
        instance: &InstanceRecord,
    ) -> Result<()> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction().context(SqliteSnafu {
            operation: "begin ingest",
        })?;
        upsert_patient_tx(&tx, patient)?;
        upsert_study_tx(&tx, study)?;
        upsert_series_tx(&tx, series)?;
        upsert_instance_tx(&tx, instance)?;
        tx.commit().context(SqliteSnafu {
            operation: "commit ingest",
        })
    }

    /// Delete a study; its series and instances go with it.
    pub fn delete_study(&self, study_uid: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM studies WHERE study_uid = ?1", params![study_uid])
                .context(SqliteSnafu {
                    operation: "delete study",
                })?;
            Ok(())
        })
    }

    /// Delete a patient; refused while the patient still has studies.
    pub fn delete_patient(&self, patient_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let studies: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM studies WHERE patient_id = ?1",
                    params![patient_id],
                    |row| row.get(0),
                )
                .context(SqliteSnafu {
                    operation: "count studies",
                })?;
            ensure!(studies == 0, PatientHasStudiesSnafu { patient_id });
            conn.execute(
                "DELETE FROM patients WHERE patient_id = ?1",
                params![patient_id],
            )
            .context(SqliteSnafu {
                operation: "delete patient",
            })?;
            Ok(())
        })
    }
}

fn upsert_patient_tx(conn: &Connection, patient: &PatientRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO patients (patient_id, name, birth_date, sex)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(patient_id) DO UPDATE SET
             name = excluded.name,
             birth_date = excluded.birth_date,
             sex = excluded.sex",
        params![
            patient.patient_id,
            patient.name,
            patient.birth_date,
            patient.sex
        ],
    )
    .context(SqliteSnafu {
        operation: "upsert patient",
    })?;
    Ok(())
}

fn upsert_study_tx(conn: &Connection, study: &StudyRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO studies
             (study_uid, patient_id, accession, study_date, study_time,
              referring_physician, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(study_uid) DO UPDATE SET
             patient_id = excluded.patient_id,
             accession = excluded.accession,
             study_date = excluded.study_date,
             study_time = excluded.study_time,
             referring_physician = excluded.referring_physician,
             description = excluded.description",
        params![
            study.study_uid,
            study.patient_id,
            study.accession,
            study.study_date,
            study.study_time,
            study.referring_physician,
            study.description
        ],
    )
    .context(SqliteSnafu {
        operation: "upsert study",
    })?;
    Ok(())
}

fn upsert_series_tx(conn: &Connection, series: &SeriesRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO series
             (series_uid, study_uid, modality, number, description, body_part, station)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(series_uid) DO UPDATE SET
             study_uid = excluded.study_uid,
             modality = excluded.modality,
             number = excluded.number,
             description = excluded.description,
             body_part = excluded.body_part,
             station = excluded.station",
        params![
            series.series_uid,
            series.study_uid,
            series.modality,
            series.number,
            series.description,
            series.body_part,
            series.station
        ],
    )
    .context(SqliteSnafu {
        operation: "upsert series",
    })?;
    Ok(())
}

fn upsert_instance_tx(conn: &Connection, instance: &InstanceRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO instances
             (sop_instance_uid, series_uid, sop_class_uid, path, size,
              transfer_syntax_uid, instance_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(sop_instance_uid) DO UPDATE SET
             series_uid = excluded.series_uid,
             sop_class_uid = excluded.sop_class_uid,
             path = excluded.path,
             size = excluded.size,
             transfer_syntax_uid = excluded.transfer_syntax_uid,
             instance_number = excluded.instance_number",
        params![
            instance.sop_instance_uid,
            instance.series_uid,
            instance.sop_class_uid,
            instance.path,
            instance.size as i64,
            instance.transfer_syntax_uid,
            instance.instance_number
        ],
    )
    .context(SqliteSnafu {
        operation: "upsert instance",
    })?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// An index pre-populated with one patient, one study,
    /// two series and three instances.
    pub fn populated_index() -> IndexDatabase {
        let db = IndexDatabase::open_in_memory().unwrap();
        let patient = PatientRecord {
            patient_id: "PAT001".into(),
            name: "DOE^JOHN".into(),
            birth_date: "19700101".into(),
            sex: "M".into(),
        };
        let study = StudyRecord {
            study_uid: "1.2.3.1".into(),
            patient_id: "PAT001".into(),
            accession: "ACC42".into(),
            study_date: "20240115".into(),
            study_time: "101500".into(),
            referring_physician: "REF^DOC".into(),
            description: "CHEST CT".into(),
        };
        let series_ct = SeriesRecord {
            series_uid: "1.2.3.1.1".into(),
            study_uid: "1.2.3.1".into(),
            modality: "CT".into(),
            number: "1".into(),
            ..SeriesRecord::default()
        };
        let series_sr = SeriesRecord {
            series_uid: "1.2.3.1.2".into(),
            study_uid: "1.2.3.1".into(),
            modality: "SR".into(),
            number: "2".into(),
            ..SeriesRecord::default()
        };
        for (n, series) in [(1, &series_ct), (2, &series_ct), (3, &series_sr)] {
            let instance = InstanceRecord {
                sop_instance_uid: format!("1.2.3.1.9.{}", n),
                series_uid: series.series_uid.clone(),
                sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".into(),
                path: format!("/data/1.2.3.1.9.{}.dcm", n),
                size: 1024,
                transfer_syntax_uid: "1.2.840.10008.1.2".into(),
                instance_number: n.to_string(),
            };
            db.ingest(&patient, &study, series, &instance).unwrap();
        }
        db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::InstanceQuery;

    #[test]
    fn ingest_creates_whole_lineage() {
        let db = test_support::populated_index();
        let rows = db.find_instances(&InstanceQuery::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].series_uid, "1.2.3.1.1");
    }

    #[test]
    fn delete_study_cascades() {
        let db = test_support::populated_index();
        db.delete_study("1.2.3.1").unwrap();
        let rows = db.find_instances(&InstanceQuery::default()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn delete_patient_refused_while_studies_exist() {
        let db = test_support::populated_index();
        let err = db.delete_patient("PAT001").unwrap_err();
        assert!(matches!(err, Error::PatientHasStudies { .. }), "{:?}", err);

        db.delete_study("1.2.3.1").unwrap();
        db.delete_patient("PAT001").unwrap();
    }

    #[test]
    fn reopening_applies_no_further_migrations() {
        // migrations are idempotent through the user_version guard
        let db = IndexDatabase::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let version: i64 = conn
                .query_row("PRAGMA user_version", [], |row| row.get(0))
                .unwrap();
            assert_eq!(version as usize, MIGRATIONS.len());
            Ok(())
        })
        .unwrap();
    }
}
