//! Modality worklist storage and search.

use crate::error::*;
use crate::query::{push_filter, where_clause};
use crate::records::WorklistRecord;
use crate::IndexDatabase;
use rusqlite::{params, Row};
use snafu::ResultExt;

/// Filters of a worklist query.
///
/// Values follow C-FIND matching: empty means unconstrained,
/// `*`/`?` are wildcards, and the scheduled date accepts ranges.
#[derive(Debug, Clone, Default)]
pub struct WorklistFilter {
    pub patient_id: String,
    pub patient_name: String,
    pub accession: String,
    pub modality: String,
    pub station_ae: String,
    pub scheduled_dt: String,
}

fn worklist_from_row(row: &Row) -> rusqlite::Result<WorklistRecord> {
    Ok(WorklistRecord {
        step_id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        birth_date: row.get(3)?,
        sex: row.get(4)?,
        accession: row.get(5)?,
        requested_proc_id: row.get(6)?,
        study_uid: row.get(7)?,
        scheduled_dt: row.get(8)?,
        station_ae: row.get(9)?,
        station_name: row.get(10)?,
        modality: row.get(11)?,
        procedure_desc: row.get(12)?,
        referring_physician: row.get(13)?,
        referring_physician_id: row.get(14)?,
    })
}

impl IndexDatabase {
    /// Insert or update a scheduled procedure step.
    pub fn upsert_worklist_item(&self, item: &WorklistRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO worklist
                     (step_id, patient_id, patient_name, birth_date, sex, accession,
                      requested_proc_id, study_uid, scheduled_dt, station_ae, station_name,
                      modality, procedure_desc, referring_physician, referring_physician_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(step_id) DO UPDATE SET
                     patient_id = excluded.patient_id,
                     patient_name = excluded.patient_name,
                     birth_date = excluded.birth_date,
                     sex = excluded.sex,
                     accession = excluded.accession,
                     requested_proc_id = excluded.requested_proc_id,
                     study_uid = excluded.study_uid,
                     scheduled_dt = excluded.scheduled_dt,
                     station_ae = excluded.station_ae,
                     station_name = excluded.station_name,
                     modality = excluded.modality,
                     procedure_desc = excluded.procedure_desc,
                     referring_physician = excluded.referring_physician,
                     referring_physician_id = excluded.referring_physician_id",
                params![
                    item.step_id,
                    item.patient_id,
                    item.patient_name,
                    item.birth_date,
                    item.sex,
                    item.accession,
                    item.requested_proc_id,
                    item.study_uid,
                    item.scheduled_dt,
                    item.station_ae,
                    item.station_name,
                    item.modality,
                    item.procedure_desc,
                    item.referring_physician,
                    item.referring_physician_id
                ],
            )
            .context(SqliteSnafu {
                operation: "upsert worklist item",
            })?;
            Ok(())
        })
    }

    /// Remove a scheduled procedure step.
    pub fn delete_worklist_item(&self, step_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM worklist WHERE step_id = ?1", params![step_id])
                .context(SqliteSnafu {
                    operation: "delete worklist item",
                })?;
            Ok(())
        })
    }

    /// Search scheduled procedure steps.
    pub fn worklist_search(&self, filter: &WorklistFilter) -> Result<Vec<WorklistRecord>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        push_filter(&mut clauses, &mut params, "patient_id", &filter.patient_id, false);
        push_filter(
            &mut clauses,
            &mut params,
            "patient_name",
            &filter.patient_name,
            false,
        );
        push_filter(&mut clauses, &mut params, "accession", &filter.accession, false);
        push_filter(&mut clauses, &mut params, "modality", &filter.modality, false);
        push_filter(&mut clauses, &mut params, "station_ae", &filter.station_ae, false);
        push_filter(
            &mut clauses,
            &mut params,
            "scheduled_dt",
            &filter.scheduled_dt,
            true,
        );

        let sql = format!(
            "SELECT step_id, patient_id, patient_name, birth_date, sex, accession,
                    requested_proc_id, study_uid, scheduled_dt, station_ae, station_name,
                    modality, procedure_desc, referring_physician, referring_physician_id
             FROM worklist{} ORDER BY step_id",
            where_clause(&clauses)
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql).context(SqliteSnafu {
                operation: "prepare worklist query",
            })?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(&params), worklist_from_row)
                .context(SqliteSnafu {
                    operation: "run worklist query",
                })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context(SqliteSnafu {
                    operation: "collect worklist rows",
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(step_id: &str, station_ae: &str, modality: &str, scheduled: &str) -> WorklistRecord {
        WorklistRecord {
            step_id: step_id.into(),
            patient_id: "PAT001".into(),
            patient_name: "DOE^JOHN".into(),
            station_ae: station_ae.into(),
            modality: modality.into(),
            scheduled_dt: scheduled.into(),
            ..WorklistRecord::default()
        }
    }

    #[test]
    fn search_by_station_modality_and_date_range() {
        let db = IndexDatabase::open_in_memory().unwrap();
        db.upsert_worklist_item(&item("S1", "CT01", "CT", "20240115")).unwrap();
        db.upsert_worklist_item(&item("S2", "CT01", "CT", "20240220")).unwrap();
        db.upsert_worklist_item(&item("S3", "MR01", "MR", "20240115")).unwrap();

        let hits = db
            .worklist_search(&WorklistFilter {
                station_ae: "CT01".into(),
                ..WorklistFilter::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = db
            .worklist_search(&WorklistFilter {
                modality: "MR".into(),
                ..WorklistFilter::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].step_id, "S3");

        let hits = db
            .worklist_search(&WorklistFilter {
                scheduled_dt: "20240101-20240131".into(),
                ..WorklistFilter::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn delete_removes_step() {
        let db = IndexDatabase::open_in_memory().unwrap();
        db.upsert_worklist_item(&item("S1", "CT01", "CT", "20240115")).unwrap();
        db.delete_worklist_item("S1").unwrap();
        assert!(db.worklist_search(&WorklistFilter::default()).unwrap().is_empty());
    }
}
