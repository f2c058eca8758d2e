//! Hierarchical query execution with DICOM matching semantics.
//!
//! Each filter value is interpreted the way C-FIND identifiers are:
//! an empty value matches everything (the attribute is only being
//! requested), `*` and `?` translate to SQL `LIKE` wildcards, and
//! date/time attributes accept `lo-hi`, `lo-` and `-hi` ranges.
//! Results are ordered ascending by the level's primary UID.

use crate::error::*;
use crate::records::*;
use crate::IndexDatabase;
use rusqlite::{Connection, Row};
use snafu::ResultExt;

/// The hierarchical level of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl QueryLevel {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim() {
            "PATIENT" => Some(QueryLevel::Patient),
            "STUDY" => Some(QueryLevel::Study),
            "SERIES" => Some(QueryLevel::Series),
            "IMAGE" => Some(QueryLevel::Image),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryLevel::Patient => "PATIENT",
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Image => "IMAGE",
        }
    }
}

/// How a filter value constrains its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    /// exact string equality
    Exact,
    /// wildcard matching with `*` and `?`
    Wildcard,
    /// value range for date/time attributes
    Range,
}

fn classify(value: &str, ranged: bool) -> MatchKind {
    if value.contains('*') || value.contains('?') {
        MatchKind::Wildcard
    } else if ranged && value.contains('-') {
        MatchKind::Range
    } else {
        MatchKind::Exact
    }
}

/// Translate a DICOM wildcard pattern to a SQL LIKE pattern.
fn to_like(value: &str) -> String {
    value
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
        .replace('?', "_")
}

/// Append the WHERE fragment for one attribute filter.
///
/// `ranged` marks date/time columns where `lo-hi` ranges apply.
pub(crate) fn push_filter(
    clauses: &mut Vec<String>,
    params: &mut Vec<String>,
    column: &str,
    value: &str,
    ranged: bool,
) {
    if value.is_empty() {
        // universal matching: attribute requested, no constraint
        return;
    }
    match classify(value, ranged) {
        MatchKind::Exact => {
            params.push(value.to_string());
            clauses.push(format!("{} = ?{}", column, params.len()));
        }
        MatchKind::Wildcard => {
            params.push(to_like(value));
            clauses.push(format!("{} LIKE ?{} ESCAPE '\\'", column, params.len()));
        }
        MatchKind::Range => {
            let (lo, hi) = value.split_once('-').unwrap_or((value, ""));
            if !lo.is_empty() {
                params.push(lo.to_string());
                clauses.push(format!("{} >= ?{}", column, params.len()));
            }
            if !hi.is_empty() {
                params.push(hi.to_string());
                clauses.push(format!("{} <= ?{}", column, params.len()));
            }
        }
    }
}

pub(crate) fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

/// Filters for a patient level query.
#[derive(Debug, Clone, Default)]
pub struct PatientQuery {
    pub patient_id: String,
    pub name: String,
    pub birth_date: String,
    pub sex: String,
}

/// Filters for a study level query.
#[derive(Debug, Clone, Default)]
pub struct StudyQuery {
    pub study_uid: String,
    pub patient_id: String,
    pub patient_name: String,
    pub accession: String,
    pub study_date: String,
    pub study_time: String,
    pub referring_physician: String,
    pub description: String,
}

/// Filters for a series level query.
#[derive(Debug, Clone, Default)]
pub struct SeriesQuery {
    pub series_uid: String,
    pub study_uid: String,
    pub modality: String,
    pub number: String,
    pub body_part: String,
    pub station: String,
}

/// Filters for an image level query.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub study_uid: String,
    pub sop_class_uid: String,
    pub instance_number: String,
}

fn patient_from_row(row: &Row, offset: usize) -> rusqlite::Result<PatientRecord> {
    Ok(PatientRecord {
        patient_id: row.get(offset)?,
        name: row.get(offset + 1)?,
        birth_date: row.get(offset + 2)?,
        sex: row.get(offset + 3)?,
    })
}

fn study_from_row(row: &Row) -> rusqlite::Result<StudyRecord> {
    Ok(StudyRecord {
        study_uid: row.get(0)?,
        patient_id: row.get(1)?,
        accession: row.get(2)?,
        study_date: row.get(3)?,
        study_time: row.get(4)?,
        referring_physician: row.get(5)?,
        description: row.get(6)?,
    })
}

fn series_from_row(row: &Row) -> rusqlite::Result<SeriesRecord> {
    Ok(SeriesRecord {
        series_uid: row.get(0)?,
        study_uid: row.get(1)?,
        modality: row.get(2)?,
        number: row.get(3)?,
        description: row.get(4)?,
        body_part: row.get(5)?,
        station: row.get(6)?,
    })
}

fn instance_from_row(row: &Row) -> rusqlite::Result<InstanceRecord> {
    Ok(InstanceRecord {
        sop_instance_uid: row.get(0)?,
        series_uid: row.get(1)?,
        sop_class_uid: row.get(2)?,
        path: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        transfer_syntax_uid: row.get(5)?,
        instance_number: row.get(6)?,
    })
}

fn run_query<T>(
    conn: &Connection,
    sql: &str,
    params: &[String],
    map: impl FnMut(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).context(SqliteSnafu {
        operation: "prepare query",
    })?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), map)
        .context(SqliteSnafu {
            operation: "run query",
        })?;
    rows.collect::<rusqlite::Result<Vec<T>>>()
        .context(SqliteSnafu {
            operation: "collect query rows",
        })
}

impl IndexDatabase {
    /// Patient level search.
    pub fn find_patients(&self, query: &PatientQuery) -> Result<Vec<PatientRecord>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        push_filter(&mut clauses, &mut params, "patient_id", &query.patient_id, false);
        push_filter(&mut clauses, &mut params, "name", &query.name, false);
        push_filter(&mut clauses, &mut params, "birth_date", &query.birth_date, true);
        push_filter(&mut clauses, &mut params, "sex", &query.sex, false);

        let sql = format!(
            "SELECT patient_id, name, birth_date, sex FROM patients{} ORDER BY patient_id",
            where_clause(&clauses)
        );
        self.with_conn(|conn| run_query(conn, &sql, &params, |row| patient_from_row(row, 0)))
    }

    /// Study level search; each match carries its patient row
    /// so identifiers can be projected without a second query.
    pub fn find_studies(&self, query: &StudyQuery) -> Result<Vec<StudyMatch>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        push_filter(&mut clauses, &mut params, "s.study_uid", &query.study_uid, false);
        push_filter(&mut clauses, &mut params, "s.patient_id", &query.patient_id, false);
        push_filter(&mut clauses, &mut params, "p.name", &query.patient_name, false);
        push_filter(&mut clauses, &mut params, "s.accession", &query.accession, false);
        push_filter(&mut clauses, &mut params, "s.study_date", &query.study_date, true);
        push_filter(&mut clauses, &mut params, "s.study_time", &query.study_time, true);
        push_filter(
            &mut clauses,
            &mut params,
            "s.referring_physician",
            &query.referring_physician,
            false,
        );
        push_filter(&mut clauses, &mut params, "s.description", &query.description, false);

        let sql = format!(
            "SELECT s.study_uid, s.patient_id, s.accession, s.study_date, s.study_time,
                    s.referring_physician, s.description,
                    p.patient_id, p.name, p.birth_date, p.sex
             FROM studies s JOIN patients p ON p.patient_id = s.patient_id{}
             ORDER BY s.study_uid",
            where_clause(&clauses)
        );
        self.with_conn(|conn| {
            run_query(conn, &sql, &params, |row| {
                Ok(StudyMatch {
                    study: study_from_row(row)?,
                    patient: patient_from_row(row, 7)?,
                })
            })
        })
    }

    /// Series level search.
    pub fn find_series(&self, query: &SeriesQuery) -> Result<Vec<SeriesRecord>> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        push_filter(&mut clauses, &mut params, "series_uid", &query.series_uid, false);
        push_filter(&mut clauses, &mut params, "study_uid", &query.study_uid, false);
        push_filter(&mut clauses, &mut params, "modality", &query.modality, false);
        push_filter(&mut clauses, &mut params, "number", &query.number, false);
        push_filter(&mut clauses, &mut params, "body_part", &query.body_part, false);
        push_filter(&mut clauses, &mut params, "station", &query.station, false);

        let sql = format!(
            "SELECT series_uid, study_uid, modality, number, description, body_part, station
             FROM series{} ORDER BY series_uid",
            where_clause(&clauses)
        );
        self.with_conn(|conn| run_query(conn, &sql, &params, series_from_row))
    }

    /// Image level search.
    pub fn find_instances(&self, query: &InstanceQuery) -> Result<Vec<InstanceRecord>> {
        let (sql, params) = instance_query_sql(query, None);
        self.with_conn(|conn| run_query(conn, &sql, &params, instance_from_row))
    }

    /// Image level search delivered in batches,
    /// for match sets too large to hold at once.
    pub fn find_instances_batched(&self, query: &InstanceQuery, batch_size: usize) -> InstanceCursor<'_> {
        InstanceCursor {
            db: self,
            query: query.clone(),
            offset: 0,
            batch_size,
            done: false,
        }
    }
}

fn instance_query_sql(query: &InstanceQuery, page: Option<(usize, usize)>) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    push_filter(
        &mut clauses,
        &mut params,
        "i.sop_instance_uid",
        &query.sop_instance_uid,
        false,
    );
    push_filter(&mut clauses, &mut params, "i.series_uid", &query.series_uid, false);
    push_filter(&mut clauses, &mut params, "se.study_uid", &query.study_uid, false);
    push_filter(
        &mut clauses,
        &mut params,
        "i.sop_class_uid",
        &query.sop_class_uid,
        false,
    );
    push_filter(
        &mut clauses,
        &mut params,
        "i.instance_number",
        &query.instance_number,
        false,
    );

    let mut sql = format!(
        "SELECT i.sop_instance_uid, i.series_uid, i.sop_class_uid, i.path, i.size,
                i.transfer_syntax_uid, i.instance_number
         FROM instances i JOIN series se ON se.series_uid = i.series_uid{}
         ORDER BY i.sop_instance_uid",
        where_clause(&clauses)
    );
    if let Some((offset, limit)) = page {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    }
    (sql, params)
}

/// A batched cursor over an image level query.
pub struct InstanceCursor<'a> {
    db: &'a IndexDatabase,
    query: InstanceQuery,
    offset: usize,
    batch_size: usize,
    done: bool,
}

impl InstanceCursor<'_> {
    /// Fetch the next batch; an empty batch marks exhaustion.
    pub fn next_batch(&mut self) -> Result<Vec<InstanceRecord>> {
        if self.done {
            return Ok(Vec::new());
        }
        let (sql, params) = instance_query_sql(&self.query, Some((self.offset, self.batch_size)));
        let rows = self
            .db
            .with_conn(|conn| run_query(conn, &sql, &params, instance_from_row))?;
        self.offset += rows.len();
        if rows.len() < self.batch_size {
            self.done = true;
        }
        Ok(rows)
    }
}
