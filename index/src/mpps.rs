//! Performed procedure step storage and its state machine.
//!
//! N-CREATE brings a step into IN_PROGRESS;
//! N-SET may move IN_PROGRESS to COMPLETED or DISCONTINUED.
//! Every other transition is refused and leaves the row unchanged.

use crate::error::*;
use crate::records::{MppsRecord, MppsState};
use crate::IndexDatabase;
use rusqlite::{params, OptionalExtension};
use snafu::ResultExt;
use tracing::debug;

impl IndexDatabase {
    /// Create a new procedure step in IN_PROGRESS.
    pub fn create_mpps(&self, record: &MppsRecord) -> Result<()> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT mpps_uid FROM mpps WHERE mpps_uid = ?1",
                    params![record.mpps_uid],
                    |row| row.get(0),
                )
                .optional()
                .context(SqliteSnafu {
                    operation: "check mpps",
                })?;
            if existing.is_some() {
                return MppsAlreadyExistsSnafu {
                    mpps_uid: record.mpps_uid.clone(),
                }
                .fail();
            }

            conn.execute(
                "INSERT INTO mpps
                     (mpps_uid, station, modality, study_uid, accession, start_dt, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.mpps_uid,
                    record.station,
                    record.modality,
                    record.study_uid,
                    record.accession,
                    record.start_dt,
                    MppsState::InProgress.as_str()
                ],
            )
            .context(SqliteSnafu {
                operation: "create mpps",
            })?;
            Ok(())
        })
    }

    /// Transition a procedure step to a new state.
    ///
    /// Only IN_PROGRESS -> COMPLETED and IN_PROGRESS -> DISCONTINUED
    /// are legal; anything else fails without touching the row.
    pub fn update_mpps(&self, mpps_uid: &str, new_state: MppsState) -> Result<()> {
        self.with_conn(|conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT state FROM mpps WHERE mpps_uid = ?1",
                    params![mpps_uid],
                    |row| row.get(0),
                )
                .optional()
                .context(SqliteSnafu {
                    operation: "read mpps state",
                })?;

            let current = match current.as_deref().and_then(MppsState::from_str) {
                Some(state) => state,
                None => return MppsNotFoundSnafu { mpps_uid }.fail(),
            };

            let legal = current == MppsState::InProgress
                && matches!(new_state, MppsState::Completed | MppsState::Discontinued);
            if !legal {
                return MppsIllegalTransitionSnafu {
                    mpps_uid,
                    from: current.as_str(),
                    to: new_state.as_str(),
                }
                .fail();
            }

            conn.execute(
                "UPDATE mpps SET state = ?2 WHERE mpps_uid = ?1",
                params![mpps_uid, new_state.as_str()],
            )
            .context(SqliteSnafu {
                operation: "update mpps",
            })?;
            debug!(mpps_uid, state = new_state.as_str(), "mpps transition");
            Ok(())
        })
    }

    /// Fetch one procedure step.
    pub fn get_mpps(&self, mpps_uid: &str) -> Result<Option<MppsRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT mpps_uid, station, modality, study_uid, accession, start_dt, state
                 FROM mpps WHERE mpps_uid = ?1",
                params![mpps_uid],
                |row| {
                    Ok(MppsRecord {
                        mpps_uid: row.get(0)?,
                        station: row.get(1)?,
                        modality: row.get(2)?,
                        study_uid: row.get(3)?,
                        accession: row.get(4)?,
                        start_dt: row.get(5)?,
                        state: MppsState::from_str(&row.get::<_, String>(6)?)
                            .unwrap_or(MppsState::InProgress),
                    })
                },
            )
            .optional()
            .context(SqliteSnafu {
                operation: "get mpps",
            })
        })
    }
}
