//! Row types of the index tables.

/// One row of the `patients` table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatientRecord {
    pub patient_id: String,
    pub name: String,
    pub birth_date: String,
    pub sex: String,
}

/// One row of the `studies` table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudyRecord {
    pub study_uid: String,
    pub patient_id: String,
    pub accession: String,
    pub study_date: String,
    pub study_time: String,
    pub referring_physician: String,
    pub description: String,
}

/// One row of the `series` table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeriesRecord {
    pub series_uid: String,
    pub study_uid: String,
    pub modality: String,
    pub number: String,
    pub description: String,
    pub body_part: String,
    pub station: String,
}

/// One row of the `instances` table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceRecord {
    pub sop_instance_uid: String,
    pub series_uid: String,
    pub sop_class_uid: String,
    pub path: String,
    pub size: u64,
    pub transfer_syntax_uid: String,
    pub instance_number: String,
}

/// A study row joined with its patient, as matched by a study level
/// query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudyMatch {
    pub study: StudyRecord,
    pub patient: PatientRecord,
}

/// The state of a performed procedure step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MppsState {
    InProgress,
    Completed,
    Discontinued,
}

impl MppsState {
    pub fn as_str(self) -> &'static str {
        match self {
            MppsState::InProgress => "IN_PROGRESS",
            MppsState::Completed => "COMPLETED",
            MppsState::Discontinued => "DISCONTINUED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(MppsState::InProgress),
            "COMPLETED" => Some(MppsState::Completed),
            "DISCONTINUED" => Some(MppsState::Discontinued),
            _ => None,
        }
    }
}

/// One row of the `mpps` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MppsRecord {
    pub mpps_uid: String,
    pub station: String,
    pub modality: String,
    pub study_uid: String,
    pub accession: String,
    pub start_dt: String,
    pub state: MppsState,
}

/// One row of the `worklist` table:
/// a scheduled procedure step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorklistRecord {
    pub step_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub birth_date: String,
    pub sex: String,
    pub accession: String,
    pub requested_proc_id: String,
    pub study_uid: String,
    pub scheduled_dt: String,
    pub station_ae: String,
    pub station_name: String,
    pub modality: String,
    pub procedure_desc: String,
    pub referring_physician: String,
    pub referring_physician_id: String,
}
