//! Errors of the index database.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Could not open index database at `{}`", path))]
    OpenDatabase {
        path: String,
        source: rusqlite::Error,
    },

    #[snafu(display("Index operation `{}` failed", operation))]
    Sqlite {
        operation: &'static str,
        source: rusqlite::Error,
    },

    #[snafu(display("Patient `{}` still has studies", patient_id))]
    PatientHasStudies { patient_id: String },

    #[snafu(display("MPPS `{}` does not exist", mpps_uid))]
    MppsNotFound { mpps_uid: String },

    #[snafu(display("MPPS `{}` already exists", mpps_uid))]
    MppsAlreadyExists { mpps_uid: String },

    #[snafu(display("Illegal MPPS transition {} -> {} on `{}`", from, to, mpps_uid))]
    MppsIllegalTransition {
        mpps_uid: String,
        from: String,
        to: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
