//! Identifier data set helpers shared by the query handlers:
//! decoding and encoding in the negotiated transfer syntax,
//! mapping query attributes onto index filters,
//! and projecting matches back onto the queried tags.

use crate::error::*;
use pacs_core::dictionary::{tags, vr_of};
use pacs_core::{DataElement, Dataset, PrimitiveValue, Tag, Value};
use pacs_encoding::TransferSyntax;
use pacs_index::query::{InstanceQuery, PatientQuery, QueryLevel, SeriesQuery, StudyQuery};
use pacs_index::records::{InstanceRecord, PatientRecord, SeriesRecord, StudyMatch, WorklistRecord};
use pacs_index::worklist::WorklistFilter;
use snafu::ResultExt;

/// Decode an identifier data set in the given transfer syntax.
pub fn decode_identifier(bytes: &[u8], transfer_syntax: &str) -> Result<Dataset, HandlerError> {
    let syntax = TransferSyntax::from_uid(transfer_syntax).ok_or_else(|| {
        HandlerError::TransferSyntaxNotSupported {
            uid: transfer_syntax.to_string(),
        }
    })?;
    syntax.decode_dataset(bytes).context(DatasetMismatchSnafu)
}

/// Encode an identifier data set in the given transfer syntax.
pub fn encode_identifier(dataset: &Dataset, transfer_syntax: &str) -> Result<Vec<u8>, HandlerError> {
    let syntax = TransferSyntax::from_uid(transfer_syntax).ok_or_else(|| {
        HandlerError::TransferSyntaxNotSupported {
            uid: transfer_syntax.to_string(),
        }
    })?;
    syntax.encode_dataset(dataset).context(EncodePayloadSnafu)
}

/// The query level of an identifier, if it names one.
pub fn query_level(identifier: &Dataset) -> Option<QueryLevel> {
    identifier
        .get_str(tags::QUERY_RETRIEVE_LEVEL)
        .and_then(QueryLevel::from_str)
}

fn value_of(identifier: &Dataset, tag: Tag) -> String {
    identifier.get_str(tag).unwrap_or_default().to_string()
}

/// The filter parameters of an identifier, for cache keying:
/// every non-level attribute as `GGGGEEEE=value`.
pub fn cache_params(identifier: &Dataset) -> Vec<(String, String)> {
    identifier
        .iter()
        .filter(|element| element.tag() != tags::QUERY_RETRIEVE_LEVEL)
        .map(|element| {
            let name = format!("{:04X}{:04X}", element.tag().group(), element.tag().element());
            let value = element.string().unwrap_or_default().to_string();
            (name, value)
        })
        .collect()
}

pub fn patient_query(identifier: &Dataset) -> PatientQuery {
    PatientQuery {
        patient_id: value_of(identifier, tags::PATIENT_ID),
        name: value_of(identifier, tags::PATIENT_NAME),
        birth_date: value_of(identifier, tags::PATIENT_BIRTH_DATE),
        sex: value_of(identifier, tags::PATIENT_SEX),
    }
}

pub fn study_query(identifier: &Dataset) -> StudyQuery {
    StudyQuery {
        study_uid: value_of(identifier, tags::STUDY_INSTANCE_UID),
        patient_id: value_of(identifier, tags::PATIENT_ID),
        patient_name: value_of(identifier, tags::PATIENT_NAME),
        accession: value_of(identifier, tags::ACCESSION_NUMBER),
        study_date: value_of(identifier, tags::STUDY_DATE),
        study_time: value_of(identifier, tags::STUDY_TIME),
        referring_physician: value_of(identifier, tags::REFERRING_PHYSICIAN_NAME),
        description: value_of(identifier, tags::STUDY_DESCRIPTION),
    }
}

pub fn series_query(identifier: &Dataset) -> SeriesQuery {
    SeriesQuery {
        series_uid: value_of(identifier, tags::SERIES_INSTANCE_UID),
        study_uid: value_of(identifier, tags::STUDY_INSTANCE_UID),
        modality: value_of(identifier, tags::MODALITY),
        number: value_of(identifier, tags::SERIES_NUMBER),
        body_part: value_of(identifier, tags::BODY_PART_EXAMINED),
        station: value_of(identifier, tags::STATION_NAME),
    }
}

pub fn instance_query(identifier: &Dataset) -> InstanceQuery {
    InstanceQuery {
        sop_instance_uid: value_of(identifier, tags::SOP_INSTANCE_UID),
        series_uid: value_of(identifier, tags::SERIES_INSTANCE_UID),
        study_uid: value_of(identifier, tags::STUDY_INSTANCE_UID),
        sop_class_uid: value_of(identifier, tags::SOP_CLASS_UID),
        instance_number: value_of(identifier, tags::INSTANCE_NUMBER),
    }
}

pub fn worklist_filter(identifier: &Dataset) -> WorklistFilter {
    // scheduled attributes may arrive nested in the scheduled
    // procedure step sequence
    let scheduled = identifier
        .get(tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE)
        .and_then(|element| element.value().items())
        .and_then(<[Dataset]>::first);

    let scheduled_value = |tag: Tag| -> String {
        scheduled
            .map(|item| value_of(item, tag))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| value_of(identifier, tag))
    };

    WorklistFilter {
        patient_id: value_of(identifier, tags::PATIENT_ID),
        patient_name: value_of(identifier, tags::PATIENT_NAME),
        accession: value_of(identifier, tags::ACCESSION_NUMBER),
        modality: scheduled_value(tags::MODALITY),
        station_ae: scheduled_value(tags::SCHEDULED_STATION_AE_TITLE),
        scheduled_dt: scheduled_value(tags::SCHEDULED_PROCEDURE_STEP_START_DATE),
    }
}

/// Build the response identifier for one match:
/// only the queried tags are present (universal matching),
/// plus the query level itself.
fn project(
    identifier: &Dataset,
    level: QueryLevel,
    mut lookup: impl FnMut(Tag) -> Option<String>,
) -> Dataset {
    let mut response = Dataset::new();
    response.put_str(
        tags::QUERY_RETRIEVE_LEVEL,
        vr_of(tags::QUERY_RETRIEVE_LEVEL),
        level.as_str(),
    );
    for element in identifier.iter() {
        let tag = element.tag();
        if tag == tags::QUERY_RETRIEVE_LEVEL {
            continue;
        }
        let value = match lookup(tag) {
            Some(value) => Value::Primitive(PrimitiveValue::Str(value)),
            None => Value::Primitive(PrimitiveValue::Empty),
        };
        response.put(DataElement::new(tag, element.vr(), value));
    }
    response
}

pub fn project_patient(identifier: &Dataset, patient: &PatientRecord) -> Dataset {
    project(identifier, QueryLevel::Patient, |tag| match tag {
        t if t == tags::PATIENT_ID => Some(patient.patient_id.clone()),
        t if t == tags::PATIENT_NAME => Some(patient.name.clone()),
        t if t == tags::PATIENT_BIRTH_DATE => Some(patient.birth_date.clone()),
        t if t == tags::PATIENT_SEX => Some(patient.sex.clone()),
        _ => None,
    })
}

pub fn project_study(identifier: &Dataset, hit: &StudyMatch) -> Dataset {
    project(identifier, QueryLevel::Study, |tag| match tag {
        t if t == tags::STUDY_INSTANCE_UID => Some(hit.study.study_uid.clone()),
        t if t == tags::PATIENT_ID => Some(hit.patient.patient_id.clone()),
        t if t == tags::PATIENT_NAME => Some(hit.patient.name.clone()),
        t if t == tags::PATIENT_BIRTH_DATE => Some(hit.patient.birth_date.clone()),
        t if t == tags::PATIENT_SEX => Some(hit.patient.sex.clone()),
        t if t == tags::ACCESSION_NUMBER => Some(hit.study.accession.clone()),
        t if t == tags::STUDY_DATE => Some(hit.study.study_date.clone()),
        t if t == tags::STUDY_TIME => Some(hit.study.study_time.clone()),
        t if t == tags::REFERRING_PHYSICIAN_NAME => Some(hit.study.referring_physician.clone()),
        t if t == tags::STUDY_DESCRIPTION => Some(hit.study.description.clone()),
        _ => None,
    })
}

pub fn project_series(identifier: &Dataset, series: &SeriesRecord) -> Dataset {
    project(identifier, QueryLevel::Series, |tag| match tag {
        t if t == tags::SERIES_INSTANCE_UID => Some(series.series_uid.clone()),
        t if t == tags::STUDY_INSTANCE_UID => Some(series.study_uid.clone()),
        t if t == tags::MODALITY => Some(series.modality.clone()),
        t if t == tags::SERIES_NUMBER => Some(series.number.clone()),
        t if t == tags::SERIES_DESCRIPTION => Some(series.description.clone()),
        t if t == tags::BODY_PART_EXAMINED => Some(series.body_part.clone()),
        t if t == tags::STATION_NAME => Some(series.station.clone()),
        _ => None,
    })
}

pub fn project_instance(identifier: &Dataset, instance: &InstanceRecord) -> Dataset {
    project(identifier, QueryLevel::Image, |tag| match tag {
        t if t == tags::SOP_INSTANCE_UID => Some(instance.sop_instance_uid.clone()),
        t if t == tags::SOP_CLASS_UID => Some(instance.sop_class_uid.clone()),
        t if t == tags::SERIES_INSTANCE_UID => Some(instance.series_uid.clone()),
        t if t == tags::INSTANCE_NUMBER => Some(instance.instance_number.clone()),
        _ => None,
    })
}

/// Project one worklist match. Scheduled attributes queried through
/// the scheduled procedure step sequence come back the same way.
pub fn project_worklist(identifier: &Dataset, item: &WorklistRecord) -> Dataset {
    let mut response = Dataset::new();
    for element in identifier.iter() {
        let tag = element.tag();
        if tag == tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE {
            let queried_item = element
                .value()
                .items()
                .and_then(<[Dataset]>::first)
                .cloned()
                .unwrap_or_default();
            let mut sequence_item = Dataset::new();
            for nested in queried_item.iter() {
                let value = scheduled_value_of(nested.tag(), item);
                sequence_item.put(DataElement::new(
                    nested.tag(),
                    nested.vr(),
                    match value {
                        Some(v) => Value::Primitive(PrimitiveValue::Str(v)),
                        None => Value::Primitive(PrimitiveValue::Empty),
                    },
                ));
            }
            response.put(DataElement::new(
                tag,
                element.vr(),
                Value::Sequence(vec![sequence_item]),
            ));
            continue;
        }
        let value = flat_worklist_value_of(tag, item);
        response.put(DataElement::new(
            tag,
            element.vr(),
            match value {
                Some(v) => Value::Primitive(PrimitiveValue::Str(v)),
                None => Value::Primitive(PrimitiveValue::Empty),
            },
        ));
    }
    response
}

fn flat_worklist_value_of(tag: Tag, item: &WorklistRecord) -> Option<String> {
    match tag {
        t if t == tags::PATIENT_ID => Some(item.patient_id.clone()),
        t if t == tags::PATIENT_NAME => Some(item.patient_name.clone()),
        t if t == tags::PATIENT_BIRTH_DATE => Some(item.birth_date.clone()),
        t if t == tags::PATIENT_SEX => Some(item.sex.clone()),
        t if t == tags::ACCESSION_NUMBER => Some(item.accession.clone()),
        t if t == tags::REQUESTED_PROCEDURE_ID => Some(item.requested_proc_id.clone()),
        t if t == tags::STUDY_INSTANCE_UID => Some(item.study_uid.clone()),
        t if t == tags::REFERRING_PHYSICIAN_NAME => Some(item.referring_physician.clone()),
        _ => scheduled_value_of(tag, item),
    }
}

fn scheduled_value_of(tag: Tag, item: &WorklistRecord) -> Option<String> {
    match tag {
        t if t == tags::SCHEDULED_STATION_AE_TITLE => Some(item.station_ae.clone()),
        t if t == tags::SCHEDULED_STATION_NAME => Some(item.station_name.clone()),
        t if t == tags::MODALITY => Some(item.modality.clone()),
        t if t == tags::SCHEDULED_PROCEDURE_STEP_START_DATE => {
            Some(item.scheduled_dt.split('T').next().unwrap_or_default().to_string())
        }
        t if t == tags::SCHEDULED_PROCEDURE_STEP_DESCRIPTION => Some(item.procedure_desc.clone()),
        _ => None,
    }
}
