//! SOP class and service UIDs used by the built-in handlers.

/// Verification SOP Class (C-ECHO)
pub const VERIFICATION: &str = "1.2.840.10008.1.1";

/// Computed Radiography Image Storage
pub const CR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
/// CT Image Storage
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
/// Ultrasound Image Storage
pub const US_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.6.1";
/// Secondary Capture Image Storage
pub const SC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
/// MR Image Storage
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
/// Digital X-Ray Image Storage (presentation)
pub const DX_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1.1";
/// Nuclear Medicine Image Storage
pub const NM_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.20";
/// Positron Emission Tomography Image Storage
pub const PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";

/// The storage SOP classes accepted by the store service.
pub const STORAGE_SOP_CLASSES: &[&str] = &[
    CR_IMAGE_STORAGE,
    CT_IMAGE_STORAGE,
    MR_IMAGE_STORAGE,
    US_IMAGE_STORAGE,
    SC_IMAGE_STORAGE,
    DX_IMAGE_STORAGE,
    NM_IMAGE_STORAGE,
    PET_IMAGE_STORAGE,
];

/// Patient Root Query/Retrieve - FIND
pub const PATIENT_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// Patient Root Query/Retrieve - MOVE
pub const PATIENT_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
/// Patient Root Query/Retrieve - GET
pub const PATIENT_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
/// Study Root Query/Retrieve - FIND
pub const STUDY_ROOT_QR_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// Study Root Query/Retrieve - MOVE
pub const STUDY_ROOT_QR_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
/// Study Root Query/Retrieve - GET
pub const STUDY_ROOT_QR_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";

/// Modality Worklist Information Model - FIND
pub const MODALITY_WORKLIST_FIND: &str = "1.2.840.10008.5.1.4.31";

/// Modality Performed Procedure Step SOP Class
pub const MODALITY_PERFORMED_PROCEDURE_STEP: &str = "1.2.840.10008.3.1.2.3.3";
