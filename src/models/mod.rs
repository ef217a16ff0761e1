mod agworld;
mod job;
mod report;

pub use agworld::{ActivityRecord, CropEntry, CropRecord, FieldRecord};
pub use job::{
    DeliveryStatus, JobCompletion, JobDescriptor, JobParams, JobRun, JobStats, JobStatus,
    JobTrigger, JobType, ParamValue,
};
pub use report::{ReportListParams, ReportMetadata};
