pub mod file_service;
pub mod metadata;

pub use file_service::{Download, FileInfo, FileService, UploadReceipt, UploadRequest, UploadSettings};
pub use metadata::{DeleteOutcome, FileManager};
