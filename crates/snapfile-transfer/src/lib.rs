//! snapfile-transfer: HTTP side of the client
//!
//!   - `api`: session endpoints (`/signup`, `/login`, `/logout`) and raw file
//!     upload/download with status mapping
//!   - `orchestrator`: file → EncryptingStream → POST, and
//!     GET → DecryptingStream → temp file → rename

pub mod api;
pub mod orchestrator;

pub use api::ApiClient;
pub use orchestrator::{
    sanitize_file_name, DownloadResult, ProgressFn, TransferOrchestrator, UploadOutcome,
    UploadResult,
};
