//! Data models for Logbook

mod attachment;
mod record;

pub use attachment::AttachmentRef;
pub use record::{LocalId, Record, RecordFields, RemoteId};
