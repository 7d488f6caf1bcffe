//! logbook-core - Core library for Logbook
//!
//! This crate contains the record models, the durable local store, the
//! attachment pipeline and the sync engine that reconciles the local store
//! with the remote record service. The local store is always the source of
//! truth for the UI; the network is optional.

pub mod attachments;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use attachments::{AttachmentManager, BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{AttachmentRef, LocalId, Record, RecordFields, RemoteId};
pub use remote::{HttpRemoteService, RemoteService};
pub use store::LocalStore;
pub use sync::{SyncEngine, SyncState, SyncTrigger};
