//! Client for a remote video-download backend.
//!
//! Keeps a local, authoritative cache of download tasks in sync from a periodic
//! full poll and a websocket push channel, and submits new downloads one at a
//! time or as a bulk import with per-URL failure reporting.

// --- Modules ---
pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod ordering;
pub mod poller;
pub mod session;
pub mod store;

pub use api::{ApiClient, TaskAction, TaskApi};
pub use channel::{Connector, LiveChannel, WsConnector};
pub use error::{ClientError, Result};
pub use import::{BulkImportReport, BulkImporter, ImportRules};
pub use models::{DownloadTask, ProgressMessage, TaskStatus};
pub use poller::Poller;
pub use session::Session;
pub use store::{StoreHandle, TaskStore};
