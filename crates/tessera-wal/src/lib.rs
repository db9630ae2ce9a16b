//! # tessera-wal
//!
//! Transaction log for Tessera nodes.
//!
//! Every committed local mutation is recorded as one text line in a numbered
//! segment file:
//!
//! ```text
//! <kind> <base64 name> <base64 value> <base64 metadata>
//! ```
//!
//! Writes go through a bounded queue into an in-memory buffer that a writer
//! task flushes on a fixed interval. A rotation task starts a new segment once
//! the active one reaches its record limit. On startup [`restore`] replays all
//! segments in numeric order into a [`Restorer`], normally the node's
//! [`tessera_store::Store`].
//!
//! Acknowledged writes may be lost if the process dies before the next flush.

pub mod error;
pub mod event;
pub mod log;
pub mod restore;
pub mod segment;

pub use error::{WalError, WalResult};
pub use event::{Event, EventKind, Mutation};
pub use log::{SyncMode, TransactionLog, WalConfig};
pub use restore::{apply, read_all, restore, RestoreStats, Restorer};
