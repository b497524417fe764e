//! Update records, their argument encodings, and per-transaction queues.
//!
//! A cache never mutates its state directly from application code. Each
//! mutation is described by an [`Update`] that is queued in the running
//! transaction, serialized to the log, and applied at commit or replay.

mod codec;
mod queue;
mod record;

pub use codec::{ArgReader, Serialized, UpdateArg, MAX_SEQUENCE_LEN};
pub use queue::{Enqueued, UpdateQueue};
pub use record::{encode_update, ReloadMarker, Update, UpdateRegistry};
