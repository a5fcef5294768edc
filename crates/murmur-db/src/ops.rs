//! Units of work executed on the storage worker.
//!
//! Each submodule implements the operations for one category. Functions take
//! the [`crate::worker::Worker`] (or a bare `&Connection` when they need
//! nothing else), open their own transaction and emit events only after it
//! has committed.

pub mod dialogs;
pub mod files;
pub mod media;
pub mod messages;
pub mod peers;
pub mod secret;
