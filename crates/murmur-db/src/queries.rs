//! Table-level query functions organized by record store.
//!
//! Each module works on a plain `&Connection` and knows nothing about the
//! queue; multi-table units live in [`crate::ops`].

pub mod blocked;
pub mod chats;
pub mod contacts;
pub mod dialog_settings;
pub mod dialogs;
pub mod download_queue;
pub mod enc_chats;
pub mod enc_tasks;
pub mod keyboards;
pub mod media;
pub mod messages;
pub mod sent_files;
pub mod users;
