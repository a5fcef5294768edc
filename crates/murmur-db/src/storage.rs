//! The storage handle.
//!
//! [`Storage`] owns the task queue and its worker. Every operation is a unit
//! of work submitted to the queue. Most methods return a [`Ticket`] to
//! `.await` (or [`Ticket::wait`] on a plain thread); the `*_sync` accessors
//! block the caller and fail with [`StorageError::Reentrant`] when issued
//! from a unit running on the worker.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use tokio::sync::broadcast;

use murmur_types::events::{Event, EventType};
use murmur_types::records::{
    BotKeyboard, Chat, Contact, DownloadItem, EncryptedChat, MediaKind, Message, SendState,
    SentFile, User,
};
use murmur_types::{ChannelId, DialogId, MessageId, Timestamp};

use crate::config::StoreConfig;
use crate::consistency::InsertSummary;
use crate::events::EventBus;
use crate::files::FileManager;
use crate::holes::{self, Hole, HoleKey};
use crate::migrations::{self, Outcome};
use crate::ops::dialogs::{self as dialog_ops, DialogsBatch, DialogsPage};
use crate::ops::files as file_ops;
use crate::ops::media::{self as media_ops, MediaPage};
use crate::ops::messages::{self as message_ops, MessagesPage, PageRequest, ReadReceipts, UnreadSnapshot};
use crate::ops::peers as peer_ops;
use crate::ops::secret::{self as secret_ops, ChatUpdate};
use crate::queries::{blocked, chats, contacts, dialog_settings, enc_chats, keyboards, users};
use crate::queue::{QueueState, TaskQueue, Ticket};
use crate::session::SessionState;
use crate::worker::{Location, Worker};
use crate::{Result, StorageError};

const WORKER_THREAD: &str = "murmur-storage";

pub struct Storage {
    queue: TaskQueue<Worker>,
    events: EventBus,
    opened: Outcome,
}

impl Storage {
    /// Open the database at `config.database_path()`.
    pub fn open(config: &StoreConfig, files: Arc<dyn FileManager>) -> Result<Self> {
        Self::start(Location::File(config.database_path()), config, files)
    }

    /// Open a database that lives only as long as the handle.
    pub fn open_in_memory(config: &StoreConfig, files: Arc<dyn FileManager>) -> Result<Self> {
        Self::start(Location::Memory, config, files)
    }

    /// Open the database at an explicit path, ignoring the configured location.
    pub fn open_path(path: PathBuf, config: &StoreConfig, files: Arc<dyn FileManager>) -> Result<Self> {
        Self::start(Location::File(path), config, files)
    }

    fn start(location: Location, config: &StoreConfig, files: Arc<dyn FileManager>) -> Result<Self> {
        let events = EventBus::new(config.limits.event_capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let worker_events = events.clone();
        let worker_config = config.clone();
        let queue = TaskQueue::spawn(WORKER_THREAD, move || {
            let (worker, outcome) = Worker::open(location, &worker_config, worker_events, files)?;
            let _ = outcome_tx.send(outcome);
            Ok(worker)
        })?;
        let opened = outcome_rx.recv().map_err(|_| StorageError::QueueClosed)?;

        tracing::info!(
            from = opened.from_version,
            to = opened.to_version,
            rebuilt = opened.rebuilt,
            "Storage opened"
        );

        let storage = Storage {
            queue,
            events,
            opened,
        };
        storage.after_open()?;
        Ok(storage)
    }

    /// Queue the post-open work: migration side jobs, then failing sends
    /// interrupted by the previous run.
    fn after_open(&self) -> Result<()> {
        for job in self.opened.side_jobs.clone() {
            self.queue.post(move |worker| match migrations::run_side_job(worker.conn(), job) {
                Ok(rows) => tracing::info!(?job, rows, "Migration side job finished"),
                Err(e) => tracing::warn!(?job, "Migration side job failed: {e}"),
            })?;
        }
        self.queue.post(|worker| {
            if let Err(e) = message_ops::mark_send_failed(worker.conn()) {
                tracing::warn!("Failing interrupted sends failed: {e}");
            }
        })?;

        let opened = self.opened.clone();
        if opened.rebuilt || opened.from_version != opened.to_version {
            self.queue.post(move |worker| {
                worker.emit(
                    EventType::SchemaMigrated,
                    serde_json::json!({
                        "from": opened.from_version,
                        "to": opened.to_version,
                        "rebuilt": opened.rebuilt,
                    }),
                );
            })?;
        }
        Ok(())
    }

    /// What happened to the schema when the store was opened.
    pub fn opened(&self) -> &Outcome {
        &self.opened
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> QueueState {
        self.queue.state()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Submit an arbitrary unit. Failures are logged before being handed back.
    pub fn run<T, F>(&self, name: &'static str, unit: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T> + Send + 'static,
    {
        self.queue.request(logged(name, unit))
    }

    /// Submit a unit whose result is handed to `callback` on the delivery thread.
    pub fn run_with<T, F, K>(&self, name: &'static str, unit: F, callback: K) -> Result<()>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T> + Send + 'static,
        K: FnOnce(Result<T>) + Send + 'static,
    {
        self.queue.post_with(logged(name, unit), callback)
    }

    /// Run a unit and block until it has finished.
    pub fn run_sync<T, F>(&self, name: &'static str, unit: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T> + Send + 'static,
    {
        self.queue.call_sync(logged(name, unit))
    }

    // ============================================================
    // Messages
    // ============================================================

    pub fn put_messages(&self, batch: Vec<Message>, download_mask: u32) -> Ticket<InsertSummary> {
        self.run("put_messages", move |w| {
            message_ops::put_messages(w, &batch, download_mask)
        })
    }

    pub fn put_fetched_page(
        &self,
        request: PageRequest,
        page: Vec<Message>,
        download_mask: u32,
    ) -> Ticket<InsertSummary> {
        self.run("put_fetched_page", move |w| {
            message_ops::put_fetched_page(w, &request, &page, download_mask)
        })
    }

    pub fn get_messages(&self, request: PageRequest) -> Ticket<MessagesPage> {
        self.run("get_messages", move |w| message_ops::get_messages(w.conn(), &request))
    }

    pub fn rekey(
        &self,
        random_id: Option<i64>,
        old_id: MessageId,
        new_local_id: i32,
        channel: ChannelId,
        date: Timestamp,
    ) -> Ticket<MessageId> {
        self.run("rekey", move |w| {
            message_ops::rekey(w, random_id, old_id, new_local_id, channel, date)
        })
    }

    pub fn delete_messages(&self, local_ids: Vec<i32>, channel: ChannelId) -> Ticket<Vec<DialogId>> {
        self.run("delete_messages", move |w| {
            message_ops::delete_messages(w, &local_ids, channel)
        })
    }

    pub fn mark_read(&self, receipts: ReadReceipts) -> Ticket<()> {
        self.run("mark_read", move |w| message_ops::mark_read(w, &receipts))
    }

    pub fn mark_content_read(&self, ids: Vec<MessageId>) -> Ticket<usize> {
        self.run("mark_content_read", move |w| {
            message_ops::mark_content_read(w.conn(), &ids)
        })
    }

    pub fn update_send_state(&self, id: MessageId, state: SendState) -> Ticket<bool> {
        self.run("update_send_state", move |w| {
            message_ops::update_send_state(w.conn(), id, state)
        })
    }

    pub fn mark_send_failed(&self) -> Ticket<Vec<MessageId>> {
        self.run("mark_send_failed", |w| message_ops::mark_send_failed(w.conn()))
    }

    pub fn message_exists(&self, id: MessageId) -> Ticket<bool> {
        self.run("message_exists", move |w| message_ops::message_exists(w.conn(), id))
    }

    pub fn load_unread_messages(&self) -> Ticket<UnreadSnapshot> {
        self.run("load_unread_messages", |w| message_ops::load_unread(w))
    }

    pub fn get_bot_keyboard(&self, dialog_id: DialogId) -> Ticket<Option<BotKeyboard>> {
        self.run("get_bot_keyboard", move |w| keyboards::get(w.conn(), dialog_id))
    }

    // ============================================================
    // Dialogs
    // ============================================================

    pub fn put_dialogs(&self, batch: DialogsBatch) -> Ticket<()> {
        self.run("put_dialogs", move |w| dialog_ops::put_dialogs(w, &batch))
    }

    pub fn get_dialogs(&self, offset: usize, count: usize) -> Ticket<DialogsPage> {
        self.run("get_dialogs", move |w| dialog_ops::get_dialogs(w.conn(), offset, count))
    }

    pub fn delete_dialog(&self, dialog_id: DialogId, messages_only: bool) -> Ticket<()> {
        self.run("delete_dialog", move |w| {
            dialog_ops::delete_dialog(w, dialog_id, messages_only)
        })
    }

    pub fn set_dialog_flags(&self, dialog_id: DialogId, flags: i64) -> Ticket<()> {
        self.run("set_dialog_flags", move |w| {
            dialog_ops::set_dialog_flags(w, dialog_id, flags)
        })
    }

    pub fn get_dialog_flags(&self, dialog_id: DialogId) -> Ticket<i64> {
        self.run("get_dialog_flags", move |w| dialog_settings::get(w.conn(), dialog_id))
    }

    pub fn get_channel_pts(&self, dialog_id: DialogId) -> Ticket<i32> {
        self.run("get_channel_pts", move |w| {
            dialog_ops::get_channel_pts(w.conn(), dialog_id)
        })
    }

    pub fn save_channel_pts(&self, dialog_id: DialogId, pts: i32) -> Ticket<bool> {
        self.run("save_channel_pts", move |w| {
            dialog_ops::save_channel_pts(w.conn(), dialog_id, pts)
        })
    }

    /// Holes of one ledger scope, for diagnostics.
    pub fn holes(&self, key: HoleKey) -> Ticket<Vec<Hole>> {
        self.run("holes", move |w| holes::list(w.conn(), &key))
    }

    // ============================================================
    // Media
    // ============================================================

    pub fn get_media(
        &self,
        dialog_id: DialogId,
        kind: MediaKind,
        max_id: MessageId,
        count: usize,
    ) -> Ticket<MediaPage> {
        self.run("get_media", move |w| {
            media_ops::get_media(w.conn(), dialog_id, kind, max_id, count)
        })
    }

    pub fn put_media(
        &self,
        dialog_id: DialogId,
        kind: MediaKind,
        page: Vec<Message>,
        max_id: MessageId,
        reached_end: bool,
    ) -> Ticket<()> {
        self.run("put_media", move |w| {
            media_ops::put_media(w.conn(), dialog_id, kind, &page, max_id, reached_end)
        })
    }

    pub fn get_media_count(&self, dialog_id: DialogId, kind: MediaKind) -> Ticket<Option<i32>> {
        self.run("get_media_count", move |w| {
            media_ops::get_media_count(w.conn(), dialog_id, kind)
        })
    }

    pub fn put_media_count(&self, dialog_id: DialogId, kind: MediaKind, count: i32) -> Ticket<()> {
        self.run("put_media_count", move |w| {
            media_ops::put_media_count(w, dialog_id, kind, count)
        })
    }

    // ============================================================
    // Users, chats, contacts
    // ============================================================

    pub fn put_users(&self, batch: Vec<User>) -> Ticket<()> {
        self.run("put_users", move |w| peer_ops::put_users(w.conn(), &batch))
    }

    /// `(user id, status)` pairs; see [`murmur_types::records::user_status`].
    pub fn update_user_statuses(&self, statuses: Vec<(i32, i32)>) -> Ticket<usize> {
        self.run("update_user_statuses", move |w| {
            peer_ops::update_statuses(w.conn(), &statuses)
        })
    }

    pub fn get_users(&self, ids: Vec<i64>) -> Ticket<Vec<User>> {
        self.run("get_users", move |w| users::get_many(w.conn(), &ids))
    }

    pub fn search_users(&self, query: String, limit: usize) -> Ticket<Vec<i32>> {
        self.run("search_users", move |w| users::search(w.conn(), &query, limit))
    }

    pub fn get_user_sync(&self, id: i32) -> Result<Option<User>> {
        self.run_sync("get_user_sync", move |w| users::get(w.conn(), id))
    }

    pub fn put_chats(&self, batch: Vec<Chat>) -> Ticket<()> {
        self.run("put_chats", move |w| peer_ops::put_chats(w, &batch))
    }

    pub fn get_chats(&self, ids: Vec<i64>) -> Ticket<Vec<Chat>> {
        self.run("get_chats", move |w| chats::get_many(w.conn(), &ids))
    }

    pub fn get_chat_sync(&self, id: i32) -> Result<Option<Chat>> {
        self.run_sync("get_chat_sync", move |w| chats::get(w.conn(), id))
    }

    pub fn put_contacts(&self, batch: Vec<Contact>, replace_all: bool) -> Ticket<()> {
        self.run("put_contacts", move |w| {
            peer_ops::put_contacts(w.conn(), &batch, replace_all)
        })
    }

    pub fn delete_contacts(&self, user_ids: Vec<i64>) -> Ticket<usize> {
        self.run("delete_contacts", move |w| contacts::delete(w.conn(), &user_ids))
    }

    pub fn get_contacts(&self) -> Ticket<Vec<Contact>> {
        self.run("get_contacts", |w| contacts::list(w.conn()))
    }

    pub fn put_blocked_users(&self, user_ids: Vec<i32>, replace_all: bool) -> Ticket<()> {
        self.run("put_blocked_users", move |w| {
            peer_ops::put_blocked(w.conn(), &user_ids, replace_all)
        })
    }

    pub fn delete_blocked_user(&self, user_id: i32) -> Ticket<()> {
        self.run("delete_blocked_user", move |w| blocked::delete(w.conn(), user_id))
    }

    /// Load the block list; subscribers also receive it as `BlockedUsersLoaded`.
    pub fn load_blocked_users(&self) -> Ticket<Vec<i32>> {
        self.run("load_blocked_users", |w| peer_ops::load_blocked(w))
    }

    // ============================================================
    // Secret sessions
    // ============================================================

    pub fn put_encrypted_chat(&self, chat: EncryptedChat) -> Ticket<()> {
        self.run("put_encrypted_chat", move |w| {
            secret_ops::put_encrypted_chat(w.conn(), &chat)
        })
    }

    pub fn update_encrypted_chat(&self, chat: EncryptedChat, update: ChatUpdate) -> Ticket<bool> {
        self.run("update_encrypted_chat", move |w| {
            secret_ops::update_encrypted_chat(w.conn(), &chat, update)
        })
    }

    pub fn get_encrypted_chat_sync(&self, id: i32) -> Result<Option<EncryptedChat>> {
        self.run_sync("get_encrypted_chat_sync", move |w| enc_chats::get(w.conn(), id))
    }

    pub fn create_secret_tasks(
        &self,
        session_id: i32,
        max_date: Timestamp,
        read_time: Timestamp,
    ) -> Ticket<usize> {
        self.run("create_secret_tasks", move |w| {
            secret_ops::create_tasks(w.conn(), session_id, max_date, read_time)
        })
    }

    /// Acknowledge the `previous` batch and fetch the next due one.
    pub fn take_due_tasks(
        &self,
        previous: Vec<MessageId>,
    ) -> Ticket<Option<(Timestamp, Vec<MessageId>)>> {
        self.run("take_due_tasks", move |w| secret_ops::take_due(w.conn(), &previous))
    }

    // ============================================================
    // Downloads and sent files
    // ============================================================

    pub fn put_downloads(&self, items: Vec<DownloadItem>) -> Ticket<()> {
        self.run("put_downloads", move |w| file_ops::put_downloads(w, &items))
    }

    pub fn remove_downloads(&self, ids: Vec<i64>, kind: u32, move_to_back: bool) -> Ticket<usize> {
        self.run("remove_downloads", move |w| {
            file_ops::remove_downloads(w, &ids, kind, move_to_back)
        })
    }

    pub fn clear_downloads(&self, kind_mask: u32) -> Ticket<usize> {
        self.run("clear_downloads", move |w| file_ops::clear_downloads(w, kind_mask))
    }

    pub fn top_downloads(&self, kind: u32) -> Ticket<Vec<DownloadItem>> {
        self.run("top_downloads", move |w| file_ops::top_downloads(w, kind))
    }

    pub fn put_sent_file(&self, file: SentFile) -> Ticket<()> {
        self.run("put_sent_file", move |w| file_ops::put_sent_file(w.conn(), &file))
    }

    pub fn get_sent_file_sync(&self, path: String, kind: i32) -> Result<Option<SentFile>> {
        self.run_sync("get_sent_file_sync", move |w| {
            file_ops::get_sent_file(w.conn(), &path, kind)
        })
    }

    // ============================================================
    // Session cursors
    // ============================================================

    /// Persist the update-stream cursors; returns `false` when unchanged.
    pub fn save_diff_params(&self, seq: i32, pts: i32, date: i32, qts: i32) -> Ticket<bool> {
        self.run("save_diff_params", move |w| {
            let (conn, session) = w.session_mut();
            session.save_diff(conn, seq, pts, date, qts)
        })
    }

    pub fn save_secret_params(
        &self,
        last_secret_version: i32,
        secret_g: i32,
        secret_p: Option<Vec<u8>>,
    ) -> Ticket<()> {
        self.run("save_secret_params", move |w| {
            let (conn, session) = w.session_mut();
            session.save_secret(conn, last_secret_version, secret_g, secret_p)
        })
    }

    pub fn session(&self) -> Ticket<SessionState> {
        self.run("session", |w| Ok(w.session.clone()))
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    /// Delete the database and start over with an empty cache and fresh
    /// session cursors.
    pub fn reset(&self) -> Ticket<Outcome> {
        self.run("reset", |w| {
            let outcome = w.reopen(true)?;
            tracing::info!("Storage reset");
            w.emit(EventType::StorageReset, serde_json::Value::Null);
            Ok(outcome)
        })
    }

    /// Finish the queued units and stop the worker.
    pub fn close(&self) {
        self.queue.shutdown();
    }
}

/// Wrap a unit so its failure is logged on the worker.
fn logged<T, F>(name: &'static str, unit: F) -> impl FnOnce(&mut Worker) -> Result<T> + Send + 'static
where
    F: FnOnce(&mut Worker) -> Result<T> + Send + 'static,
{
    move |worker| {
        tracing::debug!(unit = name, "Running storage unit");
        let result = unit(worker);
        if let Err(e) = &result {
            tracing::error!(unit = name, "Storage unit failed: {e}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::NoopFileManager;
    use crate::queries::messages::tests::message;

    fn storage() -> Storage {
        Storage::open_in_memory(&StoreConfig::default(), Arc::new(NoopFileManager))
            .expect("open storage")
    }

    #[test]
    fn test_round_trip_through_queue() {
        let storage = storage();
        storage
            .put_messages(vec![message(1, 3, 10), message(2, 3, 20)], 0)
            .wait()
            .expect("put");
        let page = storage
            .get_messages(PageRequest::backward(3, 10))
            .wait()
            .expect("page");
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.count_unread, 2);
        assert!(storage.message_exists(2).wait().expect("exists"));
    }

    #[test]
    fn test_sync_accessor_inside_unit_is_rejected() {
        let storage = Arc::new(storage());
        let inner = Arc::clone(&storage);
        let result = storage
            .run("nested", move |_| Ok(inner.get_user_sync(1)))
            .wait()
            .expect("outer unit");
        assert!(matches!(result, Err(StorageError::Reentrant)));
    }

    #[test]
    fn test_session_params_skip_unchanged() {
        let storage = storage();
        assert!(storage.save_diff_params(1, 2, 3, 4).wait().expect("save"));
        assert!(!storage.save_diff_params(1, 2, 3, 4).wait().expect("again"));
        assert_eq!(storage.session().wait().expect("session").pts, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let storage = storage();
        let mut rx = storage.subscribe();
        storage.put_messages(vec![message(1, 3, 10)], 0).wait().expect("put");
        storage.save_diff_params(5, 6, 7, 8).wait().expect("save");

        storage.reset().wait().expect("reset");
        assert!(!storage.message_exists(1).wait().expect("exists"));
        assert_eq!(storage.session().wait().expect("session").seq, 0);
        let saw_reset = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| e.event_type == EventType::StorageReset);
        assert!(saw_reset);
    }

    #[test]
    fn test_run_with_delivers_result() {
        let storage = storage();
        let (tx, rx) = std::sync::mpsc::channel();
        storage
            .run_with(
                "count",
                |w| dialog_ops::get_dialogs(w.conn(), 0, 10),
                move |page| {
                    let _ = tx.send(page.map(|p| p.dialogs.len()));
                },
            )
            .expect("submit");
        let delivered = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("delivered");
        assert_eq!(delivered.expect("page"), 0);
    }

    #[test]
    fn test_close_then_submit() {
        let storage = storage();
        storage.close();
        assert!(matches!(
            storage.message_exists(1).wait(),
            Err(StorageError::QueueClosed)
        ));
    }
}
