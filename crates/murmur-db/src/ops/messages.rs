//! Message operations: storing batches, paging history, rekeying pending
//! messages, deletes and read state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::json;

use murmur_types::events::EventType;
use murmur_types::ids::{checked_compose, is_pending, local_part, PeerKind};
use murmur_types::records::{BotKeyboard, Dialog, DownloadItem, MediaKind, Message, SendState};
use murmur_types::{ChannelId, DialogId, MessageId, Timestamp};

use crate::consistency::{self, InsertSummary};
use crate::holes::{self, HoleKey};
use crate::ops::peers::{self, Peers};
use crate::ops::secret;
use crate::queries::messages::{self, RowState};
use crate::queries::{dialogs, download_queue, enc_tasks, keyboards, media};
use crate::sql::unique_ids;
use crate::worker::Worker;
use crate::{in_transaction, now_secs, Result, StorageError};

/// Direction of a history page relative to its anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadType {
    /// Older than the anchor; the newest page when the anchor is zero.
    Backward,
    /// Newer than the anchor, oldest first.
    Forward,
    /// Centered on the first unread message.
    FirstUnread,
    /// Centered on the anchor.
    Around,
}

/// What to page through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub dialog_id: DialogId,
    pub count: usize,
    /// Anchor message id, zero for none.
    pub anchor: MessageId,
    /// Anchor date; secret sessions page by date instead of id.
    pub anchor_date: Timestamp,
    pub load_type: LoadType,
    /// Page the important stream of a channel.
    pub important: bool,
}

impl PageRequest {
    pub fn backward(dialog_id: DialogId, count: usize) -> Self {
        PageRequest {
            dialog_id,
            count,
            anchor: 0,
            anchor_date: 0,
            load_type: LoadType::Backward,
            important: false,
        }
    }
}

/// One page of history with everything needed to render it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagesPage {
    pub dialog_id: DialogId,
    pub messages: Vec<Message>,
    pub peers: Peers,
    pub count_unread: i32,
    /// First unread message, zero when everything is read.
    pub first_unread: MessageId,
    /// Nothing older remains to be loaded.
    pub is_end: bool,
}

// ============================================================
// Storing
// ============================================================

/// Side effects of storing one batch, announced after commit.
#[derive(Default)]
struct Stored {
    summary: InsertSummary,
    media_counts: Vec<(DialogId, MediaKind)>,
    keyboards: Vec<DialogId>,
    queued_downloads: usize,
}

fn store_batch(
    tx: &Connection,
    worker: &Worker,
    batch: &[Message],
    download_mask: u32,
) -> Result<Stored> {
    let ids: Vec<MessageId> = batch.iter().map(|m| m.id).collect();
    let previous = messages::row_states(tx, &ids)?;
    let window_start = now_secs() - worker.limits.auto_download_window_secs;

    let mut stored = Stored::default();
    let mut new_media: BTreeMap<(DialogId, MediaKind), i32> = BTreeMap::new();
    for message in batch {
        messages::upsert(tx, message)?;
        if let Some(random_id) = message.random_id {
            messages::put_random(tx, random_id, message.id)?;
        }
        if let Some(attachment) = &message.media {
            media::put(tx, message)?;
            if !previous.contains_key(&message.id) && !is_pending(message.id) {
                *new_media.entry((message.dialog_id, attachment.kind)).or_default() += 1;
            }
            let bit = attachment.kind.download_bit();
            if bit & download_mask != 0 && message.date >= window_start {
                download_queue::put(
                    tx,
                    &DownloadItem {
                        id: attachment.file_id,
                        kind: bit,
                        date: message.date,
                        payload: messages::envelope(message)?,
                    },
                )?;
                stored.queued_downloads += 1;
            }
        }
        if let Some(payload) = &message.keyboard {
            let keyboard = BotKeyboard {
                dialog_id: message.dialog_id,
                message_id: message.id,
                payload: payload.clone(),
            };
            if keyboards::put_if_newer(tx, &keyboard)? {
                stored.keyboards.push(message.dialog_id);
            }
        }
    }

    stored.summary = consistency::after_insert(tx, batch, &previous)?;
    for ((dialog_id, kind), added) in new_media {
        if media::bump_count(tx, dialog_id, kind, added)? {
            stored.media_counts.push((dialog_id, kind));
        }
    }
    Ok(stored)
}

fn announce(worker: &Worker, stored: &Stored) {
    if !stored.summary.new_unread.is_empty() {
        worker.emit(
            EventType::NewUnreadMessages,
            json!({ "dialogs": stored.summary.new_unread }),
        );
    }
    if !stored.summary.created.is_empty() {
        worker.emit(
            EventType::DialogsNeedReload,
            json!({ "dialogs": stored.summary.created }),
        );
    }
    for (dialog_id, kind) in &stored.media_counts {
        worker.emit(
            EventType::MediaCountChanged,
            json!({ "dialog_id": dialog_id, "kind": kind }),
        );
    }
    for dialog_id in &stored.keyboards {
        worker.emit(EventType::BotKeyboardChanged, json!({ "dialog_id": dialog_id }));
    }
    if stored.queued_downloads > 0 {
        worker.emit(
            EventType::DownloadQueueChanged,
            json!({ "queued": stored.queued_downloads }),
        );
    }
}

/// Store a batch of messages that arrived outside of a history fetch
/// (new updates, sent messages).
///
/// Media newer than the auto-download window whose kind bit is set in
/// `download_mask` is queued for download.
pub fn put_messages(worker: &Worker, batch: &[Message], download_mask: u32) -> Result<InsertSummary> {
    if batch.is_empty() {
        return Ok(InsertSummary::default());
    }
    let stored = in_transaction(worker.conn(), |tx| store_batch(tx, worker, batch, download_mask))?;
    tracing::debug!(count = batch.len(), "Stored messages");
    announce(worker, &stored);
    Ok(stored.summary)
}

/// Store a page fetched from the network and close the matching range of
/// the hole ledger.
///
/// `request` is the page request the network fetch answered. A backward
/// page shorter than `request.count` means the oldest end of the history
/// was reached.
pub fn put_fetched_page(
    worker: &Worker,
    request: &PageRequest,
    page: &[Message],
    download_mask: u32,
) -> Result<InsertSummary> {
    let dialog_id = request.dialog_id;
    let stored = in_transaction(worker.conn(), |tx| {
        let stored = store_batch(tx, worker, page, download_mask)?;
        if !PeerKind::decode(dialog_id).is_secret() {
            close_fetched(tx, request, page)?;
        }
        Ok(stored)
    })?;
    tracing::debug!(dialog_id, count = page.len(), "Stored fetched page");
    announce(worker, &stored);
    Ok(stored.summary)
}

fn close_fetched(tx: &Connection, request: &PageRequest, page: &[Message]) -> Result<()> {
    let keys = if request.important {
        vec![HoleKey::important(request.dialog_id)]
    } else {
        vec![
            HoleKey::messages(request.dialog_id),
            HoleKey::important(request.dialog_id),
            HoleKey::all_media(request.dialog_id),
        ]
    };

    let confirmed: Vec<MessageId> = page.iter().map(|m| m.id).filter(|id| *id > 0).collect();
    let (Some(min), Some(max)) = (confirmed.iter().min().copied(), confirmed.iter().max().copied())
    else {
        if request.load_type == LoadType::Backward {
            for key in &keys {
                holes::mark_complete_at_boundary(tx, key, request.anchor)?;
            }
        }
        return Ok(());
    };

    let anchor = (request.anchor > 0).then_some(request.anchor);
    let (low, high) = match request.load_type {
        LoadType::Backward => (min, anchor.map_or(max, |a| a.max(max))),
        LoadType::Forward => (anchor.map_or(min, |a| a.min(min)), max),
        LoadType::FirstUnread | LoadType::Around => (min, max),
    };
    for key in &keys {
        holes::close_range(tx, key, low, high)?;
        if request.load_type == LoadType::Backward && page.len() < request.count {
            holes::mark_complete_at_boundary(tx, key, high)?;
        }
    }
    Ok(())
}

// ============================================================
// Paging
// ============================================================

fn stream_key(request: &PageRequest) -> HoleKey {
    if request.important {
        HoleKey::important(request.dialog_id)
    } else {
        HoleKey::messages(request.dialog_id)
    }
}

/// Messages at or below `upper`, newest first, stopping at the nearest hole.
///
/// Returns the rows and whether nothing but the history start lies below.
fn page_down(
    conn: &Connection,
    request: &PageRequest,
    upper: Option<MessageId>,
    limit: usize,
    include_pending: bool,
) -> Result<(Vec<Message>, bool)> {
    let key = stream_key(request);
    let probe = upper.unwrap_or(i64::MAX);
    if holes::is_inside_hole(conn, &key, probe)? {
        return Ok((Vec::new(), false));
    }
    let floor = holes::max_end_at_or_below(conn, &key, probe)?;
    let mut range = messages::Range::new(request.dialog_id, limit);
    range.min_id = floor;
    range.max_id = upper;
    range.include_pending = include_pending;
    range.important_only = request.important;
    let rows = messages::range(conn, &range)?;
    let bottom = floor.map_or(true, |f| local_part(f) <= 1) && rows.len() < limit;
    Ok((rows, bottom))
}

/// Messages at or above `lower`, oldest first, stopping at the nearest hole.
fn page_up(
    conn: &Connection,
    request: &PageRequest,
    lower: MessageId,
    limit: usize,
) -> Result<Vec<Message>> {
    let key = stream_key(request);
    if holes::is_inside_hole(conn, &key, lower)? {
        return Ok(Vec::new());
    }
    let ceiling = holes::nearest_start_at_or_above(conn, &key, lower)?;
    let mut range = messages::Range::new(request.dialog_id, limit);
    range.min_id = Some(lower);
    range.max_id = ceiling;
    range.important_only = request.important;
    range.descending = false;
    messages::range(conn, &range)
}

fn sort_newest_first(rows: &mut [Message]) {
    rows.sort_by(|a, b| (b.date, b.id).cmp(&(a.date, a.id)));
}

/// Load one page of history.
///
/// Pages never cross a hole: a page that would reach into a range not
/// known to be cached is cut at the hole, and a page whose anchor lies
/// inside a hole is empty.
pub fn get_messages(conn: &Connection, request: &PageRequest) -> Result<MessagesPage> {
    let dialog_id = request.dialog_id;
    let dialog = dialogs::find(conn, dialog_id)?.unwrap_or_else(|| Dialog {
        id: dialog_id,
        ..Dialog::default()
    });
    let count_unread = if request.important {
        dialog.unread_important
    } else {
        dialog.unread_count
    };
    let first_unread = messages::first_unread(conn, dialog_id, request.important)?
        .map_or(0, |(mid, _)| mid);

    let (messages, is_end) = if PeerKind::decode(dialog_id).is_secret() {
        secret_page(conn, request)?
    } else {
        let boundary = holes::query_boundary(conn, &stream_key(request))?;
        let (rows, bottom) = history_page(conn, request, first_unread)?;
        (rows, boundary && bottom)
    };

    let peers = peers::referenced(conn, &[dialog_id], &messages)?;
    Ok(MessagesPage {
        dialog_id,
        messages,
        peers,
        count_unread,
        first_unread,
        is_end,
    })
}

fn history_page(
    conn: &Connection,
    request: &PageRequest,
    first_unread: MessageId,
) -> Result<(Vec<Message>, bool)> {
    let count = request.count;
    let anchor = match request.load_type {
        LoadType::FirstUnread => first_unread,
        _ => request.anchor,
    };
    match request.load_type {
        LoadType::Backward => {
            let upper = (anchor != 0).then(|| anchor - 1);
            page_down(conn, request, upper, count, anchor == 0)
        }
        LoadType::Forward => {
            if anchor == 0 {
                return Ok((Vec::new(), false));
            }
            Ok((page_up(conn, request, anchor + 1, count)?, false))
        }
        LoadType::FirstUnread | LoadType::Around => {
            if anchor == 0 {
                return page_down(conn, request, None, count, true);
            }
            let (mut rows, bottom) = page_down(conn, request, Some(anchor), count / 2, false)?;
            let remaining = count.saturating_sub(rows.len());
            rows.extend(page_up(conn, request, anchor + 1, remaining)?);
            sort_newest_first(&mut rows);
            Ok((rows, bottom))
        }
    }
}

/// Secret sessions have no hole ledger: everything ever received is stored,
/// and pages are cut by date.
fn secret_page(conn: &Connection, request: &PageRequest) -> Result<(Vec<Message>, bool)> {
    let mut range = messages::Range::new(request.dialog_id, request.count);
    range.include_pending = true;
    let anchor_date = (request.anchor_date != 0).then_some(request.anchor_date);
    match request.load_type {
        LoadType::Backward => {
            range.max_date = anchor_date.map(|d| d - 1);
            let rows = messages::range(conn, &range)?;
            let end = rows.len() < request.count;
            Ok((rows, end))
        }
        LoadType::Forward => {
            let Some(date) = anchor_date else {
                return Ok((Vec::new(), false));
            };
            range.min_date = Some(date + 1);
            range.descending = false;
            Ok((messages::range(conn, &range)?, false))
        }
        LoadType::FirstUnread | LoadType::Around => {
            range.limit = request.count / 2;
            range.max_date = anchor_date;
            let mut rows = messages::range(conn, &range)?;
            let end = rows.len() < range.limit;
            if let Some(date) = anchor_date {
                let mut newer = messages::Range::new(request.dialog_id, request.count - rows.len());
                newer.include_pending = true;
                newer.min_date = Some(date + 1);
                newer.descending = false;
                rows.extend(messages::range(conn, &newer)?);
            }
            sort_newest_first(&mut rows);
            Ok((rows, end))
        }
    }
}

// ============================================================
// Rekey
// ============================================================

/// Composite id of a message addressed by local id and channel.
fn scoped_id(local_id: i32, channel: ChannelId) -> Result<MessageId> {
    checked_compose(local_id, channel)
        .ok_or_else(|| StorageError::InvalidId(format!("negative channel scope {channel}")))
}

/// Move a locally pending message to its server-assigned id.
///
/// The pending message is found by `random_id` when given, else by
/// `old_id`. If the confirmed copy already arrived, the pending row is
/// dropped and pointers move to the confirmed one. Repeating a finished
/// rekey is a no-op. Returns the new composite id.
pub fn rekey(
    worker: &Worker,
    random_id: Option<i64>,
    old_id: MessageId,
    new_local_id: i32,
    channel: ChannelId,
    date: Timestamp,
) -> Result<MessageId> {
    let conn = worker.conn();
    let new_id = scoped_id(new_local_id, channel)?;
    let old_id = match random_id {
        Some(random_id) => messages::mid_for_random(conn, random_id)?.unwrap_or(old_id),
        None => old_id,
    };

    if old_id == new_id {
        messages::confirm(conn, new_id, date)?;
        return Ok(new_id);
    }
    if !messages::exists(conn, old_id)? {
        if messages::exists(conn, new_id)? {
            return Ok(new_id);
        }
        return Err(StorageError::NotFound(format!("message {old_id}")));
    }

    if messages::exists(conn, new_id)? {
        in_transaction(conn, |tx| {
            dialogs::repoint(tx, old_id, new_id)?;
            messages::confirm(tx, new_id, date)?;
            drop_orphan(tx, old_id)
        })?;
    } else {
        let moved = in_transaction(conn, |tx| {
            messages::change_id(tx, old_id, new_id, date)?;
            messages::rekey_randoms(tx, old_id, new_id)?;
            media::rekey(tx, old_id, new_id)?;
            messages::rekey_seq(tx, old_id, new_id)?;
            keyboards::rekey(tx, old_id, new_id)?;
            dialogs::repoint(tx, old_id, new_id)?;
            Ok(())
        });
        if let Err(e) = moved {
            tracing::error!(old_id, new_id, "Rekey failed, dropping pending copy: {e}");
            if let Err(cleanup) = in_transaction(conn, |tx| drop_orphan(tx, old_id)) {
                tracing::warn!(old_id, "Dropping pending copy failed: {cleanup}");
            }
            return Err(e);
        }
    }

    tracing::debug!(old_id, new_id, "Rekeyed message");
    worker.emit(
        EventType::MessageIdChanged,
        json!({ "old_id": old_id, "new_id": new_id, "channel": channel }),
    );
    Ok(new_id)
}

/// Remove a pending copy and everything pointing at it. Dialogs that still
/// point at it fall back to their newest remaining message.
fn drop_orphan(tx: &Connection, old_id: MessageId) -> Result<()> {
    let rows: Vec<RowState> = messages::row_states(tx, &[old_id])?.into_values().collect();
    messages::delete(tx, &[old_id])?;
    media::delete(tx, &[old_id])?;
    enc_tasks::delete(tx, &[old_id])?;
    keyboards::delete_for_messages(tx, &[old_id])?;
    consistency::after_delete(tx, &rows)?;
    Ok(())
}

// ============================================================
// Deletes
// ============================================================

/// Local attachment files of secret-session messages.
pub(crate) fn secret_attachments(worker: &Worker, rows: &[Message]) -> Vec<PathBuf> {
    rows.iter()
        .filter(|m| PeerKind::decode(m.dialog_id).is_secret())
        .filter_map(|m| m.media.as_ref())
        .filter_map(|attachment| worker.files.resolve_local_path(attachment))
        .collect()
}

/// Delete messages by local id within one channel (zero for ordinary
/// dialogs). Returns the dialogs whose aggregates changed.
pub fn delete_messages(
    worker: &Worker,
    local_ids: &[i32],
    channel: ChannelId,
) -> Result<Vec<DialogId>> {
    let ids = local_ids
        .iter()
        .map(|id| scoped_id(*id, channel))
        .collect::<Result<Vec<_>>>()?;
    let ids = unique_ids(ids);
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let (touched, keyboard_dialogs, files) = in_transaction(worker.conn(), |tx| {
        let states: Vec<RowState> = messages::row_states(tx, &ids)?.into_values().collect();
        let rows = messages::decode_all(messages::get_many(tx, &ids)?);
        let files = secret_attachments(worker, &rows);

        messages::delete(tx, &ids)?;
        media::delete(tx, &ids)?;
        enc_tasks::delete(tx, &ids)?;
        let keyboard_dialogs = keyboards::delete_for_messages(tx, &ids)?;

        let dialog_ids = unique_ids(states.iter().map(|row| row.dialog_id));
        media::clear_counts(tx, &dialog_ids)?;
        let touched = consistency::after_delete(tx, &states)?;
        Ok((touched, keyboard_dialogs, files))
    })?;

    if !files.is_empty() {
        worker.files.delete_files(files);
    }
    worker.emit(
        EventType::MessagesDeleted,
        json!({ "ids": local_ids, "channel": channel }),
    );
    for dialog_id in keyboard_dialogs {
        worker.emit(EventType::BotKeyboardChanged, json!({ "dialog_id": dialog_id }));
    }
    if !touched.is_empty() {
        worker.emit(EventType::DialogsNeedReload, json!({ "dialogs": touched }));
    }
    Ok(touched)
}

// ============================================================
// Read state
// ============================================================

/// Read receipts to apply in one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadReceipts {
    /// Highest incoming message read, per dialog.
    pub inbox: BTreeMap<DialogId, MessageId>,
    /// Highest outgoing message the peer has read, per dialog.
    pub outbox: BTreeMap<DialogId, MessageId>,
    /// Latest outgoing date the peer has read, per secret session.
    pub encrypted: BTreeMap<i32, Timestamp>,
}

impl ReadReceipts {
    pub fn is_empty(&self) -> bool {
        self.inbox.is_empty() && self.outbox.is_empty() && self.encrypted.is_empty()
    }
}

/// Set read bits, lower unread counters and raise the read maxima.
///
/// Outgoing secret-session messages read by the peer start their
/// self-destruct timers.
pub fn mark_read(worker: &Worker, receipts: &ReadReceipts) -> Result<()> {
    if receipts.is_empty() {
        return Ok(());
    }
    let now = now_secs();
    in_transaction(worker.conn(), |tx| {
        for (dialog_id, max_id) in &receipts.inbox {
            let (read, read_important) = messages::mark_read_up_to(tx, *dialog_id, *max_id, false)?;
            consistency::after_read(tx, *dialog_id, read, read_important)?;
            dialogs::raise_read_max(tx, *dialog_id, local_part(*max_id), 0)?;
        }
        for (dialog_id, max_id) in &receipts.outbox {
            messages::mark_read_up_to(tx, *dialog_id, *max_id, true)?;
            dialogs::raise_read_max(tx, *dialog_id, 0, local_part(*max_id))?;
        }
        for (session_id, max_date) in &receipts.encrypted {
            let dialog_id = murmur_types::ids::secret_dialog(*session_id);
            messages::mark_read_by_date(tx, dialog_id, *max_date)?;
            secret::create_tasks(tx, *session_id, *max_date, now)?;
        }
        Ok(())
    })?;

    if !receipts.inbox.is_empty() || !receipts.outbox.is_empty() {
        worker.emit(
            EventType::MessagesRead,
            json!({ "inbox": receipts.inbox, "outbox": receipts.outbox }),
        );
    }
    if !receipts.encrypted.is_empty() {
        worker.emit(
            EventType::EncryptedMessagesRead,
            json!({ "sessions": receipts.encrypted }),
        );
    }
    Ok(())
}

pub fn mark_content_read(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    in_transaction(conn, |tx| messages::mark_content_read(tx, &unique_ids(ids.iter().copied())))
}

pub fn update_send_state(conn: &Connection, id: MessageId, state: SendState) -> Result<bool> {
    Ok(messages::set_send_state(conn, id, state)? > 0)
}

/// Messages left in `Sending` by a previous run can never be acknowledged.
pub fn mark_send_failed(conn: &Connection) -> Result<Vec<MessageId>> {
    let failed = messages::fail_sending(conn)?;
    if !failed.is_empty() {
        tracing::info!(count = failed.len(), "Marked interrupted sends as failed");
    }
    Ok(failed)
}

pub fn message_exists(conn: &Connection, id: MessageId) -> Result<bool> {
    messages::exists(conn, id)
}

/// Unread state for notifications.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnreadSnapshot {
    /// Dialogs with unread messages that are not muted.
    pub dialogs: Vec<Dialog>,
    /// Newest unread messages across those dialogs.
    pub messages: Vec<Message>,
    pub peers: Peers,
}

pub fn load_unread(worker: &Worker) -> Result<UnreadSnapshot> {
    let conn = worker.conn();
    let dialogs = dialogs::unread_unmuted(conn)?;
    let messages = messages::unread_preview(conn, worker.limits.unread_preview_limit)?;
    let dialog_ids: Vec<DialogId> = dialogs.iter().map(|d| d.id).collect();
    let peers = peers::referenced(conn, &dialog_ids, &messages)?;
    Ok(UnreadSnapshot {
        dialogs,
        messages,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::events::EventBus;
    use crate::files::{NoopFileManager, RecordingFileManager};
    use crate::holes::Hole;
    use crate::queries::messages::tests::message;
    use crate::worker::Location;
    use murmur_types::ids::secret_dialog;
    use murmur_types::records::{read_flags, MediaReference};
    use std::sync::Arc;

    const DID: DialogId = 42;

    fn worker() -> Worker {
        let (worker, _) = Worker::open(
            Location::Memory,
            &StoreConfig::default(),
            EventBus::new(64),
            Arc::new(NoopFileManager),
        )
        .expect("open worker");
        worker
    }

    fn with_media(mut msg: Message, kind: MediaKind, file_id: i64) -> Message {
        msg.media = Some(MediaReference {
            kind,
            file_id,
            location: 1,
            file_name: None,
            size: 100,
        });
        msg
    }

    fn ids(page: &[Message]) -> Vec<MessageId> {
        page.iter().map(|m| m.id).collect()
    }

    fn holes_of(worker: &Worker, key: HoleKey) -> Vec<(MessageId, MessageId)> {
        holes::list(worker.conn(), &key)
            .expect("holes")
            .iter()
            .map(|h: &Hole| (h.start, h.end))
            .collect()
    }

    #[test]
    fn test_put_messages_emits_unread_and_queues_downloads() {
        let worker = worker();
        let mut rx = worker.events.subscribe();
        let now = now_secs();
        let fresh = with_media(message(1, DID, now), MediaKind::PhotoVideo, 501);
        let stale = with_media(message(2, DID, now - 200_000), MediaKind::PhotoVideo, 502);
        let link = with_media(message(3, DID, now), MediaKind::Url, 503);

        let summary = put_messages(&worker, &[fresh, stale, link], u32::MAX).expect("put");
        assert_eq!(summary.new_unread.get(&DID), Some(&3));

        let queued = download_queue::top(worker.conn(), MediaKind::PhotoVideo.download_bit(), 3)
            .expect("queue");
        assert_eq!(queued.iter().map(|d| d.id).collect::<Vec<_>>(), vec![501]);

        let kinds: Vec<EventType> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type)
            .collect();
        assert!(kinds.contains(&EventType::NewUnreadMessages));
        assert!(kinds.contains(&EventType::DialogsNeedReload));
        assert!(kinds.contains(&EventType::DownloadQueueChanged));
    }

    #[test]
    fn test_media_count_only_bumped_when_known() {
        let worker = worker();
        let conn = worker.conn();
        put_messages(&worker, &[with_media(message(1, DID, 10), MediaKind::File, 1)], 0)
            .expect("put");
        assert_eq!(media::get_count(conn, DID, MediaKind::File).expect("count"), None);

        media::put_count(conn, DID, MediaKind::File, 4).expect("put count");
        put_messages(&worker, &[with_media(message(2, DID, 20), MediaKind::File, 2)], 0)
            .expect("put");
        // Re-storing a known message does not count twice.
        put_messages(&worker, &[with_media(message(2, DID, 20), MediaKind::File, 2)], 0)
            .expect("put again");
        assert_eq!(media::get_count(conn, DID, MediaKind::File).expect("count"), Some(5));
    }

    #[test]
    fn test_backward_fetch_closes_range_and_pages_stop_at_hole() {
        let worker = worker();
        holes::seed(worker.conn(), &HoleKey::messages(DID), 100).expect("seed");

        let newest: Vec<Message> = (91..=100).map(|id| message(id, DID, id * 10)).collect();
        put_fetched_page(&worker, &PageRequest::backward(DID, 10), &newest, 0).expect("page");
        assert_eq!(holes_of(&worker, HoleKey::messages(DID)), vec![(0, 91)]);

        // Unrelated older message stored out of band stays invisible.
        put_messages(&worker, &[message(50, DID, 500)], 0).expect("put");

        let page = get_messages(worker.conn(), &PageRequest::backward(DID, 20)).expect("page");
        assert_eq!(ids(&page.messages), (91..=100).rev().collect::<Vec<_>>());
        assert!(!page.is_end);

        let mut older = PageRequest::backward(DID, 20);
        older.anchor = 91;
        let page = get_messages(worker.conn(), &older).expect("older page");
        assert!(page.messages.is_empty());
    }

    #[test]
    fn test_short_backward_page_reaches_boundary() {
        let worker = worker();
        holes::seed(worker.conn(), &HoleKey::messages(DID), 5).expect("seed");
        let history: Vec<Message> = (2..=5).map(|id| message(id, DID, id)).collect();
        put_fetched_page(&worker, &PageRequest::backward(DID, 10), &history, 0).expect("page");

        assert_eq!(holes_of(&worker, HoleKey::messages(DID)), vec![(1, 1)]);
        let page = get_messages(worker.conn(), &PageRequest::backward(DID, 10)).expect("page");
        assert_eq!(page.messages.len(), 4);
        assert!(page.is_end);
        assert_eq!(page.count_unread, 4);
        assert_eq!(page.first_unread, 2);
    }

    #[test]
    fn test_empty_backward_page_marks_complete() {
        let worker = worker();
        holes::seed(worker.conn(), &HoleKey::messages(DID), 30).expect("seed");
        let mut request = PageRequest::backward(DID, 10);
        request.anchor = 30;
        put_fetched_page(&worker, &request, &[], 0).expect("empty page");
        assert_eq!(holes_of(&worker, HoleKey::messages(DID)), vec![(1, 1)]);
    }

    #[test]
    fn test_forward_and_around_pages() {
        let worker = worker();
        let batch: Vec<Message> = (1..=10).map(|id| message(id, DID, id * 10)).collect();
        put_messages(&worker, &batch, 0).expect("put");
        holes::insert(worker.conn(), &HoleKey::messages(DID), 8, 10).expect("hole");

        let mut forward = PageRequest::backward(DID, 10);
        forward.load_type = LoadType::Forward;
        forward.anchor = 4;
        let page = get_messages(worker.conn(), &forward).expect("forward");
        assert_eq!(ids(&page.messages), vec![5, 6, 7, 8]);

        let mut around = PageRequest::backward(DID, 6);
        around.load_type = LoadType::Around;
        around.anchor = 5;
        let page = get_messages(worker.conn(), &around).expect("around");
        assert_eq!(ids(&page.messages), vec![8, 7, 6, 5, 4, 3]);
    }

    #[test]
    fn test_first_unread_centers_page() {
        let worker = worker();
        let mut batch: Vec<Message> = (1..=9).map(|id| message(id, DID, id * 10)).collect();
        for msg in batch.iter_mut().take(6) {
            msg.read_state = read_flags::READ;
        }
        put_messages(&worker, &batch, 0).expect("put");

        let mut request = PageRequest::backward(DID, 4);
        request.load_type = LoadType::FirstUnread;
        let page = get_messages(worker.conn(), &request).expect("first unread");
        assert_eq!(page.first_unread, 7);
        assert_eq!(ids(&page.messages), vec![9, 8, 7, 6]);
        assert_eq!(page.count_unread, 3);
    }

    #[test]
    fn test_rekey_moves_pending_message() {
        let worker = worker();
        let mut pending = with_media(message(-5, DID, 100), MediaKind::Audio, 9);
        pending.out = true;
        pending.random_id = Some(777);
        pending.send_state = SendState::Sending;
        put_messages(&worker, &[pending], 0).expect("put");

        let new_id = rekey(&worker, Some(777), -5, 60, 0, 120).expect("rekey");
        assert_eq!(new_id, 60);
        let moved = messages::get(worker.conn(), 60).expect("moved");
        assert_eq!((moved.send_state, moved.date), (SendState::Confirmed, 120));
        assert!(!messages::exists(worker.conn(), -5).expect("exists"));
        assert_eq!(dialogs::get(worker.conn(), DID).expect("dialog").last_message_id, 60);
        let indexed = media::page(worker.conn(), DID, MediaKind::Audio, None, None, 10)
            .expect("media");
        assert_eq!(ids(&indexed), vec![60]);

        // Second delivery of the same acknowledgement changes nothing.
        assert_eq!(rekey(&worker, Some(777), -5, 60, 0, 120).expect("again"), 60);
        assert_eq!(rekey(&worker, None, -5, 60, 0, 120).expect("again"), 60);
    }

    #[test]
    fn test_rekey_onto_existing_drops_orphan() {
        let worker = worker();
        let mut pending = message(-1, DID, 100);
        pending.out = true;
        put_messages(&worker, &[pending], 0).expect("put");
        let mut confirmed = message(70, DID, 90);
        confirmed.out = true;
        put_messages(&worker, &[confirmed], 0).expect("put");

        rekey(&worker, None, -1, 70, 0, 95).expect("rekey");
        assert!(!messages::exists(worker.conn(), -1).expect("exists"));
        assert_eq!(dialogs::get(worker.conn(), DID).expect("dialog").last_message_id, 70);
    }

    #[test]
    fn test_failed_rekey_repoints_dialog() {
        let worker = worker();
        put_messages(&worker, &[message(4, DID, 50)], 0).expect("put");
        let mut pending = message(-2, DID, 100);
        pending.out = true;
        pending.keyboard = Some(vec![7]);
        put_messages(&worker, &[pending], 0).expect("put");
        assert_eq!(dialogs::get(worker.conn(), DID).expect("dialog").last_message_id, -2);

        worker
            .conn()
            .execute_batch(
                "CREATE TRIGGER block_rekey BEFORE UPDATE OF mid ON messages
                 BEGIN SELECT RAISE(ABORT, 'rekey blocked'); END;",
            )
            .expect("trigger");
        assert!(rekey(&worker, None, -2, 80, 0, 120).is_err());

        assert!(!messages::exists(worker.conn(), -2).expect("exists"));
        assert!(keyboards::get(worker.conn(), DID).expect("keyboard").is_none());
        let dialog = dialogs::get(worker.conn(), DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count), (4, 1));
    }

    #[test]
    fn test_delete_undecodable_message_repairs_dialog() {
        let worker = worker();
        put_messages(&worker, &[message(1, DID, 10), message(2, DID, 20)], 0).expect("put");
        worker
            .conn()
            .execute("UPDATE messages SET data = x'FF00' WHERE mid = 2", [])
            .expect("corrupt envelope");

        assert_eq!(delete_messages(&worker, &[2], 0).expect("delete"), vec![DID]);
        assert!(!messages::exists(worker.conn(), 2).expect("exists"));
        let dialog = dialogs::get(worker.conn(), DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count), (1, 1));
    }

    #[test]
    fn test_negative_channel_scope_is_rejected() {
        let worker = worker();
        let mut pending = message(-3, DID, 10);
        pending.out = true;
        put_messages(&worker, &[pending], 0).expect("put");

        assert!(matches!(
            rekey(&worker, None, -3, 5, i32::MIN + 7, 20),
            Err(StorageError::InvalidId(_))
        ));
        assert!(messages::exists(worker.conn(), -3).expect("exists"));
        assert!(matches!(
            delete_messages(&worker, &[5], -1),
            Err(StorageError::InvalidId(_))
        ));
    }

    #[test]
    fn test_rekey_unknown_message() {
        let worker = worker();
        assert!(matches!(
            rekey(&worker, None, -9, 10, 0, 0),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_repairs_dialog_and_cascades() {
        let worker = worker();
        let mut keyed = message(3, DID, 30);
        keyed.keyboard = Some(vec![1]);
        let batch = vec![message(1, DID, 10), message(2, DID, 20), keyed];
        put_messages(&worker, &batch, 0).expect("put");
        media::put_count(worker.conn(), DID, MediaKind::File, 2).expect("count");

        let touched = delete_messages(&worker, &[3, 2], 0).expect("delete");
        assert_eq!(touched, vec![DID]);
        let dialog = dialogs::get(worker.conn(), DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count, dialog.date), (1, 1, 30));
        assert!(keyboards::get(worker.conn(), DID).expect("keyboard").is_none());
        assert_eq!(media::get_count(worker.conn(), DID, MediaKind::File).expect("count"), None);
    }

    #[test]
    fn test_delete_secret_message_releases_files() {
        let files = Arc::new(RecordingFileManager::new("/files"));
        let (worker, _) = Worker::open(
            Location::Memory,
            &StoreConfig::default(),
            EventBus::new(8),
            files.clone(),
        )
        .expect("open worker");
        let secret = secret_dialog(4);
        put_messages(&worker, &[with_media(message(8, secret, 10), MediaKind::File, 31)], 0)
            .expect("put");
        put_messages(&worker, &[with_media(message(9, DID, 10), MediaKind::File, 32)], 0)
            .expect("put");

        delete_messages(&worker, &[8, 9], 0).expect("delete");
        assert_eq!(files.deleted(), vec![PathBuf::from("/files/31")]);
    }

    #[test]
    fn test_mark_read_lowers_counters() {
        let worker = worker();
        let batch: Vec<Message> = (1..=4).map(|id| message(id, DID, id)).collect();
        put_messages(&worker, &batch, 0).expect("put");

        let mut receipts = ReadReceipts::default();
        receipts.inbox.insert(DID, 3);
        mark_read(&worker, &receipts).expect("read");

        let dialog = dialogs::get(worker.conn(), DID).expect("dialog");
        assert_eq!((dialog.unread_count, dialog.inbox_max), (1, 3));
        let derived = consistency::derive(worker.conn(), DID).expect("derive");
        assert_eq!(derived.unread_count, dialog.unread_count);
    }

    #[test]
    fn test_mark_send_failed_on_startup() {
        let worker = worker();
        let mut sending = message(-3, DID, 10);
        sending.out = true;
        sending.send_state = SendState::Sending;
        put_messages(&worker, &[sending], 0).expect("put");

        assert_eq!(mark_send_failed(worker.conn()).expect("fail"), vec![-3]);
        assert_eq!(
            messages::get(worker.conn(), -3).expect("get").send_state,
            SendState::Failed
        );
        assert!(message_exists(worker.conn(), -3).expect("exists"));
    }

    #[test]
    fn test_load_unread_skips_muted() {
        let worker = worker();
        put_messages(&worker, &[message(1, DID, 10), message(2, 43, 20)], 0).expect("put");
        crate::queries::dialog_settings::set(
            worker.conn(),
            43,
            murmur_types::records::dialog_flags::MUTED,
        )
        .expect("mute");

        let snapshot = load_unread(&worker).expect("unread");
        assert_eq!(snapshot.dialogs.iter().map(|d| d.id).collect::<Vec<_>>(), vec![DID]);
        assert_eq!(ids(&snapshot.messages), vec![1]);
    }
}
