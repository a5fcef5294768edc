//! Integration test: hole-aware history paging.
//!
//! Walks a conversation from first sight to a fully cached history:
//! 1. Storing the dialog list seeds a hole below the last message
//! 2. Fetched pages close the range they cover
//! 3. A short backward page closes the history start
//! 4. Pages never cross a hole, whatever order pages arrive in
//!
//! Also covers the interval algebra corner cases on a live store and the
//! last-message pointer that never moves back.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use murmur_db::holes::{self, HoleKey};
use murmur_db::ops::dialogs::DialogsBatch;
use murmur_db::ops::messages::{LoadType, PageRequest};
use murmur_integration_tests::{message, messages, open_store, ScratchDir};
use murmur_types::records::{Dialog, SendState};
use murmur_types::{DialogId, MessageId};

fn ids(rows: &[murmur_types::records::Message]) -> Vec<MessageId> {
    rows.iter().map(|m| m.id).collect()
}

fn dialog(id: DialogId, last: MessageId) -> Dialog {
    Dialog {
        id,
        date: 1_000 + last * 10,
        last_message_id: last,
        ..Dialog::default()
    }
}

fn request(dialog_id: DialogId, load_type: LoadType, anchor: MessageId, count: usize) -> PageRequest {
    PageRequest {
        anchor,
        load_type,
        ..PageRequest::backward(dialog_id, count)
    }
}

#[test]
fn history_fills_in_page_by_page() {
    const DID: DialogId = 9;
    let dir = ScratchDir::new("paging");
    let storage = open_store(&dir);

    // =========================================================
    // Step 1: The dialog list introduces the conversation
    // =========================================================
    storage
        .put_dialogs(DialogsBatch {
            dialogs: vec![dialog(DID, 100)],
            messages: vec![message(100, DID, 2_000)],
            ..DialogsBatch::default()
        })
        .wait()
        .expect("put dialogs");

    let holes = storage.holes(HoleKey::messages(DID)).wait().expect("holes");
    assert_eq!(holes.iter().map(|h| (h.start, h.end)).collect::<Vec<_>>(), vec![(0, 100)]);

    let page = storage
        .get_messages(PageRequest::backward(DID, 20))
        .wait()
        .expect("page");
    assert_eq!(ids(&page.messages), vec![100]);
    assert!(!page.is_end);

    // =========================================================
    // Step 2: A full backward page below the last message
    // =========================================================
    storage
        .put_fetched_page(
            request(DID, LoadType::Backward, 100, 10),
            messages(DID, 90..=99),
            0,
        )
        .wait()
        .expect("put page");
    let page = storage
        .get_messages(PageRequest::backward(DID, 20))
        .wait()
        .expect("page");
    assert_eq!(ids(&page.messages), (90..=100).rev().collect::<Vec<_>>());
    assert!(!page.is_end);

    // Asking below the cached range lands inside the hole.
    let below = storage
        .get_messages(request(DID, LoadType::Backward, 90, 20))
        .wait()
        .expect("page");
    assert!(below.messages.is_empty());

    // =========================================================
    // Step 3: A short page reaches the start of the history
    // =========================================================
    storage
        .put_fetched_page(
            request(DID, LoadType::Backward, 90, 100),
            messages(DID, 1..=89),
            0,
        )
        .wait()
        .expect("put page");

    let holes = storage.holes(HoleKey::messages(DID)).wait().expect("holes");
    assert_eq!(holes.len(), 1);
    assert!(holes[0].is_sentinel());

    let page = storage
        .get_messages(PageRequest::backward(DID, 200))
        .wait()
        .expect("page");
    assert_eq!(page.messages.len(), 100);
    assert!(page.is_end);

    // =========================================================
    // Step 4: Around an anchor, half below and the rest above
    // =========================================================
    let around = storage
        .get_messages(request(DID, LoadType::Around, 50, 10))
        .wait()
        .expect("around");
    assert_eq!(ids(&around.messages), (46..=55).rev().collect::<Vec<_>>());

    let forward = storage
        .get_messages(request(DID, LoadType::Forward, 95, 10))
        .wait()
        .expect("forward");
    assert_eq!(ids(&forward.messages), vec![96, 97, 98, 99, 100]);
    assert!(!forward.is_end);
}

#[test]
fn pages_never_cross_a_hole() {
    const DID: DialogId = 20;
    const TOP: MessageId = 300;
    let dir = ScratchDir::new("random-pages");
    let storage = open_store(&dir);
    storage
        .put_dialogs(DialogsBatch {
            dialogs: vec![dialog(DID, TOP)],
            messages: vec![message(TOP, DID, 1_000 + TOP * 10)],
            ..DialogsBatch::default()
        })
        .wait()
        .expect("put dialogs");

    // =========================================================
    // Step 1: Fetch windows of history in random order
    // =========================================================
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut stored: BTreeSet<MessageId> = BTreeSet::from([TOP]);
    for _ in 0..25 {
        let center: MessageId = rng.gen_range(2..TOP);
        let width: MessageId = rng.gen_range(1..=15);
        let window: Vec<MessageId> = ((center - width).max(1)..=(center + width).min(TOP - 1)).collect();
        stored.extend(window.iter().copied());
        storage
            .put_fetched_page(
                request(DID, LoadType::Around, center, window.len() + 1),
                messages(DID, window),
                0,
            )
            .wait()
            .expect("put page");
    }

    // =========================================================
    // Step 2: The ledger never overlaps and never hides a gap
    // =========================================================
    let holes = storage.holes(HoleKey::messages(DID)).wait().expect("holes");
    for pair in holes.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlapping holes {pair:?}");
    }
    for id in 1..TOP {
        if !stored.contains(&id) {
            assert!(
                holes.iter().any(|h| h.contains(id)),
                "message {id} was never fetched but no hole covers it"
            );
        }
    }

    // =========================================================
    // Step 3: Every page around a cached message is a contiguous run
    // =========================================================
    for anchor in stored.iter().copied().step_by(7) {
        let page = storage
            .get_messages(request(DID, LoadType::Around, anchor, 12))
            .wait()
            .expect("page");
        let got = ids(&page.messages);
        assert!(got.contains(&anchor), "anchor {anchor} missing from {got:?}");
        for pair in got.windows(2) {
            assert_eq!(pair[0] - pair[1], 1, "page around {anchor} skipped ids: {got:?}");
        }
    }
}

#[test]
fn interval_algebra_on_a_live_store() {
    const DID: DialogId = 31;
    let dir = ScratchDir::new("algebra");
    let storage = open_store(&dir);
    let key = HoleKey::messages(DID);

    // A range starting right above a hole leaves the hole alone.
    storage
        .run("adjacent", move |w| {
            holes::insert(w.conn(), &key, 1, 99)?;
            holes::close_range(w.conn(), &key, 100, 105)
        })
        .wait()
        .expect("close");
    let after = storage.holes(key).wait().expect("holes");
    assert_eq!(after.iter().map(|h| (h.start, h.end)).collect::<Vec<_>>(), vec![(1, 99)]);

    // A range over the sentinel and an inner hole removes both.
    storage
        .run("cover", move |w| {
            holes::delete_all(w.conn(), &key)?;
            holes::insert(w.conn(), &key, holes::SENTINEL, holes::SENTINEL)?;
            holes::insert(w.conn(), &key, 50, 80)?;
            holes::close_range(w.conn(), &key, 1, 200)
        })
        .wait()
        .expect("close");
    assert!(storage.holes(key).wait().expect("holes").is_empty());
}

#[test]
fn last_message_pointer_never_moves_back() {
    const DID: DialogId = 12;
    let dir = ScratchDir::new("pointer");
    let storage = open_store(&dir);

    storage
        .put_messages(vec![message(10, DID, 100)], 0)
        .wait()
        .expect("put");
    storage
        .put_messages(vec![message(5, DID, 50)], 0)
        .wait()
        .expect("put older");
    // A stale dialog list entry must not rewind the pointer either.
    storage
        .put_dialogs(DialogsBatch {
            dialogs: vec![Dialog {
                id: DID,
                date: 40,
                last_message_id: 4,
                ..Dialog::default()
            }],
            ..DialogsBatch::default()
        })
        .wait()
        .expect("put dialogs");

    let page = storage.get_dialogs(0, 10).wait().expect("dialogs");
    let stored = page.dialogs.iter().find(|d| d.id == DID).expect("dialog");
    assert_eq!((stored.last_message_id, stored.date), (10, 100));

    // Deleting the newest message repoints to the next one, keeping the date.
    storage.delete_messages(vec![10], 0).wait().expect("delete");
    let page = storage.get_dialogs(0, 10).wait().expect("dialogs");
    let stored = page.dialogs.iter().find(|d| d.id == DID).expect("dialog");
    assert_eq!((stored.last_message_id, stored.date), (5, 100));
}

#[test]
fn send_acknowledgement_rekeys_once() {
    const DID: DialogId = 14;
    let dir = ScratchDir::new("rekey");
    let storage = open_store(&dir);

    let mut pending = message(-3, DID, 500);
    pending.out = true;
    pending.random_id = Some(4242);
    pending.send_state = SendState::Sending;
    storage.put_messages(vec![pending], 0).wait().expect("put");

    let first = storage.rekey(Some(4242), -3, 77, 0, 510).wait().expect("rekey");
    let second = storage.rekey(Some(4242), -3, 77, 0, 510).wait().expect("again");
    assert_eq!((first, second), (77, 77));
    assert!(storage.message_exists(77).wait().expect("exists"));
    assert!(!storage.message_exists(-3).wait().expect("exists"));

    let page = storage.get_dialogs(0, 10).wait().expect("dialogs");
    let stored = page.dialogs.iter().find(|d| d.id == DID).expect("dialog");
    assert_eq!(stored.last_message_id, 77);

    // An interrupted send found at the next open is marked failed.
    let mut stuck = message(-4, DID, 520);
    stuck.out = true;
    stuck.send_state = SendState::Sending;
    storage.put_messages(vec![stuck], 0).wait().expect("put");
    storage.close();
    drop(storage);

    let reopened = open_store(&dir);
    let page = reopened
        .get_messages(PageRequest::backward(DID, 10))
        .wait()
        .expect("page");
    let failed = page.messages.iter().find(|m| m.id == -4).expect("pending row");
    assert_eq!(failed.send_state, SendState::Failed);
}
