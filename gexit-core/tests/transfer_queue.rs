use gexit_core::domain::PieceRef;
use gexit_core::registry::JournalRegistry;
use gexit_core::{
    Backend, ExitError, NodeId, SatelliteStores, TransferQueueItem, open_satellite_stores,
};
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

struct Harness {
    name: &'static str,
    stores: SatelliteStores,
    _dir: Option<TempDir>,
}

fn harnesses() -> Vec<Harness> {
    let dir = tempfile::tempdir().unwrap();
    let registry = JournalRegistry::new(dir.path()).unwrap();
    let journal = open_satellite_stores(Backend::Journal(&registry)).unwrap();
    vec![
        Harness {
            name: "memory",
            stores: open_satellite_stores(Backend::Memory).unwrap(),
            _dir: None,
        },
        Harness {
            name: "journal",
            stores: journal,
            _dir: Some(dir),
        },
    ]
}

fn queued(minute: i64) -> OffsetDateTime {
    datetime!(2024-02-01 8:00 UTC) + time::Duration::minutes(minute)
}

fn item(node: NodeId, path: &[u8], piece_num: i32, ratio: f64, minute: i64) -> TransferQueueItem {
    let piece = PieceRef {
        path: path.to_vec(),
        piece_num,
        size: 256,
        durability_ratio: ratio,
    };
    TransferQueueItem::new(node, &piece, queued(minute))
}

#[test]
fn transfer_queue_crud() {
    let node1 = NodeId([0x11; 32]);
    let node2 = NodeId([0x22; 32]);
    let path1 = [0xa1u8; 32];
    let path2 = [0xa2u8; 32];
    let items = vec![
        item(node1, &path1, 1, 0.9, 0),
        item(node1, &path2, 2, 1.1, 1),
        item(node2, &path1, 2, 0.9, 2),
        item(node2, &path2, 1, 1.1, 3),
    ];

    for h in harnesses() {
        let q = &h.stores.queue;
        q.enqueue(&items).unwrap();

        for tqi in &items {
            let mut it = q.get_transfer_queue_item(&tqi.node_id, &tqi.path).unwrap();
            it.durability_ratio = 1.2;
            it.requested_at = Some(queued(30));
            q.update_transfer_queue_item(&it).unwrap();

            let latest = q.get_transfer_queue_item(&tqi.node_id, &tqi.path).unwrap();
            assert_eq!(latest.durability_ratio, 1.2, "{}", h.name);
            assert_eq!(latest.requested_at, Some(queued(30)), "{}", h.name);
        }
        assert_eq!(q.get_incomplete(&node1, 10, 0).unwrap().len(), 2, "{}", h.name);

        // finishing path1 leaves only path2 incomplete
        let mut first = q.get_transfer_queue_item(&node1, &path1).unwrap();
        first.finished_at = Some(queued(40));
        q.update_transfer_queue_item(&first).unwrap();
        let left = q.get_incomplete(&node1, 10, 0).unwrap();
        assert_eq!(left.len(), 1, "{}", h.name);
        assert_eq!(left[0].node_id, node1);
        assert_eq!(left[0].path, path2.to_vec());

        // only finished rows go
        q.delete_finished_transfer_queue_items(&node1).unwrap();
        let err = q.get_transfer_queue_item(&node1, &path1).unwrap_err();
        assert!(err.is_not_found(), "{}: {err}", h.name);
        q.get_transfer_queue_item(&node1, &path2).unwrap();

        // everything for node2 goes
        assert_eq!(q.get_incomplete(&node2, 10, 0).unwrap().len(), 2);
        q.delete_transfer_queue_items(&node2).unwrap();
        assert!(q.get_incomplete(&node2, 10, 0).unwrap().is_empty(), "{}", h.name);
        assert_eq!(q.exiting_nodes().unwrap(), vec![node1], "{}", h.name);
    }
}

#[test]
fn enqueue_is_idempotent() {
    let node = NodeId([0x33; 32]);
    for h in harnesses() {
        let q = &h.stores.queue;
        q.enqueue(&[item(node, b"p1", 1, 0.5, 0), item(node, b"p2", 2, 0.5, 1)])
            .unwrap();
        // overlapping batch with different values must not overwrite
        q.enqueue(&[item(node, b"p2", 9, 3.0, 9), item(node, b"p3", 3, 0.5, 2)])
            .unwrap();

        let all = q.get_incomplete(&node, 100, 0).unwrap();
        assert_eq!(all.len(), 3, "{}", h.name);
        let p2 = q.get_transfer_queue_item(&node, b"p2").unwrap();
        assert_eq!(p2.piece_num, 2, "{}", h.name);
        assert_eq!(p2.durability_ratio, 0.5, "{}", h.name);
    }
}

#[test]
fn incomplete_returns_everything_enqueued_oldest_first() {
    let node = NodeId([0x44; 32]);
    let items: Vec<TransferQueueItem> = (0..7)
        .rev()
        .map(|i| item(node, format!("piece-{i}").as_bytes(), i, 1.0, i as i64))
        .collect();

    for h in harnesses() {
        let q = &h.stores.queue;
        q.enqueue(&items).unwrap();

        let got = q.get_incomplete(&node, items.len(), 0).unwrap();
        let mut want = items.clone();
        want.sort_by_key(|i| i.queued_at);
        assert_eq!(got, want, "{}", h.name);

        let page: Vec<i32> = q
            .get_incomplete(&node, 3, 3)
            .unwrap()
            .iter()
            .map(|i| i.piece_num)
            .collect();
        assert_eq!(page, vec![3, 4, 5], "{}", h.name);
    }
}

#[test]
fn update_of_missing_row_is_not_found() {
    let node = NodeId([0x55; 32]);
    for h in harnesses() {
        let q = &h.stores.queue;
        let ghost = item(node, b"ghost", 1, 1.0, 0);
        let err = q.update_transfer_queue_item(&ghost).unwrap_err();
        assert!(matches!(err, ExitError::NotFound(_)), "{}", h.name);

        q.enqueue(std::slice::from_ref(&ghost)).unwrap();
        q.delete_transfer_queue_item(&node, b"ghost").unwrap();
        assert!(q.update_transfer_queue_item(&ghost).unwrap_err().is_not_found());
    }
}

#[test]
fn journal_queue_survives_reopen_and_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let registry = JournalRegistry::new(dir.path()).unwrap();
    let node = NodeId([0x66; 32]);

    {
        let stores = open_satellite_stores(Backend::Journal(&registry)).unwrap();
        let q = &stores.queue;
        q.enqueue(&[
            item(node, b"a", 1, 1.0, 0),
            item(node, b"b", 2, 1.0, 1),
            item(node, b"c", 3, 1.0, 2),
        ])
        .unwrap();
        let mut b = q.get_transfer_queue_item(&node, b"b").unwrap();
        b.failed_count = 2;
        b.last_failed_code = Some(4);
        q.update_transfer_queue_item(&b).unwrap();
        q.delete_transfer_queue_item(&node, b"c").unwrap();

        // a second open while the first is alive is refused
        assert!(matches!(
            open_satellite_stores(Backend::Journal(&registry)),
            Err(ExitError::StoreUnavailable(_))
        ));
    }

    let before = {
        let stores = open_satellite_stores(Backend::Journal(&registry)).unwrap();
        let rows = stores.queue.get_incomplete(&node, 10, 0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].failed_count, 2);
        assert_eq!(rows[1].last_failed_code, Some(4));
        stores.queue.compact().unwrap();
        rows
    };

    let stores = open_satellite_stores(Backend::Journal(&registry)).unwrap();
    assert_eq!(stores.queue.get_incomplete(&node, 10, 0).unwrap(), before);
    assert!(stores.queue.get_transfer_queue_item(&node, b"c").is_err());
}
