use std::sync::Arc;

use gexit_core::registry::JournalRegistry;
use gexit_core::store::ExitStatusStore;
use gexit_core::{
    Backend, ExitError, ExitProcess, ExitStatus, ExitStatusTracker, NodeId, open_exit_status_store,
};
use time::macros::datetime;

fn trackers(registry: &JournalRegistry) -> Vec<(&'static str, ExitStatusTracker)> {
    vec![
        (
            "memory",
            ExitStatusTracker::new(open_exit_status_store(Backend::Memory).unwrap()),
        ),
        (
            "journal",
            ExitStatusTracker::new(open_exit_status_store(Backend::Journal(registry)).unwrap()),
        ),
    ]
}

#[test]
fn state_machine_legality() {
    let dir = tempfile::tempdir().unwrap();
    let registry = JournalRegistry::new(dir.path()).unwrap();
    let sat = NodeId([0xaa; 32]);
    let other = NodeId([0xbb; 32]);

    for (name, t) in trackers(&registry) {
        // nothing to update or complete yet
        assert!(t.update_graceful_exit(&sat, 5).unwrap_err().is_not_found(), "{name}");
        let err = t
            .complete_graceful_exit(&sat, datetime!(2024-07-01 0:00 UTC), ExitStatus::ExitSucceeded, vec![1])
            .unwrap_err();
        assert!(err.is_not_found(), "{name}");

        // completing a Normal satellite is an invalid transition
        t.add_satellite(&other).unwrap();
        let err = t
            .complete_graceful_exit(&other, datetime!(2024-07-01 0:00 UTC), ExitStatus::ExitFailed, vec![])
            .unwrap_err();
        assert!(matches!(err, ExitError::InvalidTransition(_)), "{name}");
        assert!(matches!(
            t.update_graceful_exit(&other, 1),
            Err(ExitError::InvalidTransition(_))
        ));

        t.initiate_graceful_exit(&sat, datetime!(2024-07-01 0:00 UTC), 4096)
            .unwrap();
        let err = t
            .initiate_graceful_exit(&sat, datetime!(2024-07-02 0:00 UTC), 1)
            .unwrap_err();
        assert!(matches!(err, ExitError::InvalidTransition(_)), "{name}");

        t.update_graceful_exit(&sat, 1000).unwrap();
        t.update_graceful_exit(&sat, 24).unwrap();
        assert_eq!(t.status(&sat).unwrap(), ExitStatus::Exiting);

        t.complete_graceful_exit(
            &sat,
            datetime!(2024-07-03 0:00 UTC),
            ExitStatus::ExitSucceeded,
            b"receipt".to_vec(),
        )
        .unwrap();

        let p = t.get(&sat).unwrap();
        assert_eq!(p.status, ExitStatus::ExitSucceeded, "{name}");
        assert_eq!(p.initiated_at, Some(datetime!(2024-07-01 0:00 UTC)));
        assert_eq!(p.finished_at, Some(datetime!(2024-07-03 0:00 UTC)));
        assert_eq!(p.starting_disk_usage, 4096);
        assert_eq!(p.bytes_deleted, 1024);
        assert_eq!(p.completion_receipt.as_deref(), Some(&b"receipt"[..]));
        p.check_invariants().unwrap();

        // terminal states stay terminal
        assert!(t.initiate_graceful_exit(&sat, datetime!(2024-07-04 0:00 UTC), 1).is_err());
        assert!(t.update_graceful_exit(&sat, 1).is_err());
        assert!(
            t.complete_graceful_exit(&sat, datetime!(2024-07-04 0:00 UTC), ExitStatus::ExitFailed, vec![])
                .is_err()
        );

        let listed: Vec<NodeId> = t
            .list_graceful_exits()
            .unwrap()
            .iter()
            .map(|p| p.satellite_id)
            .collect();
        assert_eq!(listed, vec![sat, other], "{name}");
    }
}

#[test]
fn exits_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let registry = JournalRegistry::new(dir.path()).unwrap();
    let done = NodeId([1; 32]);
    let running = NodeId([2; 32]);

    {
        let t = ExitStatusTracker::new(open_exit_status_store(Backend::Journal(&registry)).unwrap());
        t.initiate_graceful_exit(&done, datetime!(2024-08-01 0:00 UTC), 10)
            .unwrap();
        t.complete_graceful_exit(&done, datetime!(2024-08-02 0:00 UTC), ExitStatus::ExitFailed, vec![0xff])
            .unwrap();
        t.initiate_graceful_exit(&running, datetime!(2024-08-01 0:00 UTC), 20)
            .unwrap();
        t.update_graceful_exit(&running, 5).unwrap();
    }

    let store = open_exit_status_store(Backend::Journal(&registry)).unwrap();
    store.compact().unwrap();
    let t = ExitStatusTracker::new(Arc::clone(&store));
    assert_eq!(t.status(&done).unwrap(), ExitStatus::ExitFailed);
    assert_eq!(t.get(&done).unwrap().completion_receipt, Some(vec![0xff]));
    assert_eq!(t.get(&running).unwrap().remaining_bytes(), 15);

    // resumed exit can still complete after restart
    t.complete_graceful_exit(&running, datetime!(2024-08-03 0:00 UTC), ExitStatus::ExitSucceeded, vec![])
        .unwrap();
    assert_eq!(t.list_graceful_exits().unwrap().len(), 2);
}

#[test]
fn corrupt_record_is_rejected_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let registry = JournalRegistry::new(dir.path()).unwrap();
    {
        let store = open_exit_status_store(Backend::Journal(&registry)).unwrap();
        // bypass the tracker: Exiting without initiated_at breaks the invariant
        let mut bad = ExitProcess::new(NodeId([3; 32]));
        bad.status = ExitStatus::Exiting;
        store.put_exit(&bad).unwrap();
    }
    let err = open_exit_status_store(Backend::Journal(&registry)).err().unwrap();
    assert!(matches!(err, ExitError::Format(_)));
}
