use std::path::Path;
use std::process::{Command, Output};

const NODE: &str = "1111111111111111111111111111111111111111111111111111111111111111";
const SATELLITE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn gexitdev(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gexitdev"))
        .arg("--db")
        .arg(db)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn satellite_queue_is_seeded_from_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = dir.path().join("inventory.json");
    std::fs::write(
        &inventory,
        format!(
            r#"{{ "{NODE}": [
                {{ "path": "aa01", "piece_num": 1, "size": 100, "durability_ratio": 1.5 }},
                {{ "path": "aa02", "piece_num": 2, "size": 200, "durability_ratio": 0.5 }}
            ] }}"#
        ),
    )
    .unwrap();
    let db = dir.path().join("db");
    let inv = inventory.to_str().unwrap();

    let out = stdout(&gexitdev(
        &db,
        &["satellite", "start", NODE, "--inventory", inv, "--satellite", SATELLITE],
    ));
    assert!(out.contains("queued 2 pieces"));

    // lowest durability first
    let out = stdout(&gexitdev(&db, &["satellite", "queue", NODE]));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("path=aa02"));
    assert!(lines[1].contains("path=aa01"));
    assert!(lines.iter().all(|l| l.starts_with("waiting")));

    let out = stdout(&gexitdev(&db, &["satellite", "progress", NODE]));
    assert!(out.contains("no progress recorded"));

    stdout(&gexitdev(&db, &["satellite", "compact"]));
    let out = stdout(&gexitdev(
        &db,
        &["satellite", "abandon", NODE, "--satellite", SATELLITE],
    ));
    assert!(out.contains("exit-failed"));
    let out = stdout(&gexitdev(&db, &["satellite", "queue", NODE]));
    assert!(out.is_empty());

    // the failure reached the node side with a receipt
    let out = stdout(&gexitdev(&db, &["node", "list"]));
    assert!(out.contains(SATELLITE));
    assert!(out.contains("status=exit-failed"));
    assert!(!out.contains("receipt=-"));
}

#[test]
fn empty_inventory_is_finalized_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = dir.path().join("inventory.json");
    std::fs::write(&inventory, format!(r#"{{ "{NODE}": [] }}"#)).unwrap();
    let db = dir.path().join("db");

    let out = stdout(&gexitdev(
        &db,
        &[
            "satellite",
            "start",
            NODE,
            "--inventory",
            inventory.to_str().unwrap(),
            "--satellite",
            SATELLITE,
            "--receipt-key",
            &"07".repeat(32),
        ],
    ));
    assert!(out.contains("finalized"));

    let out = stdout(&gexitdev(&db, &["node", "list"]));
    assert!(out.contains("status=exit-succeeded"));

    // a short key is rejected before anything is written
    let bad = gexitdev(
        &db,
        &["satellite", "abandon", NODE, "--satellite", SATELLITE, "--receipt-key", "0707"],
    );
    assert!(!bad.status.success());
}

#[test]
fn node_exit_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path();

    stdout(&gexitdev(db, &["node", "add", SATELLITE]));
    stdout(&gexitdev(db, &["node", "initiate", SATELLITE, "--disk-usage", "1000"]));
    stdout(&gexitdev(db, &["node", "update", SATELLITE, "--bytes-deleted", "250"]));

    let out = stdout(&gexitdev(db, &["node", "list"]));
    assert!(out.contains("status=exiting"));
    assert!(out.contains("remaining=750"));

    stdout(&gexitdev(
        db,
        &["node", "complete", SATELLITE, "--status", "succeeded", "--receipt", "beef"],
    ));
    stdout(&gexitdev(db, &["node", "compact"]));
    let out = stdout(&gexitdev(db, &["node", "list"]));
    assert!(out.contains("status=exit-succeeded"));
    assert!(out.contains("receipt=beef"));

    // terminal exits cannot be restarted
    let again = gexitdev(db, &["node", "initiate", SATELLITE, "--disk-usage", "1"]);
    assert!(!again.status.success());
}
