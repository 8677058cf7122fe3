//! Races between concurrent publishers over intersecting URL sets.

use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use cstore_config::testing::TestEnvironment;
use cstore_store::{CharmBytes, Store, StoreError};
use cstore_url::CharmUrl;

fn open_store(env: &TestEnvironment) -> Store {
    Store::open_at(&env.blob_root, &env.registry_dir, Duration::from_secs(300)).unwrap()
}

fn urls(names: &[&str]) -> Vec<CharmUrl> {
    names.iter().map(|n| CharmUrl::parse(n).unwrap()).collect()
}

#[test]
fn test_overlapping_publishers_exclude_each_other() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);
    let set = urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]);

    // Hold a lease on the whole set.
    let source = CharmBytes::new(&b"holder"[..]);
    let (mut holder, _) = store.add_charm(&source, &set, "holder-key").unwrap();
    holder.write_all(b"holder").unwrap();

    // Every contender must bounce while the lease is live, including ones
    // that only partially overlap.
    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let mut handles = Vec::new();
    for i in 0..THREADS {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        let contested = if i % 2 == 0 {
            urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"])
        } else {
            urls(&["cs:oneiric/wordpress-c", "cs:oneiric/wordpress-b"])
        };
        handles.push(thread::spawn(move || {
            let source = CharmBytes::new(format!("contender {i}").into_bytes());
            barrier.wait();
            store
                .add_charm(&source, &contested, &format!("key{i}"))
                .err()
        }));
    }
    for handle in handles {
        let err = handle.join().unwrap().expect("contender must be refused");
        assert!(matches!(err, StoreError::UpdateInProgress));
    }

    // The holder was never disturbed.
    holder.close().unwrap();
    let (_, info) = store.open_charm(&set[0]).unwrap();
    assert_eq!(info.revision, 0);
}

#[test]
fn test_racing_publishers_serialize_into_dense_revisions() {
    let env = TestEnvironment::new().unwrap();
    let store = open_store(&env);

    const THREADS: usize = 8;
    let barrier = Arc::new(Barrier::new(THREADS));
    let mut handles = Vec::new();
    for i in 0..THREADS {
        let store = store.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let set = urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]);
            let data = format!("publish {i}");
            let source = CharmBytes::new(data.clone().into_bytes());
            barrier.wait();
            match store.add_charm(&source, &set, &format!("key{i}")) {
                Ok((mut writer, revision)) => {
                    writer.write_all(data.as_bytes()).unwrap();
                    writer.close().unwrap();
                    Ok(revision)
                }
                Err(e) => Err(e),
            }
        }));
    }

    let mut won: Vec<u32> = Vec::new();
    for handle in handles {
        match handle.join().unwrap() {
            Ok(revision) => won.push(revision),
            // No leases expire here, so losers only ever see the live lease.
            Err(e) => assert!(matches!(e, StoreError::UpdateInProgress)),
        }
    }

    // Winners serialized: their revisions are exactly 0..n with no gaps,
    // and both URLs ended on the same latest revision.
    assert!(!won.is_empty());
    won.sort_unstable();
    let expected: Vec<u32> = (0..won.len() as u32).collect();
    assert_eq!(won, expected);

    let set = urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]);
    let (_, info_a) = store.open_charm(&set[0]).unwrap();
    let (_, info_b) = store.open_charm(&set[1]).unwrap();
    assert_eq!(info_a.revision, won.len() as u32 - 1);
    assert_eq!(info_b.revision, info_a.revision);
}
