//! End-to-end mutation log scenarios: append/replay round trips, segment
//! rollover, tail-corruption recovery and garbage collection.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver};
use tempfile::TempDir;

use decree::core::{Decree, Gpid, Mutation};
use decree::log::{LogError, MutationLog};
use decree::LogConfig;

const GPID: Gpid = Gpid {
    app_id: 1,
    partition_index: 0,
};

fn mutation(decree: Decree, payload_len: usize) -> Mutation {
    Mutation::new(GPID, 1, decree, Bytes::from(vec![decree as u8; payload_len]))
}

fn append(log: &MutationLog, mu: &mut Mutation) -> Receiver<Result<u32, LogError>> {
    let (tx, rx) = bounded(1);
    log.append(
        mu,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    )
    .unwrap();
    rx
}

fn wait_all(receivers: Vec<Receiver<Result<u32, LogError>>>) {
    for rx in receivers {
        rx.recv_timeout(Duration::from_secs(30))
            .expect("write completion")
            .expect("write ok");
    }
}

fn replay_all(log: &MutationLog) -> (Vec<Mutation>, Result<(), LogError>) {
    let mut mutations = Vec::new();
    let result = log.replay(|mu| mutations.push(mu));
    (mutations, result)
}

#[test]
fn append_replay_round_trip() {
    let temp = TempDir::new().unwrap();
    let end_before;
    {
        let log = MutationLog::new(LogConfig::default());
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut receivers = Vec::new();
        for decree in 1..=1000 {
            let mut mu = mutation(decree, 16);
            receivers.push(append(&log, &mut mu));
        }
        end_before = log.end_offset();
        log.close();
        wait_all(receivers);
    }

    let log = MutationLog::new(LogConfig::default());
    log.initialize(temp.path()).unwrap();
    assert_eq!(log.end_offset(), end_before);

    let (mutations, result) = replay_all(&log);
    result.unwrap();
    assert_eq!(mutations.len(), 1000);
    let mut last_offset = 0;
    for (i, mu) in mutations.iter().enumerate() {
        assert_eq!(mu.header.decree, i as Decree + 1);
        assert_eq!(mu.header.gpid, GPID);
        assert!(mu.header.log_offset > last_offset);
        assert!(mu.is_logged());
        last_offset = mu.header.log_offset;
    }
    assert_eq!(log.end_offset(), end_before);
}

#[test]
fn segment_rollover_keeps_offsets_contiguous() {
    let temp = TempDir::new().unwrap();
    {
        let log = MutationLog::new(LogConfig {
            max_log_file_mb: 1,
            ..LogConfig::default()
        });
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut receivers = Vec::new();
        for decree in 1..=2048 {
            let mut mu = mutation(decree, 1024);
            receivers.push(append(&log, &mut mu));
        }
        log.close();
        wait_all(receivers);

        let segments = log.segments();
        assert!(segments.len() >= 2, "expected rollover, got {segments:?}");
        for pair in segments.windows(2) {
            assert_eq!(pair[0].index + 1, pair[1].index);
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
    }

    let log = MutationLog::new(LogConfig::default());
    log.initialize(temp.path()).unwrap();
    let (mutations, result) = replay_all(&log);
    result.unwrap();
    assert_eq!(mutations.len(), 2048);
    assert_eq!(
        mutations.last().unwrap().header.decree,
        2048,
        "mutations must replay in append order"
    );
}

#[test]
fn tail_corruption_truncates_and_recovers() {
    let temp = TempDir::new().unwrap();
    let end_before;
    {
        // one entry per mutation so the damage stays within the last record
        let log = MutationLog::new(LogConfig {
            batch_write: false,
            ..LogConfig::default()
        });
        log.initialize(temp.path()).unwrap();
        log.start_write_service(BTreeMap::new(), 0).unwrap();

        let mut receivers = Vec::new();
        for decree in 1..=1000 {
            let mut mu = mutation(decree, 16);
            receivers.push(append(&log, &mut mu));
        }
        end_before = log.end_offset();
        log.close();
        wait_all(receivers);
    }

    // clobber the last 64 bytes of the last segment
    let last_segment = {
        let log = MutationLog::new(LogConfig::default());
        log.initialize(temp.path()).unwrap();
        log.segments().last().unwrap().path.clone()
    };
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&last_segment)
            .unwrap();
        file.seek(SeekFrom::End(-64)).unwrap();
        file.write_all(&[0xFF; 64]).unwrap();
        file.sync_all().unwrap();
    }

    let log = MutationLog::new(LogConfig::default());
    log.initialize(temp.path()).unwrap();
    assert_eq!(log.end_offset(), end_before);

    let (mutations, result) = replay_all(&log);
    let err = result.unwrap_err();
    assert!(
        matches!(err, LogError::InvalidData { .. }),
        "tail corruption must surface as invalid data, got {err}"
    );
    assert_eq!(mutations.len(), 999);
    assert!(
        log.end_offset() < end_before,
        "end offset must rewind past the corrupt tail"
    );

    // the file was repaired: a clean pass sees the surviving prefix
    let log = MutationLog::new(LogConfig::default());
    log.initialize(temp.path()).unwrap();
    let (mutations, result) = replay_all(&log);
    result.unwrap();
    assert_eq!(mutations.len(), 999);
    assert_eq!(mutations.last().unwrap().header.decree, 999);
}

#[test]
fn garbage_collection_preserves_undurable_segments() {
    let temp = TempDir::new().unwrap();
    let log = MutationLog::new(LogConfig {
        batch_write: false,
        max_log_file_mb: 1,
        ..LogConfig::default()
    });
    log.initialize(temp.path()).unwrap();

    let mut seed = BTreeMap::new();
    seed.insert(GPID, 1);
    log.start_write_service(seed, 0).unwrap();

    // two ~600 KiB mutations per segment force a rollover after each pair
    let payload = 600 * 1024;
    let mut receivers = Vec::new();
    for decree in [100, 101, 200, 201] {
        let mut mu = mutation(decree, payload);
        receivers.push(append(&log, &mut mu));
    }
    // a small tail write keeps segment 3 current
    let mut tail = mutation(300, 64);
    receivers.push(append(&log, &mut tail));
    wait_all(receivers);

    // segment 1 header carries decree 1, segment 2 carries 101, segment 3
    // carries 201
    assert_eq!(log.segments().len(), 3);

    // durable decree 99 cannot cover segment 2's initial decree 101, so
    // nothing may be dropped
    let mut durable = BTreeMap::new();
    durable.insert(GPID, 99);
    assert_eq!(log.garbage_collection(&durable), 0);
    assert_eq!(log.segments().len(), 3);

    // durable decree 150 covers segment 2; only segment 1 goes
    durable.insert(GPID, 150);
    assert_eq!(log.garbage_collection(&durable), 1);
    let remaining = log.segments();
    assert_eq!(
        remaining.iter().map(|s| s.index).collect::<Vec<_>>(),
        vec![2, 3]
    );
    assert!(!remaining.iter().any(|s| s.index == 1));
    log.close();

    // the trimmed log still initializes and replays cleanly
    let log = MutationLog::new(LogConfig::default());
    log.initialize(temp.path()).unwrap();
    let (mutations, result) = replay_all(&log);
    result.unwrap();
    assert_eq!(
        mutations.iter().map(|m| m.header.decree).collect::<Vec<_>>(),
        vec![200, 201, 300]
    );
}
