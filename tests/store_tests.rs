//! End-to-end coverage of the store coordinator: the seed scenarios,
//! round-trip identity, sequence monotonicity, header generations,
//! snapshot stability, and the writer-lease policies.

use std::time::Duration;

use tempfile::TempDir;
use wax_core::{
    CanonicalEncoding, FrameDraft, FrameStatus, IndexKind, Store, StoreOptions, WaxError,
    WriterAcquirePolicy,
};

const SMALL_WAL: u64 = 64 * 1024;
const MIB: u64 = 1024 * 1024;

fn scratch() -> TempDir {
    TempDir::new().expect("tempdir")
}

fn draft() -> FrameDraft {
    FrameDraft::builder().build()
}

#[tokio::test]
async fn empty_store_opens_at_generation_one() {
    let dir = scratch();
    let path = dir.path().join("empty.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path, StoreOptions::default()).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.frame_count, 0);
    assert_eq!(stats.generation, 1);
    assert_eq!(stats.pending_ops, 0);
    store.close().await.unwrap();
}

#[tokio::test]
async fn single_frame_survives_reopen() {
    let dir = scratch();
    let path = dir.path().join("single.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let id = writer.put(b"seed".to_vec(), draft()).await.unwrap();
    assert_eq!(id, 0);
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path, StoreOptions::default()).await.unwrap();
    assert_eq!(store.read_payload(0).await.unwrap(), b"seed");
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.frame_count, 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn payload_roundtrip_across_encodings() {
    let dir = scratch();
    let path = dir.path().join("encodings.wax");
    let store = Store::create_with_wal_size(&path, MIB, StoreOptions::default())
        .await
        .unwrap();

    fastrand::seed(7);
    let compressible = b"wax wax wax wax wax wax wax wax wax wax".repeat(64);
    let random: Vec<u8> = (0..4096).map(|_| fastrand::u8(..)).collect();

    let mut writer = store.acquire_writer().await.unwrap();
    let plain = writer.put(random.clone(), draft()).await.unwrap();
    let lz4 = writer
        .put(
            compressible.clone(),
            FrameDraft::builder().encoding(CanonicalEncoding::Lz4).build(),
        )
        .await
        .unwrap();
    let deflate = writer
        .put(
            compressible.clone(),
            FrameDraft::builder()
                .encoding(CanonicalEncoding::Deflate)
                .build(),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    assert_eq!(store.read_payload(plain).await.unwrap(), random);
    assert_eq!(store.read_payload(lz4).await.unwrap(), compressible);
    assert_eq!(store.read_payload(deflate).await.unwrap(), compressible);

    // Compressed stored form is actually smaller than the canonical.
    let meta = store.frame_meta(lz4).unwrap();
    assert!(meta.stored_length < meta.canonical_length);
    store.close().await.unwrap();
}

#[tokio::test]
async fn wal_wrap_preserves_all_frames() {
    let dir = scratch();
    let path = dir.path().join("wrap.wax");
    let store = Store::create_with_wal_size(&path, MIB, StoreOptions::default())
        .await
        .unwrap();

    fastrand::seed(42);
    let payloads: Vec<Vec<u8>> = (0..8)
        .map(|_| (0..200 * 1024).map(|_| fastrand::u8(..)).collect())
        .collect();

    let mut writer = store.acquire_writer().await.unwrap();
    for (index, payload) in payloads.iter().enumerate() {
        let id = writer.put(payload.clone(), draft()).await.unwrap();
        assert_eq!(id, index as u64);
        if index % 2 == 1 {
            writer.commit().await.unwrap();
        }
    }
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path, StoreOptions::default()).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.frame_count, 8);
    for (index, payload) in payloads.iter().enumerate() {
        assert_eq!(&store.read_payload(index as u64).await.unwrap(), payload);
    }
    store.close().await.unwrap();
}

#[tokio::test]
async fn sequences_are_strictly_monotonic() {
    let dir = scratch();
    let path = dir.path().join("seq.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let mut last = 0;
    for round in 0..3 {
        writer
            .put(format!("frame-{round}").into_bytes(), draft())
            .await
            .unwrap();
        writer.commit().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert!(stats.wal.committed_sequence > last);
        last = stats.wal.committed_sequence;
        assert_eq!(stats.wal.next_sequence, stats.wal.committed_sequence + 1);
    }
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn header_generation_increases_per_commit() {
    let dir = scratch();
    let path = dir.path().join("gen.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let before = store.stats().await.unwrap();
    writer.put(b"bump".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    let after = store.stats().await.unwrap();
    assert!(after.header_generation > before.header_generation);
    assert_eq!(after.generation, before.generation + 1);

    // An empty commit changes nothing.
    writer.commit().await.unwrap();
    let idle = store.stats().await.unwrap();
    assert_eq!(idle.generation, after.generation);
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn reopening_twice_yields_identical_catalogs() {
    let dir = scratch();
    let path = dir.path().join("idempotent.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    for index in 0..4 {
        writer
            .put(
                format!("frame-{index}").into_bytes(),
                FrameDraft::builder()
                    .timestamp(1_700_000_000_000 + index)
                    .uri(format!("wax://doc/{index}"))
                    .tag("note")
                    .build(),
            )
            .await
            .unwrap();
    }
    writer.delete(2).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let mut catalogs = Vec::new();
    for _ in 0..2 {
        let store = Store::open(&path, StoreOptions::default()).await.unwrap();
        let stats = store.stats().await.unwrap();
        let metas: Vec<_> = (0..stats.frame_count)
            .map(|id| store.frame_meta(id).unwrap())
            .collect();
        catalogs.push((stats.frame_count, stats.generation, metas));
        store.close().await.unwrap();
    }
    assert_eq!(catalogs[0], catalogs[1]);
}

#[tokio::test]
async fn supersede_links_are_mutual() {
    let dir = scratch();
    let path = dir.path().join("supersede.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let a = writer.put(b"version-a".to_vec(), draft()).await.unwrap();
    let b = writer.put(b"version-b".to_vec(), draft()).await.unwrap();
    writer.supersede(a, b).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path, StoreOptions::default()).await.unwrap();
    let meta_a = store.frame_meta(a).unwrap();
    let meta_b = store.frame_meta(b).unwrap();
    assert_eq!(meta_a.status, FrameStatus::Active);
    assert_eq!(meta_a.superseded_by, Some(b));
    assert_eq!(meta_b.supersedes, Some(a));
    // A superseded frame leaves the live set but keeps its payload.
    assert!(!meta_a.is_live());
    assert_eq!(store.read_payload(a).await.unwrap(), b"version-a");
    store.close().await.unwrap();
}

#[tokio::test]
async fn delete_then_rewrite_drops_dead_payloads() {
    let dir = scratch();
    let path = dir.path().join("rewrite-src.wax");
    let dest = dir.path().join("rewrite-dst.wax");
    let store = Store::create_with_wal_size(&path, MIB, StoreOptions::default())
        .await
        .unwrap();

    fastrand::seed(3);
    let large: Vec<u8> = (0..128 * 1024).map(|_| fastrand::u8(..)).collect();
    let mut writer = store.acquire_writer().await.unwrap();
    let x = writer.put(large, draft()).await.unwrap();
    writer.delete(x).await.unwrap();
    let y = writer.put(b"survivor".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    let report = store.rewrite_live_set(&dest).await.unwrap();
    assert_eq!(report.frame_count, 2);
    assert_eq!(report.retained_payloads, 1);
    assert!(report.dest_payload_bytes < report.source_payload_bytes);
    store.close().await.unwrap();

    let compacted = Store::open(&dest, StoreOptions::default()).await.unwrap();
    let meta_x = compacted.frame_meta(x).unwrap();
    assert_eq!(meta_x.status, FrameStatus::Deleted);
    assert_eq!(meta_x.stored_length, 0);
    assert!(compacted.read_payload(x).await.is_err());
    assert_eq!(compacted.read_payload(y).await.unwrap(), b"survivor");
    compacted.close().await.unwrap();
}

#[tokio::test]
async fn rewrite_without_dead_bytes_rolls_back() {
    let dir = scratch();
    let path = dir.path().join("nocompact.wax");
    let dest = dir.path().join("nocompact-dst.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(b"only-live-data".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    let err = store.rewrite_live_set(&dest).await.unwrap_err();
    assert!(matches!(err, WaxError::RewriteFailed { .. }));
    assert!(!dest.exists(), "rejected destination must be removed");
    store.close().await.unwrap();
}

#[tokio::test]
async fn snapshot_is_stable_across_commits() {
    let dir = scratch();
    let path = dir.path().join("snapshot.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(b"first".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();

    let pinned = store.snapshot();
    assert_eq!(pinned.frame_count(), 1);

    writer.put(b"second".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    // The pinned snapshot still serves the pre-commit view.
    assert_eq!(pinned.frame_count(), 1);
    assert!(pinned.frame_meta(1).is_err());
    assert_eq!(pinned.read_payload(0).await.unwrap(), b"first");

    // Re-resolving observes the new view.
    let fresh = store.snapshot();
    assert_eq!(fresh.frame_count(), 2);
    assert!(fresh.generation() > pinned.generation());
    store.close().await.unwrap();
}

#[tokio::test]
async fn writer_policies_fail_and_time_out() {
    let dir = scratch();
    let path = dir.path().join("policies.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let held = store.acquire_writer().await.unwrap();

    let err = store
        .acquire_writer_with(WriterAcquirePolicy::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, WaxError::WriterBusy));

    let err = store
        .acquire_writer_with(WriterAcquirePolicy::Timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, WaxError::WriterTimeout));

    // Wait policy succeeds once the holder releases.
    let waiter = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .acquire_writer_with(WriterAcquirePolicy::Wait)
                .await
                .map(|lease| drop(lease))
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.release_writer(held).await.unwrap();
    waiter.await.unwrap().unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn released_lease_discards_uncommitted_work() {
    let dir = scratch();
    let path = dir.path().join("abort.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let id = writer.put(b"doomed".to_vec(), draft()).await.unwrap();
    assert_eq!(id, 0);
    store.release_writer(writer).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.frame_count, 0);
    assert_eq!(stats.pending_ops, 0);

    // Frame ids restart from the committed count.
    let mut writer = store.acquire_writer().await.unwrap();
    let id = writer.put(b"kept".to_vec(), draft()).await.unwrap();
    assert_eq!(id, 0);
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    assert_eq!(store.read_payload(0).await.unwrap(), b"kept");
    store.close().await.unwrap();
}

#[tokio::test]
async fn wal_full_resolves_after_commit() {
    let dir = scratch();
    let path = dir.path().join("walfull.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    fastrand::seed(11);
    let chunk: Vec<u8> = (0..24 * 1024).map(|_| fastrand::u8(..)).collect();

    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(chunk.clone(), draft()).await.unwrap();
    writer.put(chunk.clone(), draft()).await.unwrap();
    let err = writer.put(chunk.clone(), draft()).await.unwrap_err();
    assert!(matches!(err, WaxError::WalFull { .. }));

    writer.commit().await.unwrap();
    writer.put(chunk.clone(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    assert_eq!(store.stats().await.unwrap().frame_count, 3);
    store.close().await.unwrap();
}

#[tokio::test]
async fn oversized_record_fails_at_put_time() {
    let dir = scratch();
    let path = dir.path().join("oversized.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let huge = vec![0u8; SMALL_WAL as usize];
    let err = writer.put(huge, draft()).await.unwrap_err();
    assert!(matches!(err, WaxError::RecordTooLarge { .. }));
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn proactive_commit_fires_on_threshold() {
    let dir = scratch();
    let path = dir.path().join("proactive.wax");
    let options = StoreOptions::builder()
        .proactive_commit_threshold_percent(50)
        .proactive_commit_min_pending_bytes(1024)
        .build();
    let store = Store::create_with_wal_size(&path, SMALL_WAL, options)
        .await
        .unwrap();
    fastrand::seed(13);
    let chunk: Vec<u8> = (0..20 * 1024).map(|_| fastrand::u8(..)).collect();

    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(chunk.clone(), draft()).await.unwrap();
    writer.put(chunk.clone(), draft()).await.unwrap();
    store.release_writer(writer).await.unwrap();

    // The second put crossed 50% of the ring and committed on its own.
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.frame_count, 2);
    assert_eq!(stats.pending_ops, 0);
    assert!(stats.generation >= 2);
    store.close().await.unwrap();
}

#[tokio::test]
async fn delete_validation_rejects_double_and_missing() {
    let dir = scratch();
    let path = dir.path().join("deletes.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let id = writer.put(b"victim".to_vec(), draft()).await.unwrap();
    writer.delete(id).await.unwrap();
    let err = writer.delete(id).await.unwrap_err();
    assert!(matches!(err, WaxError::InvalidFrame { .. }));
    let err = writer.delete(99).await.unwrap_err();
    assert!(matches!(err, WaxError::FrameNotFound { frame_id: 99 }));
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    // Deleted frames retain their metadata but serve no payload.
    let meta = store.frame_meta(id).unwrap();
    assert_eq!(meta.status, FrameStatus::Deleted);
    assert!(store.read_payload(id).await.is_err());
    store.close().await.unwrap();
}

#[tokio::test]
async fn embeddings_and_index_blobs_survive_reopen() {
    let dir = scratch();
    let path = dir.path().join("tracks.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    let id = writer
        .put(
            b"embedded".to_vec(),
            FrameDraft::builder().timestamp(1_700_000_000_000).build(),
        )
        .await
        .unwrap();
    writer
        .put_embedding(id, vec![0.5, -0.25, 1.0])
        .await
        .unwrap();
    writer
        .stage_lex_index(b"lex-index-bytes".to_vec(), 1)
        .await
        .unwrap();
    writer
        .stage_vector_index(vec![0u8; 3 * 2 * 4], 3, 2)
        .await
        .unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let store = Store::open(&path, StoreOptions::default()).await.unwrap();
    assert_eq!(
        store.embedding(id).await.unwrap(),
        Some(vec![0.5, -0.25, 1.0])
    );
    assert_eq!(
        store.index_blob(IndexKind::Lex).await.unwrap(),
        b"lex-index-bytes"
    );
    assert_eq!(
        store.index_blob(IndexKind::Vector).await.unwrap(),
        vec![0u8; 24]
    );
    let timeline = store.timeline().await.unwrap();
    assert_eq!(timeline, vec![(1_700_000_000_000, id)]);
    store.close().await.unwrap();
}

#[tokio::test]
async fn uri_lookup_prefers_newest_active() {
    let dir = scratch();
    let path = dir.path().join("uri.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    writer
        .put(
            b"old".to_vec(),
            FrameDraft::builder().uri("wax://doc/a").build(),
        )
        .await
        .unwrap();
    let newer = writer
        .put(
            b"new".to_vec(),
            FrameDraft::builder().uri("wax://doc/a").build(),
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    assert_eq!(store.frame_by_uri("wax://doc/a").unwrap().id, newer);
    assert!(store.frame_by_uri("wax://doc/missing").is_err());

    let digest = wax_core::checksum::sha256(b"new");
    assert_eq!(
        store.find_frame_by_canonical_hash(&digest).unwrap().id,
        newer
    );
    store.close().await.unwrap();
}

#[tokio::test]
async fn read_only_open_coexists_with_writer() {
    let dir = scratch();
    let path = dir.path().join("shared.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(b"shared-read".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();

    // A second read-write open conflicts with the first.
    let err = Store::open(&path, StoreOptions::default()).await.unwrap_err();
    assert!(matches!(err, WaxError::WriterBusy));

    // A read-only open coexists with the read-write open.
    let reader = Store::open(&path, StoreOptions::builder().read_only(true).build())
        .await
        .unwrap();
    assert_eq!(reader.read_payload(0).await.unwrap(), b"shared-read");
    let err = reader.acquire_writer().await.unwrap_err();
    assert!(matches!(err, WaxError::ReadOnly));
    reader.close().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn verify_reports_healthy_store() {
    let dir = scratch();
    let path = dir.path().join("verify.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let mut writer = store.acquire_writer().await.unwrap();
    writer.put(b"checked".to_vec(), draft()).await.unwrap();
    writer.commit().await.unwrap();
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();

    let report = Store::verify(&path, true).await.unwrap();
    assert_eq!(
        report.overall_status,
        wax_core::VerificationStatus::Passed,
        "report: {report:?}"
    );
    assert!(report
        .checks
        .iter()
        .any(|check| check.name == "PayloadDigests"));
}

#[tokio::test]
async fn close_refuses_while_lease_is_active() {
    let dir = scratch();
    let path = dir.path().join("close.wax");
    let store = Store::create_with_wal_size(&path, SMALL_WAL, StoreOptions::default())
        .await
        .unwrap();
    let writer = store.acquire_writer().await.unwrap();
    let err = store.clone().close().await.unwrap_err();
    assert!(matches!(err, WaxError::Lock(_)));
    store.release_writer(writer).await.unwrap();
    store.close().await.unwrap();
}
