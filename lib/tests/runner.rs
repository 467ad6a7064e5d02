//! End-to-end scenarios exercised against real temp-directory repositories,
//! mirroring the test plan used throughout the commit/merge/sync modules'
//! own unit tests but driven through the public `Repository` surface only.

use assert_matches::assert_matches;
use tensorset_lib::ArraysetName;
use tensorset_lib::DType;
use tensorset_lib::Error;
use tensorset_lib::MergeOutcome;
use tensorset_lib::MetadataKey;
use tensorset_lib::Repository;
use tensorset_lib::SampleKey;
use tensorset_lib::Schema;
use tensorset_lib::Tensor;
use tensorset_lib::sync;
use tensorset_lib::sync::local::LocalTransport;

fn now() -> chrono::DateTime<chrono::Utc> {
    "2024-01-01T00:00:00Z".parse().unwrap()
}

fn full(shape: u64, value: i64) -> Tensor {
    let bytes = (0..shape).flat_map(|_| value.to_le_bytes()).collect();
    Tensor::new(vec![shape], DType::I64, bytes)
}

#[test]
fn init_write_commit_read() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), "u", "u@e", now()).unwrap();

    let mut wc = repo.checkout_write("master", None).unwrap();
    let arrayset = ArraysetName::new("d").unwrap();
    wc.init_arrayset(arrayset.clone(), Schema::new("u".into(), vec![50], DType::I64, false, true)).unwrap();
    for i in 0..10u64 {
        wc.put_sample(&arrayset, SampleKey::named(i.to_string()).unwrap(), full(50, i as i64)).unwrap();
    }
    wc.commit("c1", now()).unwrap();

    let mut rc = repo.checkout_read("master").unwrap();
    let sample = rc.read_sample(&arrayset, &SampleKey::named("7").unwrap()).unwrap();
    assert_eq!(sample, full(50, 7));
}

#[test]
fn branch_and_merge_fast_forward() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), "u", "u@e", now()).unwrap();
    let arrayset = ArraysetName::new("d").unwrap();
    {
        let mut wc = repo.checkout_write("master", None).unwrap();
        wc.init_arrayset(arrayset.clone(), Schema::new("u".into(), vec![50], DType::I64, false, true)).unwrap();
        for i in 0..10u64 {
            wc.put_sample(&arrayset, SampleKey::named(i.to_string()).unwrap(), full(50, i as i64)).unwrap();
        }
        wc.commit("c1", now()).unwrap();
    }

    repo.create_branch("feat", "master").unwrap();
    {
        let mut wc = repo.checkout_write("feat", None).unwrap();
        for i in 10..20u64 {
            wc.put_sample(&arrayset, SampleKey::named(i.to_string()).unwrap(), full(50, i as i64)).unwrap();
        }
        wc.commit("c2", now()).unwrap();
    }
    let c2 = repo.resolve_commit("feat").unwrap();

    let outcome = repo.merge("master", "feat", "m", now(), "merger").unwrap();
    assert_matches!(outcome, MergeOutcome::FastForward { new_head } if new_head == c2);
    assert_eq!(repo.resolve_commit("master").unwrap(), c2);
}

#[test]
fn three_way_merge_non_conflicting() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), "u", "u@e", now()).unwrap();
    let arrayset = ArraysetName::new("d").unwrap();
    {
        let mut wc = repo.checkout_write("master", None).unwrap();
        wc.init_arrayset(arrayset.clone(), Schema::new("u".into(), vec![50], DType::I64, false, true)).unwrap();
        wc.commit("c1", now()).unwrap();
    }
    repo.create_branch("a", "master").unwrap();
    repo.create_branch("b", "master").unwrap();
    {
        let mut wc = repo.checkout_write("a", None).unwrap();
        wc.put_sample(&arrayset, SampleKey::named("100").unwrap(), full(50, 100)).unwrap();
        wc.commit("add sample", now()).unwrap();
    }
    {
        let mut wc = repo.checkout_write("b", None).unwrap();
        wc.set_metadata(MetadataKey::new("k").unwrap(), b"v").unwrap();
        wc.commit("set metadata", now()).unwrap();
    }

    assert!(!tensorset_lib::commit::can_fast_forward(
        &repo.kv().env("ref").unwrap(),
        &repo.resolve_commit("a").unwrap(),
        &repo.resolve_commit("b").unwrap(),
    )
    .unwrap());

    let outcome = repo.merge("a", "b", "merge b into a", now(), "merger").unwrap();
    let new_head = assert_matches!(outcome, MergeOutcome::Merged { new_head } => new_head);
    let record = repo.commit_record(&new_head).unwrap();
    assert_eq!(record.parents.len(), 2);
    assert!(record.refs.arraysets[&arrayset].samples.contains_key(&SampleKey::named("100").unwrap()));
    assert!(record.refs.metadata.contains_key(&MetadataKey::new("k").unwrap()));

    let rc = repo.checkout_read("a").unwrap();
    assert_eq!(rc.read_metadata(&MetadataKey::new("k").unwrap()).unwrap(), b"v");
}

#[test]
fn conflicting_merge_reports_and_does_not_move_master() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), "u", "u@e", now()).unwrap();
    repo.create_branch("a", "master").unwrap();
    repo.create_branch("b", "master").unwrap();
    {
        let mut wc = repo.checkout_write("a", None).unwrap();
        wc.set_metadata(MetadataKey::new("k").unwrap(), b"v1").unwrap();
        wc.commit("a sets k", now()).unwrap();
    }
    {
        let mut wc = repo.checkout_write("b", None).unwrap();
        wc.set_metadata(MetadataKey::new("k").unwrap(), b"v2").unwrap();
        wc.commit("b sets k", now()).unwrap();
    }
    let a_head_before = repo.resolve_commit("a").unwrap();

    let outcome = repo.merge("a", "b", "merge", now(), "merger").unwrap();
    let report = assert_matches!(outcome, MergeOutcome::Conflict(report) => report);
    assert!(report.conflict_found);
    assert_eq!(report.metadata.len(), 1);
    assert_eq!(report.metadata[0].key, "k");
    assert_eq!(repo.resolve_commit("a").unwrap(), a_head_before);
}

#[tokio::test]
async fn push_fetch_round_trip() {
    let client1_dir = tempfile::tempdir().unwrap();
    let client1 = Repository::init(client1_dir.path(), "c1", "c1@e", now()).unwrap();
    let arrayset = ArraysetName::new("d").unwrap();
    {
        let mut wc = client1.checkout_write("master", None).unwrap();
        wc.init_arrayset(arrayset.clone(), Schema::new("u".into(), vec![50], DType::I64, false, true)).unwrap();
        wc.put_sample(&arrayset, SampleKey::named("7").unwrap(), full(50, 7)).unwrap();
        wc.commit("c1", now()).unwrap();
    }

    let server_dir = tempfile::tempdir().unwrap();
    let server = Repository::init(server_dir.path(), "server", "server@e", now()).unwrap();
    {
        let client_t = LocalTransport::new(&client1);
        let server_t = LocalTransport::new(&server);
        sync::push(&client_t, &server_t, "master").await.unwrap();
        server.promote_remote_data().unwrap();
    }

    let client2_dir = tempfile::tempdir().unwrap();
    let client2 = Repository::init(client2_dir.path(), "c2", "c2@e", now()).unwrap();
    {
        let server_t = LocalTransport::new(&server);
        let client_t = LocalTransport::new(&client2);
        let head = sync::fetch_refs(&server_t, &client_t, "master").await.unwrap();
        let record = client2.commit_record(&head).unwrap();
        let digests: Vec<_> = record.refs.arraysets.values().flat_map(|a| a.samples.values()).cloned().collect();
        sync::fetch_data(&server_t, &client_t, &digests).await.unwrap();
        client2.promote_remote_data().unwrap();
    }

    assert_eq!(client1.log("master").unwrap().len(), client2.log("master").unwrap().len());
    let mut rc1 = client1.checkout_read("master").unwrap();
    let mut rc2 = client2.checkout_read("master").unwrap();
    assert_eq!(rc1.read_sample(&arrayset, &SampleKey::named("7").unwrap()).unwrap(), rc2.read_sample(&arrayset, &SampleKey::named("7").unwrap()).unwrap());
}

#[tokio::test]
async fn partial_clone_then_fetch_data() {
    let origin_dir = tempfile::tempdir().unwrap();
    let origin = Repository::init(origin_dir.path(), "origin", "origin@e", now()).unwrap();
    let arrayset = ArraysetName::new("d").unwrap();
    {
        let mut wc = origin.checkout_write("master", None).unwrap();
        wc.init_arrayset(arrayset.clone(), Schema::new("u".into(), vec![50], DType::I64, false, true)).unwrap();
        wc.put_sample(&arrayset, SampleKey::named("7").unwrap(), full(50, 7)).unwrap();
        wc.commit("c1", now()).unwrap();
    }

    let clone_dir = tempfile::tempdir().unwrap();
    let clone = Repository::init(clone_dir.path(), "clone", "clone@e", now()).unwrap();
    let origin_t = LocalTransport::new(&origin);
    let clone_t = LocalTransport::new(&clone);
    let head = sync::fetch_refs(&origin_t, &clone_t, "master").await.unwrap();

    let mut rc = clone.checkout_read("master").unwrap();
    assert_matches!(rc.read_sample(&arrayset, &SampleKey::named("7").unwrap()), Err(Error::NotFound(_)));

    let record = clone.commit_record(&head).unwrap();
    let digests: Vec<_> = record.refs.arraysets.values().flat_map(|a| a.samples.values()).cloned().collect();
    sync::fetch_data(&origin_t, &clone_t, &digests).await.unwrap();
    clone.promote_remote_data().unwrap();

    let mut rc = clone.checkout_read("master").unwrap();
    assert_eq!(rc.read_sample(&arrayset, &SampleKey::named("7").unwrap()).unwrap(), full(50, 7));
}
