//! Recovery paths: disable/enable with resync, relocation and save/load

use crate::test_utils::{count_block_files, MeshFixture};
use blockmesh_core::{block_path, LogicalClock, Mode};
use blockmesh_mesh::{build_index, MeshError, ParticipantHandle, ReplicaHandle};

#[test]
fn test_resync_after_missed_rounds() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 2);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);
    fx.add_participant("user2", 1);

    fx.replica(1).disable();
    for _ in 0..3 {
        fx.perform("user0", &["user1"]).unwrap();
        fx.run_round();
    }
    assert_eq!(fx.replica(0).block_count(), 4);
    assert_eq!(fx.replica(1).block_count(), 1);

    fx.replica(1).enable().unwrap();
    assert!(fx.replica(1).is_available());

    let (a, b) = (fx.replica(0), fx.replica(1));
    assert_eq!(b.heads(), a.heads());
    assert_eq!(b.block_count(), a.block_count());
    assert_eq!(
        build_index(&b.dir(), b.heads().values()),
        build_index(&a.dir(), a.heads().values())
    );
    assert_eq!(count_block_files(&b.dir()), 3);

    // The recovered replica takes part in the next commit
    fx.perform("user1", &["user2"]).unwrap();
    fx.run_round();
    assert_eq!(a.block_count(), 5);
    assert_eq!(b.block_count(), 5);
    assert_eq!(
        fx.participant("user2").head(),
        fx.participant("user1").head()
    );
    assert_eq!(fx.participant("user1").chain_length().unwrap(), 4);
}

#[test]
fn test_disable_between_broadcast_and_commit() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 2);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);
    fx.add_participant("user2", 1);

    fx.perform("user0", &["user1"]).unwrap();
    assert!(fx.broadcast_all());
    assert_eq!(fx.replica(1).shared_len(), 1);

    // stg_1 misses the commit of a candidate it already received
    fx.replica(1).disable();
    assert_eq!(fx.commit_all(), 1);
    fx.clock.tick();

    fx.replica(1).enable().unwrap();
    assert_eq!(fx.replica(1).shared_len(), 0);
    fx.run_round();

    for replica in &fx.replicas {
        assert_eq!(replica.block_count(), 2);
        assert_eq!(replica.queue_len(), 0);
    }
    assert_eq!(fx.replica(0).heads(), fx.replica(1).heads());
    assert_eq!(count_block_files(&fx.replica(1).dir()), 1);
    assert_eq!(fx.participant("user1").chain_length().unwrap(), 1);
}

#[test]
fn test_resync_mismatch_disables_replica() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 2);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);

    fx.replica(1).disable();
    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();

    // A corrupt file under the missing block's name survives the fetch
    let head = fx.participant("user0").head().unwrap();
    std::fs::write(block_path(fx.replica(1).dir(), &head), b"corrupt").unwrap();

    let err = fx.replica(1).enable().unwrap_err();
    assert!(matches!(err, MeshError::Inconsistent { .. }));
    assert!(!fx.replica(1).is_available());
}

#[test]
fn test_switch_away_from_disabled_replica() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 2);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);
    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();

    fx.replica(0).disable();
    let user1 = fx.participant("user1");
    let head = user1.switch_replica(fx.replica(1)).unwrap();
    assert_eq!(Some(head), user1.head());
    assert_eq!(user1.replica().unwrap().name(), "stg_1");

    fx.replica(0).enable().unwrap();

    // The stale registration on stg_0 no longer answers for user1
    let found = fx.replica(0).request_participant("user1").unwrap();
    assert_eq!(found.replica().unwrap().name(), "stg_1");

    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();
    assert_eq!(fx.participant("user0").head(), user1.head());
    assert_eq!(user1.chain_length().unwrap(), 2);
    assert_eq!(fx.replica(0).heads(), fx.replica(1).heads());
}

#[test]
fn test_save_and_load_mesh() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 2);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 1);

    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();
    fx.perform("user1", &["user0"]).unwrap();

    for replica in &fx.replicas {
        replica.save().unwrap();
    }
    for participant in fx.participants.values() {
        participant.save().unwrap();
    }

    let clock = LogicalClock::new(100, 1).unwrap();
    let loaded: Vec<ReplicaHandle> = fx
        .replicas
        .iter()
        .map(|r| ReplicaHandle::load(r.dir(), clock.clone()).unwrap())
        .collect();

    for (original, restored) in fx.replicas.iter().zip(&loaded) {
        assert_eq!(restored.name(), original.name());
        assert_eq!(restored.heads(), original.heads());
        assert_eq!(restored.queue_len(), original.queue_len());
        assert_eq!(restored.block_count(), original.block_count());
    }
    assert_eq!(loaded[1].queue_len(), 1);

    loaded[1].join(&loaded[0]).unwrap();
    let user0 = ParticipantHandle::load(fx.participant("user0").dir(), &loaded[0]).unwrap();
    let user1 = ParticipantHandle::load(fx.participant("user1").dir(), &loaded[1]).unwrap();
    assert_eq!(user0.head(), fx.participant("user0").head());

    // The restored queue drains on the restored group
    for replica in &loaded {
        replica.step_broadcast().unwrap();
    }
    for replica in &loaded {
        replica.step_commit().unwrap();
    }
    assert_eq!(loaded[0].block_count(), 3);
    assert_eq!(loaded[1].queue_len(), 0);
    assert_eq!(user0.head(), user1.head());
    assert_eq!(user0.chain_length().unwrap(), 2);
}

#[test]
fn test_load_with_mismatched_head_conflicts() {
    let mut fx = MeshFixture::with_group(Mode::Classic, 1);
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);
    fx.participant("user0").save().unwrap();

    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();
    fx.replica(0).disconnect_participant("user0").unwrap();

    // The saved head predates the committed block
    let err = ParticipantHandle::load(fx.participant("user0").dir(), fx.replica(0)).unwrap_err();
    assert!(matches!(err, MeshError::StateConflict { .. }));
}
