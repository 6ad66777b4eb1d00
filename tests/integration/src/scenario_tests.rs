//! Reference scenarios over a two-replica group
//!
//! stg_0 hosts user0 and user1, stg_1 hosts user2 and joins stg_0.

use crate::test_utils::{addresses, MeshFixture};
use blockmesh_core::{genesis, Mode};
use blockmesh_mesh::{MeshError, PerformOutcome};

fn two_replica_mesh(mode: Mode) -> MeshFixture {
    let mut fx = MeshFixture::new(mode);
    fx.add_replica("stg_0");
    fx.add_replica("stg_1");
    fx.join_all();
    fx.add_participant("user0", 0);
    fx.add_participant("user1", 0);
    fx.add_participant("user2", 1);
    fx
}

/// user0 -> user1, then user1 -> user2, one block per round.
///
/// The reference walkthrough of this scenario lists three distinct heads,
/// but the second block is shared by user1 and user2, so both point at it.
/// Only user0's head differs.
#[test]
fn test_two_transactions_two_rounds() {
    let fx = two_replica_mesh(Mode::Classic);

    assert!(matches!(
        fx.perform("user0", &["user1"]).unwrap(),
        PerformOutcome::Submitted(_)
    ));
    assert!(matches!(
        fx.perform("user1", &["user2"]).unwrap(),
        PerformOutcome::Submitted(_)
    ));
    assert_eq!(fx.replica(0).queue_len(), 2);

    fx.run_round();
    fx.run_round();

    for replica in &fx.replicas {
        assert_eq!(replica.block_count(), 3);
        assert_eq!(replica.queue_len(), 0);
    }
    assert_eq!(fx.replica(0).heads(), fx.replica(1).heads());

    let h0 = fx.participant("user0").head().unwrap();
    let h1 = fx.participant("user1").head().unwrap();
    let h2 = fx.participant("user2").head().unwrap();
    for head in [&h0, &h1, &h2] {
        assert_ne!(head.as_str(), genesis());
    }
    assert_ne!(h0, h1);
    assert_ne!(h0, h2);
    assert_eq!(h1, h2);

    assert_eq!(fx.replica(1).head_of("user0"), Some(h0));
    assert_eq!(fx.participant("user1").chain_length().unwrap(), 2);
    assert_eq!(fx.participant("user2").chain_length().unwrap(), 1);
}

#[test]
fn test_lookup_through_disabled_replica() {
    let fx = two_replica_mesh(Mode::Classic);

    fx.replica(1).disable();

    let err = fx.perform("user0", &["user2"]).unwrap_err();
    assert!(
        matches!(err, MeshError::Inconclusive { ref address, ref peer } if address == "user2" && peer == "stg_1"),
        "unexpected error: {}",
        err
    );
    // Nothing was submitted
    assert_eq!(fx.replica(0).queue_len(), 0);

    // A participant attached to the disabled replica cannot originate
    assert!(matches!(
        fx.perform("user2", &["user0"]),
        Err(MeshError::Unavailable { .. })
    ));

    // Local traffic keeps flowing
    fx.perform("user0", &["user1"]).unwrap();
    fx.run_round();
    assert_eq!(fx.replica(0).block_count(), 2);
    assert_eq!(fx.replica(1).block_count(), 1);
}

#[test]
fn test_gated_sender_is_busy() {
    let fx = two_replica_mesh(Mode::Modified);

    fx.perform("user0", &["user2"]).unwrap();
    assert!(!fx.participant("user0").generation_allowed());

    let queued: Vec<usize> = fx.replicas.iter().map(|r| r.queue_len()).collect();
    assert_eq!(queued, vec![1, 1]);

    assert_eq!(
        fx.perform("user0", &["user1"]).unwrap(),
        PerformOutcome::Busy
    );
    let after: Vec<usize> = fx.replicas.iter().map(|r| r.queue_len()).collect();
    assert_eq!(after, queued);

    // Both replicas broadcast their acknowledgement; the block commits
    fx.run_round();
    for replica in &fx.replicas {
        assert_eq!(replica.block_count(), 2);
        assert_eq!(replica.queue_len(), 0);
    }
    assert!(fx.participant("user0").generation_allowed());
    assert_eq!(
        fx.participant("user0").head(),
        fx.participant("user2").head()
    );

    // The gate is open again
    assert!(matches!(
        fx.participant("user0").perform(&addresses(&["user1"]), None).unwrap(),
        PerformOutcome::Submitted(_)
    ));
}

#[test]
fn test_mesh_from_config_file() -> anyhow::Result<()> {
    let root = std::env::temp_dir().join(format!("blockmesh_cfg_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&root)?;
    let path = root.join("mesh.toml");
    std::fs::write(
        &path,
        format!(
            "mode = \"Modified\"\n\n[storage]\ndata_dir = {:?}\n\n[clock]\nstart_time = 10\nstep = 5\n",
            root.join("data")
        ),
    )?;

    let config = blockmesh_core::MeshConfig::from_file(&path)?;
    let clock = config.build_clock()?;
    let replica = blockmesh_mesh::ReplicaHandle::create("stg_0", &config, clock.clone())?;
    let user0 = blockmesh_mesh::ParticipantHandle::create(&config, "user0", "sign0")?;
    let user1 = blockmesh_mesh::ParticipantHandle::create(&config, "user1", "sign1")?;
    user0.attach(&replica)?;
    user1.attach(&replica)?;

    assert_eq!(replica.mode(), Mode::Modified);
    assert_eq!(replica.dir(), root.join("data").join("Storages").join("stg_0"));
    assert_eq!(user0.dir(), root.join("data").join("Users").join("user0"));

    let PerformOutcome::Submitted(block) = user0.perform(&addresses(&["user1"]), None)? else {
        panic!("fresh participant must be allowed to originate");
    };
    assert_eq!(block.timestamp(), 10);
    assert_eq!(clock.tick(), 15);

    std::fs::remove_dir_all(&root).ok();
    Ok(())
}
