//! Property tests for the coordinator's quantified invariants: progress
//! monotonicity under arbitrary update sequences and canonical
//! persistence round-trips.

use proptest::prelude::*;
use std::sync::Arc;
use swarmd_coordination::{Coordinator, WorkRequest};
use swarmd_core::types::{Priority, WorkItem};
use swarmd_core::CoordConfig;
use swarmd_store::Collection;
use swarmd_telemetry::TelemetryPipeline;

fn harness() -> (Arc<Coordinator>, Arc<TelemetryPipeline>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = CoordConfig {
        coord_dir: dir.path().to_path_buf(),
        ..CoordConfig::default()
    };
    let pipeline = TelemetryPipeline::start(&config).unwrap();
    let store = Arc::new(swarmd_store::ClaimStore::open(&config.coord_dir).unwrap());
    let coordinator = Arc::new(Coordinator::new(store, pipeline.clone(), &config));
    (coordinator, pipeline, dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// P2: across any update sequence, accepted progress readings are
    /// non-decreasing and a rejected update leaves state untouched.
    #[test]
    fn prop_progress_is_monotone(updates in prop::collection::vec(0u8..=110, 1..12)) {
        let (coordinator, pipeline, _dir) = harness();
        let agent = coordinator.register_agent("core", "general", 5).unwrap();
        let work = coordinator
            .create_work(WorkRequest {
                work_type: "prop".into(),
                priority: Priority::Medium,
                team: "core".into(),
                description: "progress sequencing".into(),
                estimated_duration: None,
                created_by: None,
            })
            .unwrap();
        let ctx = pipeline.root_context();
        coordinator.claim(&work, &agent, &ctx).unwrap();

        let mut highest = 0u8;
        for pct in updates {
            let result = coordinator.progress(&work, &agent, pct);
            let (items, _) = coordinator.store().load::<WorkItem>(Collection::WorkClaims).unwrap();
            let stored = items[0].progress;
            if pct > 100 || pct < highest {
                prop_assert!(result.is_err());
                prop_assert_eq!(stored, highest, "rejected update must not change state");
            } else {
                prop_assert!(result.is_ok());
                highest = pct;
                prop_assert_eq!(stored, highest);
            }
        }
    }

    /// Round-trip law: what the coordinator persists parses back with a
    /// byte-equal canonical encoding.
    #[test]
    fn prop_persisted_items_round_trip(descriptions in prop::collection::vec("[a-zA-Z0-9 _-]{1,40}", 1..6)) {
        let (coordinator, _pipeline, dir) = harness();
        for description in &descriptions {
            coordinator
                .create_work(WorkRequest {
                    work_type: "roundtrip".into(),
                    priority: Priority::Low,
                    team: "core".into(),
                    description: description.clone(),
                    estimated_duration: Some("5m".into()),
                    created_by: Some("prop".into()),
                })
                .unwrap();
        }
        let raw = std::fs::read_to_string(dir.path().join("work_claims.json")).unwrap();
        let parsed: Vec<WorkItem> = serde_json::from_str(&raw).unwrap();
        prop_assert_eq!(parsed.len(), descriptions.len());
        let reencoded = serde_json::to_string_pretty(&parsed).unwrap();
        prop_assert_eq!(raw, reencoded);
    }
}
