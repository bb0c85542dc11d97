//! Key-ring invariants under arbitrary schedules of clock advances and
//! rotations.

use chrono::{DateTime, Utc};
use keyward_common::ManualClock;
use keyward_jwt::{JwtKeyManager, KeyManagerConfig, MemoryKeyMetadataStore};
use keyward_kms::{KmsProvider, MemoryKmsProvider};
use proptest::prelude::*;
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone)]
enum Step {
    /// Advance the clock by this many hours, then run a scheduled rotation
    Tick(u64),
    Force,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0u64..48).prop_map(Step::Tick),
        1 => Just(Step::Force),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn the_key_ring_stays_bounded(
        max_active_keys in 1usize..5,
        steps in proptest::collection::vec(arb_step(), 0..20),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        rt.block_on(async {
            let clock = Arc::new(ManualClock::new(
                DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            ));
            let kms = Arc::new(MemoryKmsProvider::new());
            let config = KeyManagerConfig {
                max_active_keys,
                ..Default::default()
            };
            let manager = JwtKeyManager::initialize(
                config,
                kms.clone(),
                Arc::new(MemoryKeyMetadataStore::new()),
                clock.clone(),
            )
            .await
            .unwrap();

            let mut created = 0;
            for step in steps {
                let report = match step {
                    Step::Tick(hours) => {
                        clock.advance(Duration::from_secs(hours * 3600));
                        manager.rotate_keys().await.unwrap()
                    }
                    Step::Force => manager.force_rotation().await.unwrap(),
                };
                prop_assert!(!report.skipped);
                if report.created.is_some() {
                    created += 1;
                }

                let stats = manager.key_stats();
                let current = manager.get_current_key().unwrap();
                prop_assert!(stats.active_keys <= max_active_keys);
                prop_assert!(current.is_active);
                prop_assert_eq!(stats.current_key_id.as_deref(), Some(current.id.as_str()));
                prop_assert_eq!(stats.total_keys, 1 + created);

                let signed = manager.sign(b"payload").unwrap();
                prop_assert!(manager.verify(b"payload", &signed.signature, &signed.key_id));

                let kms_keys = kms.list_keys().await.unwrap();
                prop_assert_eq!(kms_keys.len(), stats.active_keys);
            }
            Ok(())
        })?;
    }
}
