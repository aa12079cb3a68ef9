//! Property-based tests for registry invariants.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use osprey_events::Target;
use osprey_gateway::{GatewayError, UpstreamRegistry};
use osprey_id::{AppId, TaskId, VersionId};
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn target(app: &str, alias: &str, index: u32, weight: f64) -> Target {
    let app_id: AppId = app.parse().unwrap();
    Target {
        task_id: TaskId::compose(&app_id, index, 1),
        app_id,
        alias: alias.to_string(),
        version_id: VersionId::new(),
        task_ip: "10.0.0.1".parse().unwrap(),
        task_port: 31000 + index as u16,
        weight,
    }
}

fn registry() -> Arc<UpstreamRegistry> {
    Arc::new(UpstreamRegistry::new(
        Duration::from_secs(600),
        Duration::from_secs(60),
    ))
}

#[derive(Debug, Clone)]
enum Op {
    Lookup(u8),
    RemoveTarget(u8),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            4 => (0u8..4).prop_map(Op::Lookup),
            1 => (0u8..4).prop_map(Op::RemoveTarget),
        ],
        1..40,
    )
}

proptest! {
    /// Two consecutive lookups for the same client, with no intervening
    /// removal of its pinned target, return the same target.
    #[test]
    fn session_affinity_survives_unrelated_changes(ops in arb_ops()) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let registry = registry();
            let app: AppId = "web".parse().unwrap();
            let targets: Vec<Target> =
                (0..4).map(|i| target("web", "web", i, 1.0)).collect();
            for t in &targets {
                registry.upsert_target(t.clone()).await.unwrap();
            }

            let mut pins: HashMap<IpAddr, TaskId> = HashMap::new();
            let mut present: Vec<bool> = vec![true; 4];

            for op in &ops {
                match op {
                    Op::Lookup(client) => {
                        let ip: IpAddr = format!("1.2.3.{client}").parse().unwrap();
                        let Some(picked) = registry.lookup(ip, &app, None).await else {
                            prop_assert!(present.iter().all(|p| !p));
                            continue;
                        };
                        if let Some(pinned) = pins.get(&ip) {
                            let pin_index = pinned.slot_index().unwrap() as usize;
                            if present[pin_index] {
                                prop_assert_eq!(
                                    &picked.task_id,
                                    pinned,
                                    "client {} lost its session",
                                    ip
                                );
                            }
                        }
                        pins.insert(ip, picked.task_id.clone());
                    }
                    Op::RemoveTarget(index) => {
                        let index = *index as usize;
                        if present[index] {
                            registry.remove_target(&targets[index]).await;
                            present[index] = false;
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Whatever the upsert order, aliases stay unique across the registry:
    /// a conflicting insert is rejected and changes nothing.
    #[test]
    fn aliases_remain_unique(
        inserts in prop::collection::vec(
            (
                prop::sample::select(vec!["alpha", "beta", "gamma"]),
                prop::sample::select(vec!["foo", "bar"]),
                0u32..3,
            ),
            1..30,
        ),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let registry = registry();
            // alias → owning app, tracked from accepted first inserts.
            let mut owners: HashMap<String, String> = HashMap::new();

            for (app, alias, index) in &inserts {
                let app_id: AppId = app.parse().unwrap();
                let had_upstream = registry.target_count(&app_id).await > 0;
                let result = registry
                    .upsert_target(target(app, alias, *index, 1.0))
                    .await;

                match result {
                    Ok(()) => {
                        if !had_upstream {
                            // A brand-new upstream claimed this alias; it
                            // must have been free.
                            prop_assert!(owners.get(*alias).is_none());
                            owners.insert(alias.to_string(), app.to_string());
                        }
                        // An existing upstream keeps its original alias; the
                        // alias argument of later targets is not rebinding.
                    }
                    Err(GatewayError::AliasConflict { .. }) => {
                        prop_assert!(!had_upstream);
                        prop_assert!(
                            owners.get(*alias).is_some_and(|owner| owner != app)
                        );
                    }
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }

            // Every claimed alias still resolves to its original owner.
            for (alias, owner) in &owners {
                prop_assert_eq!(
                    registry.app_for_alias(alias).await,
                    Some(owner.parse().unwrap())
                );
            }
            Ok(())
        })?;
    }
}
