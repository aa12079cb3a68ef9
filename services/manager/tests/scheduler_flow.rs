//! End-to-end scheduler flows driven through the core.
//!
//! The core is synchronous, so these tests feed offers and status callbacks
//! directly and assert on the resulting cluster ops, registry state, and
//! published events.

use std::net::IpAddr;
use std::sync::Arc;

use osprey_events::{Event, EventBus, EventPayload, TargetChange};
use osprey_id::{AgentId, AppId, OfferId, TaskId};
use osprey_manager::offer::{Offer, PortRange, Resources};
use osprey_manager::scheduler::{AppSpec, ClusterOp, SchedulerCore, StatusUpdate};
use osprey_manager::state::{Protocol, TaskStatus, Version};
use osprey_manager::ManagerConfig;
use tokio::sync::mpsc;

fn version(instances: u32, constraint: Option<&str>, image: &str) -> Arc<Version> {
    let mut builder = Version::builder()
        .image(image)
        .instances(instances)
        .resources(Resources {
            cpus: 1.0,
            mem: 128.0,
            ..Default::default()
        })
        .port(Some("web"), 80, Protocol::Tcp);
    if let Some(text) = constraint {
        builder = builder.constraint(text);
    }
    builder.build().unwrap()
}

fn offer(id: &str, hostname: &str, cpus: f64) -> Offer {
    Offer {
        id: OfferId::new(id),
        agent_id: AgentId::new(format!("agent-{hostname}")),
        hostname: hostname.to_string(),
        resources: Resources {
            cpus,
            mem: 4096.0,
            ..Default::default()
        },
        port_ranges: vec![PortRange {
            begin: 31000,
            end: 31099,
        }],
        attributes: vec![],
    }
}

fn running(task_id: &TaskId, ip: &str) -> StatusUpdate {
    StatusUpdate {
        task_id: task_id.clone(),
        status: TaskStatus::Running,
        ip: Some(ip.parse::<IpAddr>().unwrap()),
        healthy: None,
        message: None,
    }
}

fn terminal(task_id: &TaskId, status: TaskStatus) -> StatusUpdate {
    StatusUpdate {
        task_id: task_id.clone(),
        status,
        ip: None,
        healthy: None,
        message: None,
    }
}

struct Harness {
    core: SchedulerCore,
    events: mpsc::Receiver<Event>,
}

impl Harness {
    fn new() -> Self {
        let bus = Arc::new(EventBus::new(1024));
        let events = bus.subscribe(None);
        let core = SchedulerCore::new(ManagerConfig::default(), bus);
        Self {
            core,
            events: events.rx,
        }
    }

    fn create(&mut self, app: &str, instances: u32, constraint: Option<&str>) {
        self.core
            .create_app(AppSpec {
                id: app.parse().unwrap(),
                alias: app.to_string(),
                version: version(instances, constraint, "nginx:1.25"),
            })
            .unwrap();
    }

    /// Sends one offer, returning the launched task IDs.
    fn offer(&mut self, id: &str, hostname: &str, cpus: f64) -> Vec<TaskId> {
        let ops = self.core.handle_offer(&offer(id, hostname, cpus));
        ops.iter()
            .filter_map(|op| match op {
                ClusterOp::Launch { tasks, .. } => {
                    Some(tasks.iter().map(|t| t.task_id.clone()).collect::<Vec<_>>())
                }
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn drain_target_events(&mut self) -> Vec<(TargetChange, TaskId)> {
        let mut changes = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let EventPayload::TargetChange(change) = event.payload {
                changes.push((change.change, change.target.task_id));
            }
        }
        changes
    }

    fn state_of(&self, app: &str) -> String {
        self.core
            .app_info(&app.parse().unwrap())
            .unwrap()
            .state
    }
}

fn kills(ops: &[ClusterOp]) -> Vec<TaskId> {
    ops.iter()
        .filter_map(|op| match op {
            ClusterOp::Kill { task_id } => Some(task_id.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn create_reaches_normal_in_offer_order() {
    let mut h = Harness::new();
    h.create("web", 3, None);
    assert_eq!(h.state_of("web"), "creating");

    // One slot fits per offer, so placement follows offer arrival order.
    let hosts = ["h1", "h2", "h3"];
    for (i, host) in hosts.iter().enumerate() {
        let launched = h.offer(&format!("o{i}"), host, 1.0);
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].slot_index(), Some(i as u32));
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }

    assert_eq!(h.state_of("web"), "normal");

    let info = h.core.app_info(&"web".parse::<AppId>().unwrap()).unwrap();
    let placed: Vec<_> = info
        .slots
        .iter()
        .map(|s| s.hostname.clone().unwrap())
        .collect();
    assert_eq!(placed, vec!["h1", "h2", "h3"]);

    let adds = h.drain_target_events();
    let added: Vec<_> = adds
        .iter()
        .filter(|(change, _)| *change == TargetChange::Add)
        .map(|(_, task)| task.slot_index().unwrap())
        .collect();
    assert_eq!(added, vec![0, 1, 2]);
}

#[test]
fn unique_hostname_declines_duplicate_host() {
    let mut h = Harness::new();
    h.create("web", 2, Some("(unique hostname)"));

    let first = h.offer("o1", "h1", 4.0);
    assert_eq!(first.len(), 1, "only one slot may land on h1");
    assert_eq!(first[0].slot_index(), Some(0));

    // The middle h1 offer matches nothing and is declined.
    let ops = h.core.handle_offer(&offer("o2", "h1", 4.0));
    assert!(
        matches!(ops[..], [ClusterOp::Decline { .. }]),
        "expected decline, got {ops:?}"
    );

    let second = h.offer("o3", "h2", 4.0);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].slot_index(), Some(1));

    h.core.handle_status(&running(&first[0], "10.0.0.1"));
    h.core.handle_status(&running(&second[0], "10.0.0.2"));
    assert_eq!(h.state_of("web"), "normal");
}

#[test]
fn rolling_update_replaces_slots_in_order() {
    let mut h = Harness::new();
    h.create("web", 3, None);
    for i in 0..3 {
        let launched = h.offer(&format!("o{i}"), &format!("h{i}"), 1.0);
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }
    assert_eq!(h.state_of("web"), "normal");
    h.drain_target_events();

    let app_id: AppId = "web".parse().unwrap();
    let v2 = version(3, None, "nginx:1.26");
    let ops = h.core.update_app(&app_id, v2.clone(), Some(1)).unwrap();
    assert_eq!(h.state_of("web"), "updating");

    let mut expected_kill_order = Vec::new();
    let mut ops = ops;
    for index in 0u32..3 {
        // Exactly one kill in flight at a time, lowest index first.
        let killed = kills(&ops);
        assert_eq!(killed.len(), 1, "batch=1 must kill one slot at a time");
        assert_eq!(killed[0].slot_index(), Some(index));
        expected_kill_order.push(killed[0].clone());

        h.core
            .handle_status(&terminal(&killed[0], TaskStatus::Killed));

        // Availability floor: at most `batch` slots are down at any moment.
        assert!(h.core.app_info(&app_id).unwrap().running >= 2);

        // Relaunch with the new version on a fresh offer.
        let relaunched = h.offer(&format!("u{index}"), &format!("h{index}"), 1.0);
        assert_eq!(relaunched.len(), 1);
        assert_eq!(relaunched[0].slot_index(), Some(index));
        ops = h
            .core
            .handle_status(&running(&relaunched[0], &format!("10.0.1.{}", index + 1)));
    }

    assert_eq!(h.state_of("web"), "normal");
    let info = h.core.app_info(&app_id).unwrap();
    assert_eq!(info.version_id, v2.id.to_string());
    assert!(info
        .slots
        .iter()
        .all(|slot| slot.version_id == v2.id.to_string()));

    // Per slot, the event trace is delete(v1) then add(v2).
    let changes = h.drain_target_events();
    for index in 0u32..3 {
        let per_slot: Vec<_> = changes
            .iter()
            .filter(|(_, task)| task.slot_index() == Some(index))
            .collect();
        assert_eq!(per_slot.len(), 2);
        assert_eq!(per_slot[0].0, TargetChange::Delete);
        assert_eq!(per_slot[0].1, expected_kill_order[index as usize]);
        assert_eq!(per_slot[1].0, TargetChange::Add);
    }
}

#[test]
fn cancel_update_restores_previous_version() {
    let mut h = Harness::new();
    h.create("web", 3, None);
    for i in 0..3 {
        let launched = h.offer(&format!("o{i}"), &format!("h{i}"), 1.0);
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }
    let app_id: AppId = "web".parse().unwrap();
    let v1_id = h.core.app_info(&app_id).unwrap().version_id.clone();

    // Begin update: slot 0 upgraded to v2 and running, slot 1 killed.
    let v2 = version(3, None, "nginx:1.26");
    let ops = h.core.update_app(&app_id, v2, Some(1)).unwrap();
    let killed = kills(&ops);
    h.core
        .handle_status(&terminal(&killed[0], TaskStatus::Killed));
    let slot0_v2 = h.offer("u0", "h0", 1.0);
    let ops = h.core.handle_status(&running(&slot0_v2[0], "10.0.1.1"));
    let killed = kills(&ops);
    assert_eq!(killed[0].slot_index(), Some(1));
    h.core
        .handle_status(&terminal(&killed[0], TaskStatus::Killed));
    // Slot 1 is now pending on v2, not yet relaunched.

    h.core.cancel_update(&app_id).unwrap();
    assert_eq!(h.state_of("web"), "cancel_update");

    // Slot 1 relaunches on v1 straight away.
    let slot1_v1 = h.offer("c1", "h1", 1.0);
    assert_eq!(slot1_v1[0].slot_index(), Some(1));
    let ops = h.core.handle_status(&running(&slot1_v1[0], "10.0.2.2"));

    // Then slot 0 is rolled back.
    let killed = kills(&ops);
    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].slot_index(), Some(0));
    h.core
        .handle_status(&terminal(&killed[0], TaskStatus::Killed));
    let slot0_v1 = h.offer("c0", "h0", 1.0);
    h.core.handle_status(&running(&slot0_v1[0], "10.0.2.1"));

    assert_eq!(h.state_of("web"), "normal");
    let info = h.core.app_info(&app_id).unwrap();
    assert_eq!(info.version_id, v1_id);
    assert!(info.slots.iter().all(|slot| slot.version_id == v1_id));
}

#[test]
fn scale_up_and_down_adjust_slot_set() {
    let mut h = Harness::new();
    h.create("web", 2, None);
    for i in 0..2 {
        let launched = h.offer(&format!("o{i}"), &format!("h{i}"), 1.0);
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }
    let app_id: AppId = "web".parse().unwrap();
    assert_eq!(h.state_of("web"), "normal");

    h.core.scale_up(&app_id, 2).unwrap();
    assert_eq!(h.state_of("web"), "scale_up");
    for i in 2..4 {
        let launched = h.offer(&format!("s{i}"), &format!("h{i}"), 1.0);
        assert_eq!(launched[0].slot_index(), Some(i));
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }
    assert_eq!(h.state_of("web"), "normal");
    assert_eq!(h.core.app_info(&app_id).unwrap().instances, 4);

    // Scale down kills the highest-index slots.
    let ops = h.core.scale_down(&app_id, 2).unwrap();
    let killed = kills(&ops);
    let mut indices: Vec<_> = killed.iter().map(|t| t.slot_index().unwrap()).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![2, 3]);

    for task in &killed {
        h.core.handle_status(&terminal(task, TaskStatus::Killed));
    }
    assert_eq!(h.state_of("web"), "normal");
    let info = h.core.app_info(&app_id).unwrap();
    assert_eq!(info.instances, 2);
    assert_eq!(info.slots.len(), 2);
}

#[test]
fn delete_removes_app_after_all_terminal() {
    let mut h = Harness::new();
    h.create("web", 2, None);
    let mut tasks = Vec::new();
    for i in 0..2 {
        let launched = h.offer(&format!("o{i}"), &format!("h{i}"), 1.0);
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
        tasks.push(launched[0].clone());
    }

    let app_id: AppId = "web".parse().unwrap();
    let ops = h.core.delete_app(&app_id).unwrap();
    assert_eq!(kills(&ops).len(), 2);

    for task in &tasks {
        h.core.handle_status(&terminal(task, TaskStatus::Killed));
    }
    assert!(h.core.app_info(&app_id).is_err());
    assert!(h.core.list_apps().is_empty());
}

#[test]
fn restart_budget_parks_failing_slot() {
    let mut h = Harness::new();
    h.create("web", 1, None);
    let budget = ManagerConfig::default().restart_budget;

    // Fail one more time than the budget allows.
    for attempt in 0..=budget {
        let launched = h.offer(&format!("o{attempt}"), "h1", 1.0);
        assert_eq!(launched.len(), 1, "attempt {attempt} should relaunch");
        h.core
            .handle_status(&terminal(&launched[0], TaskStatus::Failed));
    }

    // The slot is parked: no further offer matches it.
    let ops = h.core.handle_offer(&offer("last", "h1", 1.0));
    assert!(matches!(ops[..], [ClusterOp::Decline { .. }]));

    // And the exhaustion was surfaced on the bus.
    let mut exhausted = false;
    while let Ok(event) = h.events.try_recv() {
        if matches!(event.payload, EventPayload::RestartBudgetExhausted(_)) {
            exhausted = true;
        }
    }
    assert!(exhausted);
    // The app stays in its current non-terminal state.
    assert_eq!(h.state_of("web"), "creating");
}

#[test]
fn conflicting_directives_fail_fast() {
    let mut h = Harness::new();
    h.create("web", 1, None);
    let app_id: AppId = "web".parse().unwrap();

    // Still creating: bulk operations are rejected.
    assert!(h.core.scale_up(&app_id, 1).is_err());
    assert!(h
        .core
        .update_app(&app_id, version(1, None, "nginx:1.26"), None)
        .is_err());

    // Unknown app surfaces not-found.
    assert!(h.core.scale_up(&"missing".parse().unwrap(), 1).is_err());

    // Alias and id conflicts on create.
    assert!(h
        .core
        .create_app(AppSpec {
            id: "web".parse().unwrap(),
            alias: "other".to_string(),
            version: version(1, None, "nginx:1.25"),
        })
        .is_err());
    assert!(h
        .core
        .create_app(AppSpec {
            id: "web2".parse().unwrap(),
            alias: "web".to_string(),
            version: version(1, None, "nginx:1.25"),
        })
        .is_err());
}

#[test]
fn catch_up_ring_replays_target_history() {
    let mut h = Harness::new();
    h.create("web", 2, None);
    for i in 0..2 {
        let launched = h.offer(&format!("o{i}"), &format!("h{i}"), 1.0);
        h.core
            .handle_status(&running(&launched[0], &format!("10.0.0.{}", i + 1)));
    }

    let app_id: AppId = "web".parse().unwrap();
    let history = h.core.healthy_history(Some(&app_id));
    let adds = history
        .iter()
        .filter(|event| {
            matches!(
                &event.payload,
                EventPayload::TargetChange(change) if change.change == TargetChange::Add
            )
        })
        .count();
    assert_eq!(adds, 2);
    assert!(h.core.healthy_history(None).len() >= 2);
}
