//! The upstream registry: application identity → healthy task endpoints.
//!
//! Consumes target-change events from the scheduler and answers lookups for
//! the proxy. Reads dominate, so the registry sits behind a reader/writer
//! lock; sessions have their own mutex per upstream (see [`crate::session`]).
//!
//! Lookup fallthrough, in order:
//! 1. a fresh session for the client IP whose target still exists
//! 2. the explicitly requested task, if any
//! 3. whatever the balancer picks (which then pins a new session)

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use osprey_events::{Target, TargetChange, TargetChangeEvent};
use osprey_id::{AppId, TaskId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::balancer::{Balancer, WeightBalancer};
use crate::error::GatewayError;
use crate::session::Sessions;

/// One application's routable target set.
pub struct Upstream {
    pub app_id: AppId,
    pub alias: String,
    pub targets: Vec<Target>,
    sessions: Arc<Sessions>,
    balancer: Box<dyn Balancer>,
}

impl Upstream {
    fn new(app_id: AppId, alias: String, session_ttl: Duration, gc_interval: Duration) -> Self {
        let sessions = Sessions::new(session_ttl);
        sessions.start_gc(gc_interval);
        Self {
            app_id,
            alias,
            targets: Vec::new(),
            sessions,
            balancer: Box::new(WeightBalancer),
        }
    }

    fn target(&self, task_id: &TaskId) -> Option<&Target> {
        self.targets.iter().find(|t| &t.task_id == task_id)
    }

    /// Sessions-then-task-then-balancer selection.
    fn select(&self, remote_ip: IpAddr, task_id: Option<&TaskId>) -> Option<Target> {
        if let Some(pinned) = self.sessions.get(remote_ip) {
            if self.target(&pinned.task_id).is_some() {
                return Some(pinned);
            }
            // The pinned target is gone; invalidate and fall through.
            self.sessions.remove_ip(remote_ip);
        }

        let picked = match task_id {
            Some(task_id) => self.target(task_id).cloned(),
            None => self.balancer.next(&self.targets),
        }?;

        self.sessions.update(remote_ip, picked.clone());
        Some(picked)
    }
}

/// The registry of upstreams, keyed by application and by alias.
pub struct UpstreamRegistry {
    upstreams: RwLock<Vec<Upstream>>,
    session_ttl: Duration,
    gc_interval: Duration,
}

impl UpstreamRegistry {
    pub fn new(session_ttl: Duration, gc_interval: Duration) -> Self {
        Self {
            upstreams: RwLock::new(Vec::new()),
            session_ttl,
            gc_interval,
        }
    }

    /// Inserts or updates a target.
    ///
    /// A target for an unknown application creates its upstream, rejected
    /// with a conflict if another application already routes the alias.
    pub async fn upsert_target(&self, target: Target) -> Result<(), GatewayError> {
        target.validate()?;

        let mut upstreams = self.upstreams.write().await;

        let Some(upstream) = upstreams.iter_mut().find(|u| u.app_id == target.app_id) else {
            if let Some(holder) = upstreams.iter().find(|u| u.alias == target.alias) {
                return Err(GatewayError::AliasConflict {
                    alias: target.alias.clone(),
                    held_by: holder.app_id.clone(),
                });
            }
            info!(app_id = %target.app_id, alias = %target.alias, "new upstream");
            let mut upstream = Upstream::new(
                target.app_id.clone(),
                target.alias.clone(),
                self.session_ttl,
                self.gc_interval,
            );
            upstream.targets.push(target);
            upstreams.push(upstream);
            return Ok(());
        };

        match upstream
            .targets
            .iter_mut()
            .find(|t| t.task_id == target.task_id)
        {
            Some(existing) => {
                debug!(app_id = %target.app_id, task_id = %target.task_id, "target updated");
                *existing = target;
            }
            None => {
                debug!(app_id = %target.app_id, task_id = %target.task_id, "target added");
                upstream.targets.push(target);
            }
        }
        Ok(())
    }

    /// Drops a target; an upstream left empty is torn down and its session
    /// sweeper stopped.
    pub async fn remove_target(&self, target: &Target) {
        let mut upstreams = self.upstreams.write().await;

        let Some(position) = upstreams.iter().position(|u| u.app_id == target.app_id) else {
            return;
        };
        let upstream = &mut upstreams[position];
        let Some(target_position) = upstream
            .targets
            .iter()
            .position(|t| t.task_id == target.task_id)
        else {
            return;
        };

        upstream.targets.remove(target_position);
        upstream.sessions.remove_task(&target.task_id);
        debug!(app_id = %target.app_id, task_id = %target.task_id, "target removed");

        if upstream.targets.is_empty() {
            upstream.sessions.stop();
            upstreams.remove(position);
            info!(app_id = %target.app_id, "upstream torn down");
        }
    }

    /// Applies one target-change event from the scheduler's feed.
    pub async fn apply_event(&self, event: &TargetChangeEvent) -> Result<(), GatewayError> {
        match event.change {
            TargetChange::Add | TargetChange::Update => {
                self.upsert_target(event.target.clone()).await
            }
            TargetChange::Delete => {
                self.remove_target(&event.target).await;
                Ok(())
            }
        }
    }

    /// Selects one target for `(remote_ip, app_id)`, optionally pinned to a
    /// specific task.
    pub async fn lookup(
        &self,
        remote_ip: IpAddr,
        app_id: &AppId,
        task_id: Option<&TaskId>,
    ) -> Option<Target> {
        let upstreams = self.upstreams.read().await;
        let upstream = upstreams.iter().find(|u| &u.app_id == app_id)?;
        upstream.select(remote_ip, task_id)
    }

    /// Like [`lookup`](Self::lookup), addressed by alias.
    pub async fn lookup_alias(&self, remote_ip: IpAddr, alias: &str) -> Option<Target> {
        let upstreams = self.upstreams.read().await;
        let upstream = upstreams.iter().find(|u| u.alias == alias)?;
        upstream.select(remote_ip, None)
    }

    /// Resolves an alias to its application, if registered.
    pub async fn app_for_alias(&self, alias: &str) -> Option<AppId> {
        let upstreams = self.upstreams.read().await;
        upstreams
            .iter()
            .find(|u| u.alias == alias)
            .map(|u| u.app_id.clone())
    }

    /// Number of registered upstreams.
    pub async fn len(&self) -> usize {
        self.upstreams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.upstreams.read().await.is_empty()
    }

    /// Number of targets currently routable for `app_id`.
    pub async fn target_count(&self, app_id: &AppId) -> usize {
        let upstreams = self.upstreams.read().await;
        upstreams
            .iter()
            .find(|u| &u.app_id == app_id)
            .map(|u| u.targets.len())
            .unwrap_or(0)
    }
}

impl Drop for UpstreamRegistry {
    fn drop(&mut self) {
        if let Ok(upstreams) = self.upstreams.try_read() {
            for upstream in upstreams.iter() {
                upstream.sessions.stop();
            }
        } else {
            warn!("registry dropped while locked; session sweepers stop on their next tick");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DEFAULT_TTL;
    use osprey_id::VersionId;

    fn target(app: &str, alias: &str, task: &str, port: u16, weight: f64) -> Target {
        Target {
            app_id: app.parse().unwrap(),
            alias: alias.to_string(),
            version_id: VersionId::new(),
            task_id: task.parse().unwrap(),
            task_ip: "10.0.0.1".parse().unwrap(),
            task_port: port,
            weight,
        }
    }

    fn registry() -> UpstreamRegistry {
        UpstreamRegistry::new(DEFAULT_TTL, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn upsert_creates_and_updates() {
        let registry = registry();
        registry
            .upsert_target(target("web", "web", "0-1-web", 31000, 100.0))
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.target_count(&"web".parse().unwrap()).await, 1);

        // Same task id updates in place.
        registry
            .upsert_target(target("web", "web", "0-1-web", 31005, 50.0))
            .await
            .unwrap();
        assert_eq!(registry.target_count(&"web".parse().unwrap()).await, 1);

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let picked = registry
            .lookup(ip, &"web".parse().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(picked.task_port, 31005);
    }

    #[tokio::test]
    async fn alias_conflict_is_rejected_and_registry_unchanged() {
        let registry = registry();
        registry
            .upsert_target(target("alpha", "foo", "0-1-alpha", 31000, 100.0))
            .await
            .unwrap();

        let err = registry
            .upsert_target(target("beta", "foo", "0-1-beta", 31001, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AliasConflict { .. }));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.target_count(&"beta".parse().unwrap()).await, 0);
    }

    #[tokio::test]
    async fn invalid_targets_are_rejected() {
        let registry = registry();
        // Task id not suffixed by the app id.
        let err = registry
            .upsert_target(target("web", "web", "0-1-other", 31000, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn empty_upstream_is_torn_down() {
        let registry = registry();
        let t = target("web", "web", "0-1-web", 31000, 100.0);
        registry.upsert_target(t.clone()).await.unwrap();
        registry.remove_target(&t).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn session_affinity_and_failover() {
        let registry = registry();
        let a = target("web", "web", "0-1-web", 31000, 1.0);
        let b = target("web", "web", "1-1-web", 31001, 3.0);
        registry.upsert_target(a.clone()).await.unwrap();
        registry.upsert_target(b.clone()).await.unwrap();

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let app: AppId = "web".parse().unwrap();

        let first = registry.lookup(ip, &app, None).await.unwrap();
        let second = registry.lookup(ip, &app, None).await.unwrap();
        assert_eq!(first.task_id, second.task_id, "session must pin the client");

        // Remove the pinned target: the next lookup fails over and re-pins.
        registry.remove_target(&first).await;
        let third = registry.lookup(ip, &app, None).await.unwrap();
        assert_ne!(first.task_id, third.task_id);
        let fourth = registry.lookup(ip, &app, None).await.unwrap();
        assert_eq!(third.task_id, fourth.task_id);
    }

    #[tokio::test]
    async fn explicit_task_lookup() {
        let registry = registry();
        registry
            .upsert_target(target("web", "web", "0-1-web", 31000, 1.0))
            .await
            .unwrap();
        registry
            .upsert_target(target("web", "web", "1-1-web", 31001, 1.0))
            .await
            .unwrap();

        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        let app: AppId = "web".parse().unwrap();
        let task: TaskId = "1-1-web".parse().unwrap();

        let picked = registry.lookup(ip, &app, Some(&task)).await.unwrap();
        assert_eq!(picked.task_id, task);

        let missing: TaskId = "7-1-web".parse().unwrap();
        assert!(registry.lookup(ip, &app, Some(&missing)).await.is_none());
    }

    #[tokio::test]
    async fn lookup_alias_resolves_to_same_upstream() {
        let registry = registry();
        registry
            .upsert_target(target("web", "store-front", "0-1-web", 31000, 1.0))
            .await
            .unwrap();

        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let picked = registry.lookup_alias(ip, "store-front").await.unwrap();
        assert_eq!(picked.app_id.as_str(), "web");
        assert!(registry.lookup_alias(ip, "unknown").await.is_none());
    }
}
