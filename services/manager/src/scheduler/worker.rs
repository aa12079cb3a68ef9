//! The async scheduler worker.
//!
//! Wraps [`SchedulerCore`] with channels: operator commands arrive through a
//! [`SchedulerHandle`], cluster-manager callbacks arrive on the driver-event
//! channel, and every [`ClusterOp`] the core emits is executed against the
//! [`Driver`]. Registry mutation stays serialised because only this loop
//! touches the core.
//!
//! Disconnect handling: while the driver is disconnected the worker keeps
//! processing status updates and operator commands (local state transitions)
//! but stops issuing launch decisions; a background task re-dials the master
//! with bounded exponential backoff.

use std::sync::Arc;

use osprey_events::{Event, EventBus};
use osprey_id::{AppId, FrameworkId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::state::Version;

use super::backoff::BackoffPolicy;
use super::core::{AppInfo, AppSpec, ClusterOp, SchedulerCore};
use super::driver::{Driver, DriverEvent};

/// Operator commands accepted by the worker.
#[derive(Debug)]
pub enum Command {
    CreateApp {
        spec: AppSpec,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    ScaleUp {
        app_id: AppId,
        delta: u32,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    ScaleDown {
        app_id: AppId,
        delta: u32,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    UpdateApp {
        app_id: AppId,
        version: Arc<Version>,
        batch: Option<usize>,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    CancelUpdate {
        app_id: AppId,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    DeleteApp {
        app_id: AppId,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    GetApp {
        app_id: AppId,
        reply: oneshot::Sender<Result<AppInfo, ManagerError>>,
    },
    ListApps {
        reply: oneshot::Sender<Vec<AppInfo>>,
    },
    HealthyHistory {
        app_id: Option<AppId>,
        reply: oneshot::Sender<Vec<Event>>,
    },
}

/// Cloneable handle for issuing commands to the worker.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ManagerError>>) -> Command,
    ) -> Result<T, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ManagerError::Transient("scheduler unavailable".to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Transient("scheduler dropped the request".to_string()))?
    }

    pub async fn create_app(&self, spec: AppSpec) -> Result<(), ManagerError> {
        self.request(|reply| Command::CreateApp { spec, reply }).await
    }

    pub async fn scale_up(&self, app_id: AppId, delta: u32) -> Result<(), ManagerError> {
        self.request(|reply| Command::ScaleUp {
            app_id,
            delta,
            reply,
        })
        .await
    }

    pub async fn scale_down(&self, app_id: AppId, delta: u32) -> Result<(), ManagerError> {
        self.request(|reply| Command::ScaleDown {
            app_id,
            delta,
            reply,
        })
        .await
    }

    pub async fn update_app(
        &self,
        app_id: AppId,
        version: Arc<Version>,
        batch: Option<usize>,
    ) -> Result<(), ManagerError> {
        self.request(|reply| Command::UpdateApp {
            app_id,
            version,
            batch,
            reply,
        })
        .await
    }

    pub async fn cancel_update(&self, app_id: AppId) -> Result<(), ManagerError> {
        self.request(|reply| Command::CancelUpdate { app_id, reply })
            .await
    }

    pub async fn delete_app(&self, app_id: AppId) -> Result<(), ManagerError> {
        self.request(|reply| Command::DeleteApp { app_id, reply })
            .await
    }

    pub async fn get_app(&self, app_id: AppId) -> Result<AppInfo, ManagerError> {
        self.request(|reply| Command::GetApp { app_id, reply }).await
    }

    pub async fn list_apps(&self) -> Result<Vec<AppInfo>, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ListApps { reply })
            .await
            .map_err(|_| ManagerError::Transient("scheduler unavailable".to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Transient("scheduler dropped the request".to_string()))
    }

    pub async fn healthy_history(
        &self,
        app_id: Option<AppId>,
    ) -> Result<Vec<Event>, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::HealthyHistory { app_id, reply })
            .await
            .map_err(|_| ManagerError::Transient("scheduler unavailable".to_string()))?;
        rx.await
            .map_err(|_| ManagerError::Transient("scheduler dropped the request".to_string()))
    }
}

/// The scheduler worker.
pub struct Scheduler<D: Driver> {
    core: SchedulerCore,
    driver: Arc<D>,
    commands: mpsc::Receiver<Command>,
    driver_events: mpsc::Receiver<DriverEvent>,
    reconnected_tx: mpsc::Sender<FrameworkId>,
    reconnected_rx: mpsc::Receiver<FrameworkId>,
    backoff: BackoffPolicy,
    failure_budget: u32,
    connected: bool,
    reconnecting: bool,
    consecutive_failures: u32,
}

impl<D: Driver> Scheduler<D> {
    /// Builds the worker plus its command handle and driver-event feed.
    pub fn new(
        cfg: ManagerConfig,
        bus: Arc<EventBus>,
        driver: D,
    ) -> (Self, SchedulerHandle, mpsc::Sender<DriverEvent>) {
        let (command_tx, commands) = mpsc::channel(64);
        let (event_tx, driver_events) = mpsc::channel(1024);
        let (reconnected_tx, reconnected_rx) = mpsc::channel(1);

        let backoff = BackoffPolicy {
            base: cfg.backoff_base,
            max: cfg.backoff_max,
            ..Default::default()
        };
        let failure_budget = cfg.driver_failure_budget;
        let core = SchedulerCore::new(cfg, bus);

        (
            Self {
                core,
                driver: Arc::new(driver),
                commands,
                driver_events,
                reconnected_tx,
                reconnected_rx,
                backoff,
                failure_budget,
                connected: false,
                reconnecting: false,
                consecutive_failures: 0,
            },
            SchedulerHandle { tx: command_tx },
            event_tx,
        )
    }

    /// Runs until shutdown is signaled or both inbound channels close.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler worker starting");
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler worker shutting down");
                        break;
                    }
                }

                Some(framework_id) = self.reconnected_rx.recv() => {
                    self.reconnecting = false;
                    self.connected = true;
                    self.consecutive_failures = 0;
                    let ops = self.core.handle_reregistered(framework_id);
                    self.execute(ops).await;
                }

                event = self.driver_events.recv() => {
                    match event {
                        Some(event) => self.handle_driver_event(event).await,
                        None => {
                            info!("driver event channel closed, stopping worker");
                            break;
                        }
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("all scheduler handles dropped, stopping worker");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Offers(offers) => {
                if !self.connected {
                    debug!(count = offers.len(), "dropping offers while disconnected");
                    return;
                }
                for offer in &offers {
                    let ops = self.core.handle_offer(offer);
                    self.execute(ops).await;
                }
            }
            DriverEvent::OfferRescinded(offer_id) => {
                self.core.handle_rescind(&offer_id);
            }
            DriverEvent::StatusUpdate(update) => {
                let ops = self.core.handle_status(&update);
                self.execute(ops).await;
            }
            DriverEvent::Disconnected => {
                self.on_disconnect();
            }
            DriverEvent::Reregistered(framework_id) => {
                self.reconnecting = false;
                self.connected = true;
                self.consecutive_failures = 0;
                let ops = self.core.handle_reregistered(framework_id);
                self.execute(ops).await;
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateApp { spec, reply } => {
                let result = self.core.create_app(spec);
                self.finish(result, reply).await;
            }
            Command::ScaleUp {
                app_id,
                delta,
                reply,
            } => {
                let result = self.core.scale_up(&app_id, delta);
                self.finish(result, reply).await;
            }
            Command::ScaleDown {
                app_id,
                delta,
                reply,
            } => {
                let result = self.core.scale_down(&app_id, delta);
                self.finish(result, reply).await;
            }
            Command::UpdateApp {
                app_id,
                version,
                batch,
                reply,
            } => {
                let result = self.core.update_app(&app_id, version, batch);
                self.finish(result, reply).await;
            }
            Command::CancelUpdate { app_id, reply } => {
                let result = self.core.cancel_update(&app_id);
                self.finish(result, reply).await;
            }
            Command::DeleteApp { app_id, reply } => {
                let result = self.core.delete_app(&app_id);
                self.finish(result, reply).await;
            }
            Command::GetApp { app_id, reply } => {
                let _ = reply.send(self.core.app_info(&app_id));
            }
            Command::ListApps { reply } => {
                let _ = reply.send(self.core.list_apps());
            }
            Command::HealthyHistory { app_id, reply } => {
                let _ = reply.send(self.core.healthy_history(app_id.as_ref()));
            }
        }
    }

    /// Executes the ops for one command and replies with its outcome.
    async fn finish(
        &mut self,
        result: Result<Vec<ClusterOp>, ManagerError>,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    ) {
        match result {
            Ok(ops) => {
                self.execute(ops).await;
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Executes cluster ops against the driver, tracking connection health.
    async fn execute(&mut self, ops: Vec<ClusterOp>) {
        let mut revived = false;
        for op in ops {
            if matches!(op, ClusterOp::Revive) {
                if revived {
                    continue;
                }
                revived = true;
            }
            if !self.connected {
                debug!("driver disconnected, deferring cluster op");
                continue;
            }

            let result = match &op {
                ClusterOp::Launch { offer_id, tasks } => {
                    self.driver.launch_tasks(offer_id, tasks).await
                }
                ClusterOp::Kill { task_id } => self.driver.kill_task(task_id).await,
                ClusterOp::Decline {
                    offer_id,
                    refuse_seconds,
                } => self.driver.decline_offer(offer_id, *refuse_seconds).await,
                ClusterOp::Revive => self.driver.revive_offers().await,
            };

            match result {
                Ok(()) => {
                    self.consecutive_failures = 0;
                }
                Err(err) => {
                    self.consecutive_failures += 1;
                    warn!(
                        error = %err,
                        failures = self.consecutive_failures,
                        "driver call failed"
                    );
                    if self.consecutive_failures >= self.failure_budget {
                        self.on_disconnect();
                    }
                }
            }
        }
    }

    /// Marks the driver disconnected and starts the reconnect loop.
    fn on_disconnect(&mut self) {
        if self.reconnecting {
            return;
        }
        self.connected = false;
        self.reconnecting = true;
        self.consecutive_failures = 0;
        warn!("driver disconnected, entering reconnect loop");

        let driver = self.driver.clone();
        let reconnected = self.reconnected_tx.clone();
        let backoff = self.backoff.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                tokio::time::sleep(backoff.delay(attempt)).await;
                match driver.reconnect().await {
                    Ok(framework_id) => {
                        // The worker going away closes the channel; stop then.
                        let _ = reconnected.send(framework_id).await;
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, attempt, "reconnect attempt failed");
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }
}
