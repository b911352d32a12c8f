// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Engine: Dependency-Driven Worker Scheduling
//!
//! [`Engine`] is a cheap, cloneable handle onto a single control loop task.
//! The loop owns every piece of bookkeeping; start attempts, running workers
//! and backoff timers live on their own tasks and report back through one
//! unbounded command queue, so state changes are applied strictly in arrival
//! order.
//!
//! ## Manifold Lifecycle
//!
//! | Event | Next state |
//! |-------|------------|
//! | all inputs started, nothing pending | `starting` |
//! | start function returns a worker | `started` |
//! | input stops, uninstall, shutdown | `stopping` (dependents first) |
//! | worker exits cleanly | `stopped`, parked until an input changes |
//! | `NotYetAvailable` | `stopped`, parked until an input changes |
//! | `Bounce` | restarted without backoff |
//! | any other error | `failed`, restarted after backoff |
//! | engine killed | `terminated` |
//!
//! A manifold is only asked to stop once none of its dependents has a
//! worker or a start in flight. Shutdown, loss of an input and uninstall all
//! go through that one ordered stop set.

use crate::domain::config::{EngineConfig, EngineError, EngineId};
use crate::domain::context::{worker_getter, Context, Getter};
use crate::domain::events::{EngineEvent, ExitKind};
use crate::domain::graph;
use crate::domain::manifold::{Manifold, ManifoldName, Manifolds};
use crate::domain::report::{EngineReport, EngineState, ManifoldReport, ManifoldState};
use crate::domain::worker::{Worker, WorkerError};
use crate::infrastructure::event_bus::{EventBus, EventReceiver};
use crate::infrastructure::task_worker::panic_message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Install {
        batch: Manifolds,
        reply: Reply<Result<(), EngineError>>,
    },
    Uninstall {
        name: ManifoldName,
        reply: Reply<Result<(), EngineError>>,
    },
    Report {
        reply: Reply<EngineReport>,
    },
    /// A start attempt finished. `None` means it was aborted.
    Started {
        name: ManifoldName,
        id: u64,
        result: Option<Result<Arc<dyn Worker>, WorkerError>>,
    },
    Stopped {
        name: ManifoldName,
        id: u64,
        result: Result<(), WorkerError>,
    },
    RetryDue {
        name: ManifoldName,
        id: u64,
    },
}

#[derive(Clone)]
struct Outcome {
    report: EngineReport,
    result: Result<(), EngineError>,
}

/// Handle onto a running dependency engine.
///
/// Dropping every handle does not stop the engine; call [`Engine::kill`].
#[derive(Clone)]
pub struct Engine {
    id: EngineId,
    commands: mpsc::UnboundedSender<Command>,
    dying: CancellationToken,
    done: watch::Receiver<Option<Outcome>>,
    events: EventBus,
}

impl Engine {
    /// Validate `config` and spawn the control loop on the current tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let id = EngineId::new();
        let (commands, receiver) = mpsc::unbounded_channel();
        let dying = CancellationToken::new();
        let (done_tx, done) = watch::channel(None);
        let events = EventBus::new(config.event_capacity);

        let control = ControlLoop {
            id,
            config,
            commands: receiver,
            sender: commands.clone(),
            dying: dying.clone(),
            events: events.clone(),
            done: done_tx,
            slots: BTreeMap::new(),
            pending_stops: BTreeSet::new(),
            shutting_down: false,
            fatal: None,
            next_id: 0,
        };
        tokio::spawn(control.run());

        Ok(Self {
            id,
            commands,
            dying,
            done,
            events,
        })
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Install a single manifold. Its inputs must already be installed.
    pub async fn install(&self, name: impl Into<ManifoldName>, manifold: Manifold) -> Result<(), EngineError> {
        let mut batch = Manifolds::new();
        batch.insert(name.into(), manifold);
        self.install_all(batch).await
    }

    /// Install a batch atomically, in dependency order.
    ///
    /// Members of the batch may refer to each other regardless of map order.
    /// If any member is rejected, nothing is installed.
    pub async fn install_all(&self, batch: Manifolds) -> Result<(), EngineError> {
        self.request(|reply| Command::Install { batch, reply }).await?
    }

    /// Stop a manifold's dependents, then the manifold, then forget it.
    ///
    /// Resolves once the manifold has been removed.
    pub async fn uninstall(&self, name: impl Into<ManifoldName>) -> Result<(), EngineError> {
        let name = name.into();
        self.request(|reply| Command::Uninstall { name, reply }).await?
    }

    /// Snapshot of every manifold's state.
    ///
    /// After the engine has stopped this is the final snapshot taken as the
    /// control loop exited.
    pub async fn report(&self) -> Result<EngineReport, EngineError> {
        match self.request(|reply| Command::Report { reply }).await {
            Ok(report) => Ok(report),
            Err(_) => self.outcome().await.map(|outcome| outcome.report),
        }
    }

    /// Begin shutdown. Returns immediately; use [`Engine::wait`] to join.
    pub fn kill(&self) {
        self.dying.cancel();
    }

    /// Wait until every worker has exited.
    ///
    /// Returns [`EngineError::Fatal`] if a fatal worker error stopped the engine.
    pub async fn wait(&self) -> Result<(), EngineError> {
        self.outcome().await?.result
    }

    /// Receive every [`EngineEvent`] published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| EngineError::EngineStopped)?;
        response.await.map_err(|_| EngineError::EngineStopped)
    }

    async fn outcome(&self) -> Result<Outcome, EngineError> {
        let mut done = self.done.clone();
        let outcome = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| EngineError::EngineStopped)?
            .clone();
        outcome.ok_or(EngineError::EngineStopped)
    }
}

#[async_trait]
impl Worker for Engine {
    fn kill(&self) {
        Engine::kill(self);
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        Engine::wait(self).await.map_err(|err| match err {
            EngineError::Fatal { error, .. } => error,
            other => WorkerError::failed(other),
        })
    }
}

struct Attempt {
    id: u64,
    abort: CancellationToken,
}

struct Running {
    id: u64,
    worker: Arc<dyn Worker>,
    started_at: DateTime<Utc>,
    since: Instant,
}

struct Slot {
    manifold: Manifold,
    attempt: Option<Attempt>,
    worker: Option<Running>,
    /// Set once the engine has asked the current worker or attempt to stop.
    stopping: bool,
    /// Not restarted until one of the inputs changes.
    parked: bool,
    /// Id of the pending backoff or bounce timer.
    retry: Option<u64>,
    failures: u32,
    last_error: Option<String>,
    start_count: u64,
    remove: bool,
    removals: Vec<Reply<Result<(), EngineError>>>,
}

impl Slot {
    fn new(manifold: Manifold) -> Self {
        Self {
            manifold,
            attempt: None,
            worker: None,
            stopping: false,
            parked: false,
            retry: None,
            failures: 0,
            last_error: None,
            start_count: 0,
            remove: false,
            removals: Vec::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some() || self.attempt.is_some()
    }
}

/// What to do once a worker's exit has been recorded.
enum FollowUp {
    Nothing,
    Retry(Duration),
    Shutdown(String),
}

struct ControlLoop {
    id: EngineId,
    config: EngineConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    sender: mpsc::UnboundedSender<Command>,
    dying: CancellationToken,
    events: EventBus,
    done: watch::Sender<Option<Outcome>>,
    slots: BTreeMap<ManifoldName, Slot>,
    pending_stops: BTreeSet<ManifoldName>,
    shutting_down: bool,
    fatal: Option<EngineError>,
    next_id: u64,
}

impl ControlLoop {
    async fn run(mut self) {
        info!(engine_id = %self.id, "Engine started");
        loop {
            if self.shutting_down && self.is_idle() {
                break;
            }
            tokio::select! {
                _ = self.dying.cancelled(), if !self.shutting_down => {
                    self.begin_shutdown(None);
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
            self.evaluate();
        }
        self.finish();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Install { batch, reply } => {
                let _ = reply.send(self.install(batch));
            }
            Command::Uninstall { name, reply } => self.uninstall(name, reply),
            Command::Report { reply } => {
                let _ = reply.send(self.report());
            }
            Command::Started { name, id, result } => self.on_started(name, id, result),
            Command::Stopped { name, id, result } => self.on_stopped(name, id, result),
            Command::RetryDue { name, id } => {
                if let Some(slot) = self.slots.get_mut(&name) {
                    if slot.retry == Some(id) {
                        slot.retry = None;
                    }
                }
            }
        }
    }

    fn install(&mut self, mut batch: Manifolds) -> Result<(), EngineError> {
        if self.shutting_down {
            return Err(EngineError::EngineStopped);
        }
        let installed: HashSet<ManifoldName> = self.slots.keys().cloned().collect();
        let order = graph::install_order(&installed, &batch)?;
        graph::check_acyclic(
            self.slots
                .iter()
                .map(|(name, slot)| (name, &slot.manifold))
                .chain(batch.iter()),
        )?;

        let now = Utc::now();
        for name in &order {
            if let Some(manifold) = batch.remove(name) {
                info!(manifold = %name, inputs = ?manifold.inputs, "Installed manifold");
                self.slots.insert(name.clone(), Slot::new(manifold));
                self.events.publish(EngineEvent::ManifoldInstalled {
                    manifold: name.clone(),
                    installed_at: now,
                });
            }
        }
        for name in &order {
            self.unpark_dependents(name);
        }
        Ok(())
    }

    fn uninstall(&mut self, name: ManifoldName, reply: Reply<Result<(), EngineError>>) {
        if self.shutting_down {
            let _ = reply.send(Err(EngineError::EngineStopped));
            return;
        }
        let dependents = self.dependents_of(&name);
        let Some(slot) = self.slots.get_mut(&name) else {
            let _ = reply.send(Err(EngineError::UnknownManifold(name)));
            return;
        };
        info!(manifold = %name, "Uninstalling manifold");
        slot.remove = true;
        slot.retry = None;
        slot.removals.push(reply);
        self.pending_stops.extend(dependents);
        self.pending_stops.insert(name);
    }

    fn begin_shutdown(&mut self, reason: Option<String>) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        self.dying.cancel();
        match &reason {
            Some(reason) => warn!(engine_id = %self.id, reason = %reason, "Engine stopping"),
            None => info!(engine_id = %self.id, "Engine stopping"),
        }
        self.events.publish(EngineEvent::EngineStopping { reason });
        self.pending_stops.extend(self.slots.keys().cloned());
    }

    /// Apply every transition the current state allows.
    fn evaluate(&mut self) {
        self.process_stops();
        self.process_removals();
        if self.shutting_down {
            return;
        }
        let startable: Vec<ManifoldName> = self
            .slots
            .iter()
            .filter(|(name, slot)| self.is_startable(name, slot))
            .map(|(name, _)| name.clone())
            .collect();
        for name in startable {
            self.start(&name);
        }
    }

    fn process_stops(&mut self) {
        let pending: Vec<ManifoldName> = self.pending_stops.iter().cloned().collect();
        for name in pending {
            if !self.slots.get(&name).is_some_and(Slot::is_active) {
                self.pending_stops.remove(&name);
                continue;
            }
            if self.has_active_dependent(&name) {
                continue;
            }
            self.pending_stops.remove(&name);
            self.request_stop(&name);
        }
    }

    fn process_removals(&mut self) {
        let removable: Vec<ManifoldName> = self
            .slots
            .iter()
            .filter(|(name, slot)| slot.remove && !slot.is_active() && !self.has_active_dependent(name))
            .map(|(name, _)| name.clone())
            .collect();
        for name in removable {
            let Some(slot) = self.slots.remove(&name) else {
                continue;
            };
            self.pending_stops.remove(&name);
            info!(manifold = %name, "Uninstalled manifold");
            self.events.publish(EngineEvent::ManifoldUninstalled {
                manifold: name.clone(),
                uninstalled_at: Utc::now(),
            });
            for reply in slot.removals {
                let _ = reply.send(Ok(()));
            }
            self.unpark_dependents(&name);
        }
    }

    fn request_stop(&mut self, name: &ManifoldName) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        if let Some(running) = &slot.worker {
            if !slot.stopping {
                info!(manifold = %name, "Stopping worker");
                self.events.publish(EngineEvent::StopRequested { manifold: name.clone() });
            }
            slot.stopping = true;
            running.worker.kill();
        } else if let Some(attempt) = &slot.attempt {
            debug!(manifold = %name, "Aborting start attempt");
            slot.stopping = true;
            attempt.abort.cancel();
        }
    }

    fn start(&mut self, name: &ManifoldName) {
        let inputs: HashMap<ManifoldName, Option<Getter>> = match self.slots.get(name) {
            Some(slot) => slot
                .manifold
                .inputs
                .iter()
                .map(|input| (input.clone(), self.getter_for(input)))
                .collect(),
            None => return,
        };
        let id = self.next_id();
        let abort = self.dying.child_token();
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        slot.attempt = Some(Attempt {
            id,
            abort: abort.clone(),
        });
        let attempt = slot.start_count + 1;
        let start = slot.manifold.start.clone();

        info!(manifold = %name, attempt, "Starting worker");
        self.events.publish(EngineEvent::WorkerStarting {
            manifold: name.clone(),
            attempt,
        });

        let expired = Arc::new(AtomicBool::new(false));
        let ctx = Context::new(name.clone(), inputs, expired.clone(), abort.clone());
        let sender = self.sender.clone();
        let name = name.clone();
        tokio::spawn(async move {
            let starting = AssertUnwindSafe(async move { start(ctx).await }).catch_unwind();
            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                result = starting => Some(result.unwrap_or_else(|panic| {
                    Err(WorkerError::msg(format!("start function panicked: {}", panic_message(panic.as_ref()))))
                })),
            };
            expired.store(true, Ordering::Release);
            let _ = sender.send(Command::Started { name, id, result });
        });
    }

    fn on_started(&mut self, name: ManifoldName, id: u64, result: Option<Result<Arc<dyn Worker>, WorkerError>>) {
        let current = self
            .slots
            .get(&name)
            .and_then(|slot| slot.attempt.as_ref())
            .is_some_and(|attempt| attempt.id == id);
        if !current {
            if let Some(Ok(worker)) = result {
                warn!(manifold = %name, "Killing worker from a superseded start attempt");
                worker.kill();
            }
            return;
        }
        let shutting_down = self.shutting_down;
        let Some(slot) = self.slots.get_mut(&name) else {
            return;
        };
        slot.attempt = None;

        match result {
            None => self.on_exit(&name, Ok(()), None),
            Some(Err(err)) => self.on_exit(&name, Err(err), None),
            Some(Ok(worker)) => {
                slot.start_count += 1;
                let started_at = Utc::now();
                slot.worker = Some(Running {
                    id,
                    worker: worker.clone(),
                    started_at,
                    since: Instant::now(),
                });
                let start_count = slot.start_count;
                let unwanted = slot.stopping || shutting_down;
                if unwanted {
                    slot.stopping = true;
                    worker.kill();
                }
                self.watch_worker(name.clone(), id, worker);

                if !unwanted {
                    info!(manifold = %name, start_count, "Worker started");
                    self.events.publish(EngineEvent::WorkerStarted {
                        manifold: name.clone(),
                        start_count,
                        started_at,
                    });
                    self.input_changed(&name);
                }
            }
        }
    }

    fn watch_worker(&self, name: ManifoldName, id: u64, worker: Arc<dyn Worker>) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(worker.wait())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(WorkerError::msg(format!("worker panicked: {}", panic_message(panic.as_ref()))))
                });
            let _ = sender.send(Command::Stopped { name, id, result });
        });
    }

    fn on_stopped(&mut self, name: ManifoldName, id: u64, result: Result<(), WorkerError>) {
        let Some(slot) = self.slots.get_mut(&name) else {
            return;
        };
        let Some(running) = slot.worker.take_if(|running| running.id == id) else {
            return;
        };
        self.on_exit(&name, result, Some(running.since.elapsed()));
    }

    /// Record how a worker or start attempt ended and schedule what follows.
    fn on_exit(&mut self, name: &ManifoldName, outcome: Result<(), WorkerError>, uptime: Option<Duration>) {
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        let requested = std::mem::take(&mut slot.stopping) || self.shutting_down;
        let outcome = match (outcome, slot.manifold.filter.as_ref()) {
            (Err(err), Some(filter)) => Err(filter(err)),
            (outcome, _) => outcome,
        };

        let mut follow_up = FollowUp::Nothing;
        if let Err(err) = &outcome {
            if self.config.is_fatal(err) {
                warn!(manifold = %name, error = %err, "Fatal worker error, stopping engine");
                slot.last_error = Some(err.to_string());
                if self.fatal.is_none() {
                    self.fatal = Some(EngineError::Fatal {
                        manifold: name.clone(),
                        error: err.clone(),
                    });
                }
                follow_up = FollowUp::Shutdown(format!("fatal error in \"{name}\": {err}"));
            }
        }

        let exit = match &outcome {
            Err(WorkerError::Uninstall) => {
                info!(manifold = %name, "Worker asked to be uninstalled");
                slot.remove = true;
                slot.retry = None;
                ExitKind::Uninstalled
            }
            _ if requested => {
                match &outcome {
                    Err(err) => info!(manifold = %name, error = %err, "Worker stopped"),
                    Ok(()) => info!(manifold = %name, "Worker stopped"),
                }
                ExitKind::Requested
            }
            Ok(()) => {
                info!(manifold = %name, "Worker exited cleanly, parked until an input changes");
                slot.parked = true;
                slot.failures = 0;
                slot.last_error = None;
                ExitKind::Clean
            }
            Err(WorkerError::NotYetAvailable) => {
                debug!(manifold = %name, "Dependency not available, parked until an input changes");
                slot.parked = true;
                ExitKind::Missing
            }
            Err(WorkerError::Bounce) => {
                info!(manifold = %name, "Worker bounced, restarting");
                slot.failures = 0;
                if !self.config.bounce_delay.is_zero() {
                    follow_up = FollowUp::Retry(self.config.bounce_delay);
                }
                ExitKind::Bounced
            }
            Err(err) => {
                if uptime.is_some_and(|uptime| uptime >= self.config.backoff.reset_after()) {
                    slot.failures = 0;
                }
                slot.failures = slot.failures.saturating_add(1);
                slot.last_error = Some(err.to_string());
                if matches!(follow_up, FollowUp::Nothing) {
                    let delay = self.config.backoff.delay(slot.failures);
                    error!(
                        manifold = %name,
                        error = %err,
                        failures = slot.failures,
                        "Worker failed, restarting in {}",
                        humantime::format_duration(delay)
                    );
                    follow_up = FollowUp::Retry(delay);
                }
                ExitKind::Failed
            }
        };

        self.events.publish(EngineEvent::WorkerStopped {
            manifold: name.clone(),
            exit,
            error: outcome.err().map(|err| err.to_string()),
            stopped_at: Utc::now(),
        });

        match follow_up {
            FollowUp::Nothing => {}
            FollowUp::Retry(delay) => self.schedule_retry(name, delay),
            FollowUp::Shutdown(reason) => self.begin_shutdown(Some(reason)),
        }
        self.input_changed(name);
    }

    fn schedule_retry(&mut self, name: &ManifoldName, delay: Duration) {
        if self.shutting_down {
            return;
        }
        let id = self.next_id();
        let Some(slot) = self.slots.get_mut(name) else {
            return;
        };
        slot.retry = Some(id);
        self.events.publish(EngineEvent::RestartScheduled {
            manifold: name.clone(),
            delay,
        });

        let dying = self.dying.clone();
        let sender = self.sender.clone();
        let name = name.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = dying.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = sender.send(Command::RetryDue { name, id });
                }
            }
        });
    }

    /// `name` started or stopped: wake direct dependents and stop every
    /// dependent still running against the old state.
    fn input_changed(&mut self, name: &ManifoldName) {
        self.unpark_dependents(name);
        let stale: Vec<ManifoldName> = self
            .dependents_of(name)
            .into_iter()
            .filter(|dependent| self.slots.get(dependent).is_some_and(Slot::is_active))
            .collect();
        self.pending_stops.extend(stale);
    }

    fn unpark_dependents(&mut self, name: &ManifoldName) {
        for slot in self.slots.values_mut() {
            if slot.manifold.depends_on(name.as_str()) {
                slot.parked = false;
            }
        }
    }

    fn dependents_of(&self, name: &ManifoldName) -> BTreeSet<ManifoldName> {
        graph::transitive_dependents(name, self.slots.iter().map(|(name, slot)| (name, &slot.manifold)))
    }

    fn has_active_dependent(&self, name: &ManifoldName) -> bool {
        self.slots
            .values()
            .any(|slot| slot.manifold.depends_on(name.as_str()) && slot.is_active())
    }

    fn is_started(&self, name: &ManifoldName) -> bool {
        self.slots.get(name).is_some_and(|slot| {
            slot.worker.is_some() && !slot.stopping && !slot.remove && !self.pending_stops.contains(name)
        })
    }

    fn is_startable(&self, name: &ManifoldName, slot: &Slot) -> bool {
        !slot.remove
            && !slot.is_active()
            && !slot.parked
            && slot.retry.is_none()
            && !self.pending_stops.contains(name)
            && slot.manifold.inputs.iter().all(|input| self.is_started(input))
    }

    fn getter_for(&self, input: &ManifoldName) -> Option<Getter> {
        if !self.is_started(input) {
            return None;
        }
        let slot = self.slots.get(input)?;
        let running = slot.worker.as_ref()?;
        Some(worker_getter(running.worker.clone(), slot.manifold.output.clone()))
    }

    fn is_idle(&self) -> bool {
        !self.slots.values().any(Slot::is_active)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn report(&self) -> EngineReport {
        let state = match (self.shutting_down, self.is_idle()) {
            (false, _) => EngineState::Started,
            (true, false) => EngineState::Stopping,
            (true, true) => EngineState::Stopped,
        };
        let manifolds = self
            .slots
            .iter()
            .map(|(name, slot)| {
                let is_input = self.slots.values().any(|other| other.manifold.depends_on(name.as_str()));
                (name.clone(), self.manifold_report(name, slot, is_input))
            })
            .collect();
        EngineReport {
            engine_id: self.id,
            state,
            error: self.fatal.as_ref().map(ToString::to_string),
            manifolds,
            generated_at: Utc::now(),
        }
    }

    fn manifold_report(&self, name: &ManifoldName, slot: &Slot, is_input: bool) -> ManifoldReport {
        // Queued stops wait on their own dependents but no longer count as started
        let stopping = slot.stopping || slot.remove || self.pending_stops.contains(name);
        let state = if slot.attempt.is_some() {
            ManifoldState::Starting
        } else if slot.worker.is_some() && stopping {
            ManifoldState::Stopping
        } else if slot.worker.is_some() {
            ManifoldState::Started
        } else if self.shutting_down {
            ManifoldState::Terminated
        } else if slot.retry.is_some() && slot.failures > 0 {
            ManifoldState::Failed
        } else {
            ManifoldState::Stopped
        };
        ManifoldReport {
            state,
            inputs: slot.manifold.inputs.clone(),
            is_input,
            error: slot.last_error.clone(),
            start_count: slot.start_count,
            consecutive_failures: slot.failures,
            started_at: slot.worker.as_ref().map(|running| running.started_at),
            worker: slot.worker.as_ref().and_then(|running| running.worker.report()),
        }
    }

    fn finish(mut self) {
        let report = self.report();
        let result = match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        };

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Install { reply, .. } | Command::Uninstall { reply, .. } => {
                    let _ = reply.send(Err(EngineError::EngineStopped));
                }
                Command::Report { reply } => {
                    let _ = reply.send(report.clone());
                }
                Command::Started { result: Some(Ok(worker)), .. } => worker.kill(),
                Command::Started { .. } | Command::Stopped { .. } | Command::RetryDue { .. } => {}
            }
        }
        for slot in self.slots.values_mut() {
            for reply in slot.removals.drain(..) {
                let _ = reply.send(Err(EngineError::EngineStopped));
            }
        }

        info!(engine_id = %self.id, "Engine stopped");
        self.events.publish(EngineEvent::EngineStopped { stopped_at: Utc::now() });
        let _ = self.done.send(Some(Outcome { report, result }));
    }
}
