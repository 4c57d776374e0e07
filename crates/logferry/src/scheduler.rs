// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The scheduler owns every module, its queue and the event store, and runs
//! the single dispatch loop.
//!
//! Handlers run synchronously on the loop. Other tasks talk to the scheduler
//! only through a [`SchedulerHandle`], whose commands are applied between two
//! dispatches.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::snapshot;
use crate::cache::ConfigCache;
use crate::constants::{
    DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_QUEUE_SIZE, LOGQUEUE_SUFFIX, YIELD_EVERY,
};
use crate::errors::{BuildError, TransitionError};
use crate::event::{Event, EventId, EventQueue, EventType, JobId, Next};
use crate::flow::{self, FlowGate, FlowLink};
use crate::module::{
    CounterSnapshot, Lifecycle, Module, ModuleContext, ModuleCounters, ModuleId, ModuleKind,
    Status,
};
use crate::poll::{NoopBridge, PollBridge};
use crate::queue::{EntryId, LogQueue};
use crate::record::LogRecord;
use crate::route::{Route, RouteSpec};

pub(crate) struct ModuleState {
    pub(crate) name: String,
    pub(crate) kind: ModuleKind,
    pub(crate) status: Status,
    pub(crate) priority: u32,
    pub(crate) queue: LogQueue,
    pub(crate) job: Option<JobId>,
    pub(crate) gate: FlowGate,
    pub(crate) downstream: Vec<FlowLink>,
    pub(crate) upstream: Vec<ModuleId>,
    pub(crate) counters: Arc<ModuleCounters>,
    /// Job event types retracted by `pause`, re-posted by `resume`.
    parked: Vec<EventType>,
    failures: u32,
}

/// Queue size, status and counters of one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOverview {
    pub name: String,
    pub kind: ModuleKind,
    pub status: Status,
    pub queue_len: usize,
    pub counters: CounterSnapshot,
}

/// Everything handlers may touch through a [`ModuleContext`].
pub struct SchedulerState {
    pub(crate) modules: Vec<ModuleState>,
    pub(crate) routes: Vec<Route>,
    pub(crate) events: EventQueue,
    pub(crate) cache: Arc<ConfigCache>,
    pub(crate) poll: Box<dyn PollBridge>,
    pub(crate) tick: Instant,
}

impl SchedulerState {
    pub(crate) fn module(&self, id: ModuleId) -> &ModuleState {
        &self.modules[id.index()]
    }

    fn module_mut(&mut self, id: ModuleId) -> &mut ModuleState {
        &mut self.modules[id.index()]
    }

    fn links(&self, id: ModuleId) -> impl Iterator<Item = (&FlowLink, usize)> + '_ {
        self.module(id)
            .downstream
            .iter()
            .map(|link| (link, self.module(link.to).queue.len()))
    }

    pub(crate) fn can_send(&self, id: ModuleId, multiplier: f64) -> bool {
        flow::can_send(self.links(id), multiplier)
    }

    pub(crate) fn may_send(&mut self, id: ModuleId) -> bool {
        let mut gate = self.module(id).gate;
        let was_blocked = gate.is_blocked();
        let open = gate.evaluate(self.links(id));
        if was_blocked != gate.is_blocked() {
            debug!(
                "SCHEDULER | module '{}' {}",
                self.module(id).name,
                if open { "unblocked" } else { "blocked by downstream" }
            );
        }
        self.module_mut(id).gate = gate;
        open
    }

    pub(crate) fn forward(&mut self, from: ModuleId, record: LogRecord) {
        let targets: Vec<ModuleId> = self.module(from).downstream.iter().map(|l| l.to).collect();
        let Some((last, rest)) = targets.split_last() else {
            self.module(from).counters.add_dropped(1);
            return;
        };
        for to in rest {
            self.deliver(*to, record.clone());
        }
        self.deliver(*last, record);
        self.module(from).counters.add_forwarded(1);
    }

    fn deliver(&mut self, to: ModuleId, record: LogRecord) {
        let target = self.module_mut(to);
        target.queue.push(record);
        target.counters.add_received(1);
        if target.status.is_active() {
            self.post_once(to, EventType::DataAvailable, None);
        }
    }

    pub(crate) fn pop(&mut self, id: ModuleId, entry: EntryId) -> LogRecord {
        let record = self.module_mut(id).queue.pop(entry);
        self.notify_upstream(id);
        record
    }

    /// Wakes producers feeding `id` whose gate would now reopen.
    fn notify_upstream(&mut self, id: ModuleId) {
        let upstream = self.module(id).upstream.clone();
        for producer in upstream {
            let state = self.module(producer);
            if state.status != Status::Running || !state.gate.is_blocked() {
                continue;
            }
            if state.gate.would_open(self.links(producer)) {
                self.post_once(producer, EventType::Unblocked, None);
            }
        }
    }

    fn event(&self, id: ModuleId, kind: EventType, delay: Option<Duration>) -> Event {
        let event = match delay {
            Some(delay) => Event::delayed(kind, id, self.tick + delay),
            None => Event::immediate(kind, id, self.tick),
        };
        event.with_priority(self.module(id).priority)
    }

    pub(crate) fn post(&mut self, id: ModuleId, kind: EventType, delay: Option<Duration>) -> EventId {
        let event = self.event(id, kind, delay);
        self.events.schedule(event)
    }

    pub(crate) fn post_job(
        &mut self,
        id: ModuleId,
        kind: EventType,
        delay: Option<Duration>,
    ) -> EventId {
        let mut event = self.event(id, kind, delay);
        if let Some(job) = self.module(id).job {
            event = event.with_job(job);
        }
        self.events.schedule_deduped(event)
    }

    pub(crate) fn post_once(
        &mut self,
        id: ModuleId,
        kind: EventType,
        delay: Option<Duration>,
    ) -> Option<EventId> {
        if self.events.find(id, kind).is_some() {
            return None;
        }
        Some(self.post(id, kind, delay))
    }

    pub(crate) fn overview(&self) -> Vec<ModuleOverview> {
        self.modules
            .iter()
            .map(|module| ModuleOverview {
                name: module.name.clone(),
                kind: module.kind,
                status: module.status,
                queue_len: module.queue.len(),
                counters: module.counters.snapshot(),
            })
            .collect()
    }
}

/// Requests applied by the scheduler loop on behalf of other tasks.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Readiness reported for a module's source.
    Notify { module: ModuleId, kind: EventType },
    Start(ModuleId),
    Stop(ModuleId),
    Pause(ModuleId),
    Resume(ModuleId),
    /// Leave the loop, stopping and shutting down every module.
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<SchedulerCommand>) -> Self {
        Self { tx }
    }

    pub fn notify(
        &self,
        module: ModuleId,
        kind: EventType,
    ) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Notify { module, kind })
    }

    pub fn start(&self, module: ModuleId) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Start(module))
    }

    pub fn stop(&self, module: ModuleId) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Stop(module))
    }

    pub fn pause(&self, module: ModuleId) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Pause(module))
    }

    pub fn resume(&self, module: ModuleId) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Resume(module))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.tx.send(SchedulerCommand::Shutdown)
    }
}

/// Restart delay after consecutive failures: `initial * 2^(failures-1)`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_BACKOFF,
            max: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl Backoff {
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exponent).min(self.max)
    }
}

/// Outcome of one [`Scheduler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dispatched,
    /// Nothing is ready before this instant.
    Sleep(Instant),
    Idle,
}

pub struct Scheduler {
    state: SchedulerState,
    handlers: Vec<Box<dyn Module>>,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    handle: SchedulerHandle,
    backoff: Backoff,
    queue_dir: Option<PathBuf>,
    shutdown_requested: bool,
}

impl Scheduler {
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Initializes every module that was not initialized yet.
    pub fn init_all(&mut self) {
        for id in self.ids() {
            if self.state.module(id).status == Status::Uninitialized {
                log_rejected(self.init(id));
            }
        }
    }

    /// Starts every STOPPED module.
    pub fn start_all(&mut self) {
        for id in self.ids() {
            if self.state.module(id).status == Status::Stopped {
                log_rejected(self.start(id));
            }
        }
    }

    /// Stops every running or paused module, producers first.
    pub fn stop_all(&mut self) {
        for id in self.ids_producers_first() {
            if self.state.module(id).status.is_active() {
                log_rejected(self.stop(id));
            }
        }
    }

    /// Stops and shuts down every module, then saves the config cache.
    pub fn shutdown_all(&mut self) {
        self.stop_all();
        for id in self.ids() {
            if matches!(
                self.state.module(id).status,
                Status::Stopped | Status::Uninitialized
            ) {
                log_rejected(self.shutdown(id));
            }
        }
        if let Err(e) = self.state.cache.save() {
            error!("SCHEDULER | failed to save config cache: {e}");
        }
        info!("SCHEDULER | all modules shut down");
    }

    pub fn init(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        let next = self.transition(id, Lifecycle::Init)?;
        self.restore_queue(id);
        match self.call(id, |module, ctx| module.init(ctx)) {
            Ok(()) => {
                self.state.module_mut(id).status = next;
                debug!("SCHEDULER | module '{}' initialized", self.name(id));
            }
            Err(err) => {
                self.state.module(id).counters.add_error();
                error!("SCHEDULER | module '{}' failed to initialize: {err:#}", self.name(id));
            }
        }
        Ok(())
    }

    pub fn start(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        let next = self.transition(id, Lifecycle::Start)?;
        self.state
            .events
            .cancel_where(id, |event| event.kind() == EventType::Restart);
        let module = self.state.module_mut(id);
        module.status = next;
        module.parked.clear();
        self.state.tick = Instant::now();
        match self.call(id, |module, ctx| module.start(ctx)) {
            Ok(()) => {
                if !self.state.module(id).queue.is_empty() {
                    self.state.post_once(id, EventType::DataAvailable, None);
                }
                info!("SCHEDULER | module '{}' started", self.name(id));
            }
            Err(err) => self.fail(id, &err),
        }
        Ok(())
    }

    /// Stops a module. Every event it owns is retracted before this returns.
    pub fn stop(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        self.transition(id, Lifecycle::Stop)?;
        if let Err(err) = self.halt(id) {
            self.state.module(id).counters.add_error();
            error!("SCHEDULER | module '{}' failed to stop cleanly: {err:#}", self.name(id));
        }
        self.state.module_mut(id).failures = 0;
        info!("SCHEDULER | module '{}' stopped", self.name(id));
        Ok(())
    }

    /// Pauses a module's pollable I/O: readiness events, events of its job
    /// and pending wake-ups. Queued records stay where they are.
    pub fn pause(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        let next = self.transition(id, Lifecycle::Pause)?;
        let retracted = self.state.events.cancel_where(id, is_paused_activity);
        for event in &retracted {
            self.park(id, event);
        }
        self.state.poll.deregister(id);
        self.state.module_mut(id).status = next;
        if let Err(err) = self.call(id, |module, ctx| module.pause(ctx)) {
            self.fail(id, &err);
        } else {
            debug!("SCHEDULER | module '{}' paused", self.name(id));
        }
        Ok(())
    }

    /// Re-posts the job events retracted by `pause` and wakes the module if
    /// downstream drained in the meantime.
    pub fn resume(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        let next = self.transition(id, Lifecycle::Resume)?;
        self.state.module_mut(id).status = next;
        self.state.tick = Instant::now();
        let parked = std::mem::take(&mut self.state.module_mut(id).parked);
        for kind in parked {
            self.state.post_job(id, kind, None);
        }
        let module = self.state.module(id);
        if module.gate.is_blocked() && module.gate.would_open(self.state.links(id)) {
            self.state.post_once(id, EventType::Unblocked, None);
        }
        if let Err(err) = self.call(id, |module, ctx| module.resume(ctx)) {
            self.fail(id, &err);
        } else {
            debug!("SCHEDULER | module '{}' resumed", self.name(id));
        }
        Ok(())
    }

    pub fn shutdown(&mut self, id: ModuleId) -> Result<(), TransitionError> {
        let next = self.transition(id, Lifecycle::Shutdown)?;
        if let Err(err) = self.call(id, |module, ctx| module.shutdown(ctx)) {
            self.state.module(id).counters.add_error();
            error!("SCHEDULER | module '{}' failed to shut down: {err:#}", self.name(id));
        }
        self.state.events.cancel_module(id);
        self.persist_queue(id);
        self.state.module_mut(id).status = next;
        Ok(())
    }

    /// Runs one ready event, if any.
    pub fn step(&mut self, now: Instant) -> Step {
        self.drain_commands();
        self.state.tick = now;
        match self.state.events.next_ready(now) {
            Next::Ready(event) => {
                self.dispatch(event);
                Step::Dispatched
            }
            Next::Sleep(at) => Step::Sleep(at),
            Next::Idle => Step::Idle,
        }
    }

    /// Dispatches until nothing is ready at the current time. Returns when
    /// the next delayed event is due.
    pub fn run_until_idle(&mut self) -> Option<Instant> {
        loop {
            match self.step(Instant::now()) {
                Step::Dispatched => {}
                Step::Sleep(at) => return Some(at),
                Step::Idle => return None,
            }
        }
    }

    /// Runs the dispatch loop until `cancel` fires or a shutdown command
    /// arrives, then shuts every module down.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "SCHEDULER | running {} modules on {} routes",
            self.state.modules.len(),
            self.state.routes.len()
        );
        let mut since_yield = 0;
        while !cancel.is_cancelled() {
            let step = self.step(Instant::now());
            if self.shutdown_requested {
                break;
            }
            let command = match step {
                Step::Dispatched => {
                    since_yield += 1;
                    if since_yield >= YIELD_EVERY {
                        since_yield = 0;
                        tokio::task::yield_now().await;
                    }
                    continue;
                }
                Step::Sleep(at) => {
                    since_yield = 0;
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep_until(at) => None,
                        command = self.rx.recv() => command,
                    }
                }
                Step::Idle => {
                    since_yield = 0;
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        command = self.rx.recv() => command,
                    }
                }
            };
            if let Some(command) = command {
                self.apply(command);
            }
        }
        debug!("SCHEDULER | loop finished");
        self.shutdown_all();
    }

    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.state
            .modules
            .iter()
            .position(|module| module.name == name)
            .map(ModuleId::new)
    }

    #[must_use]
    pub fn status(&self, id: ModuleId) -> Status {
        self.state.module(id).status
    }

    #[must_use]
    pub fn queue(&self, id: ModuleId) -> &LogQueue {
        &self.state.module(id).queue
    }

    #[must_use]
    pub fn queue_len(&self, id: ModuleId) -> usize {
        self.state.module(id).queue.len()
    }

    #[must_use]
    pub fn is_blocked(&self, id: ModuleId) -> bool {
        self.state.module(id).gate.is_blocked()
    }

    #[must_use]
    pub fn counters(&self, id: ModuleId) -> Arc<ModuleCounters> {
        Arc::clone(&self.state.module(id).counters)
    }

    #[must_use]
    pub fn pending_events(&self, id: ModuleId) -> usize {
        self.state.events.pending_for(id)
    }

    #[must_use]
    pub fn has_pending(&self, id: ModuleId, kind: EventType) -> bool {
        self.state.events.find(id, kind).is_some()
    }

    #[must_use]
    pub fn cache(&self) -> Arc<ConfigCache> {
        Arc::clone(&self.state.cache)
    }

    #[must_use]
    pub fn overview(&self) -> Vec<ModuleOverview> {
        self.state.overview()
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.state.routes
    }

    fn ids(&self) -> Vec<ModuleId> {
        (0..self.state.modules.len()).map(ModuleId::new).collect()
    }

    fn ids_producers_first(&self) -> Vec<ModuleId> {
        let rank = |kind: ModuleKind| match kind {
            ModuleKind::Input => 0,
            ModuleKind::Processor => 1,
            ModuleKind::Output => 2,
            ModuleKind::Extension => 3,
        };
        let mut ids = self.ids();
        ids.sort_by_key(|id| rank(self.state.module(*id).kind));
        ids
    }

    fn name(&self, id: ModuleId) -> &str {
        &self.state.module(id).name
    }

    fn transition(&self, id: ModuleId, operation: Lifecycle) -> Result<Status, TransitionError> {
        let module = self.state.module(id);
        module
            .status
            .apply(operation)
            .ok_or_else(|| TransitionError {
                module: module.name.clone(),
                operation: operation.name(),
                from: module.status,
            })
    }

    fn call<F>(&mut self, id: ModuleId, hook: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut dyn Module, &mut ModuleContext<'_>) -> anyhow::Result<()>,
    {
        let handler = &mut self.handlers[id.index()];
        let mut ctx = ModuleContext::new(id, &mut self.state);
        hook(handler.as_mut(), &mut ctx)
    }

    /// Retracts the module's events and sources, then runs its stop hook.
    fn halt(&mut self, id: ModuleId) -> anyhow::Result<()> {
        self.state.events.cancel_module(id);
        self.state.poll.deregister(id);
        let module = self.state.module_mut(id);
        module.status = Status::Stopped;
        module.parked.clear();
        let result = self.call(id, |module, ctx| module.stop(ctx));
        // the stop hook must not leave anything behind
        self.state.events.cancel_module(id);
        self.state.poll.deregister(id);
        result
    }

    /// Error boundary of every hook: the module is stopped and a restart is
    /// scheduled with backoff.
    fn fail(&mut self, id: ModuleId, err: &anyhow::Error) {
        self.state.module(id).counters.add_error();
        error!("SCHEDULER | module '{}' failed: {err:#}", self.name(id));
        if !self.state.module(id).status.is_active() {
            return;
        }
        if let Err(stop_err) = self.halt(id) {
            error!(
                "SCHEDULER | module '{}' failed to stop after error: {stop_err:#}",
                self.name(id)
            );
        }
        let module = self.state.module_mut(id);
        module.failures = module.failures.saturating_add(1);
        let (failures, priority) = (module.failures, module.priority);
        let delay = self.backoff.delay(failures);
        let restart = Event::delayed(EventType::Restart, id, self.state.tick + delay)
            .with_priority(priority);
        self.state.events.schedule(restart);
        warn!(
            "SCHEDULER | module '{}' will restart in {delay:?}",
            self.name(id)
        );
    }

    fn dispatch(&mut self, event: Event) {
        let id = event.module();
        let status = self.state.module(id).status;
        if event.kind() == EventType::Restart {
            if status == Status::Stopped {
                info!("SCHEDULER | restarting module '{}'", self.name(id));
                log_rejected(self.start(id));
            }
            return;
        }
        if !status.is_active() {
            debug!(
                "SCHEDULER | dropping {:?} for module '{}' while {status}",
                event.kind(),
                self.name(id)
            );
            return;
        }
        if status == Status::Paused && is_paused_activity(&event) {
            // posted by a hook while paused
            self.park(id, &event);
            return;
        }
        match self.call(id, |module, ctx| module.on_event(ctx, &event)) {
            Ok(()) => self.state.module_mut(id).failures = 0,
            Err(err) => self.fail(id, &err),
        }
    }

    /// Remembers a retracted job event so `resume` can re-post it.
    fn park(&mut self, id: ModuleId, event: &Event) {
        if event.job().is_none() || event.kind().is_io() {
            return;
        }
        let parked = &mut self.state.module_mut(id).parked;
        if !parked.contains(&event.kind()) {
            parked.push(event.kind());
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: SchedulerCommand) {
        debug!("SCHEDULER | applying {command:?}");
        let result = match command {
            SchedulerCommand::Notify { module, kind } => {
                if module.index() >= self.state.modules.len() {
                    warn!("SCHEDULER | notification for unknown module {module}");
                } else if self.state.module(module).status == Status::Running {
                    self.state.tick = Instant::now();
                    self.state.post_job(module, kind, None);
                }
                Ok(())
            }
            SchedulerCommand::Start(id) => self.start(id),
            SchedulerCommand::Stop(id) => self.stop(id),
            SchedulerCommand::Pause(id) => self.pause(id),
            SchedulerCommand::Resume(id) => self.resume(id),
            SchedulerCommand::Shutdown => {
                self.shutdown_requested = true;
                Ok(())
            }
        };
        log_rejected(result);
    }

    fn queue_path(&self, id: ModuleId) -> Option<PathBuf> {
        let dir = self.queue_dir.as_deref()?;
        Some(queue_file(dir, self.name(id)))
    }

    fn restore_queue(&mut self, id: ModuleId) {
        let Some(path) = self.queue_path(id) else {
            return;
        };
        if !path.exists() {
            return;
        }
        let records = snapshot::read(&path);
        let restored = records.len();
        let module = self.state.module_mut(id);
        for record in records {
            module.queue.push(record);
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("SCHEDULER | cannot remove {}: {e}", path.display());
        }
        info!(
            "SCHEDULER | restored {restored} queued records of module '{}'",
            self.name(id)
        );
    }

    fn persist_queue(&mut self, id: ModuleId) {
        let Some(path) = self.queue_path(id) else {
            return;
        };
        let records = self.state.module_mut(id).queue.drain_all();
        if records.is_empty() {
            return;
        }
        match snapshot::write(&path, records.iter()) {
            Ok(()) => info!(
                "SCHEDULER | saved {} queued records of module '{}'",
                records.len(),
                self.name(id)
            ),
            Err(e) => error!(
                "SCHEDULER | lost {} queued records of module '{}': {e}",
                records.len(),
                self.name(id)
            ),
        }
    }
}

/// Work a PAUSED module must not perform.
fn is_paused_activity(event: &Event) -> bool {
    event.kind().is_io() || event.job().is_some() || event.kind() == EventType::Unblocked
}

fn log_rejected(result: Result<(), TransitionError>) {
    if let Err(e) = result {
        warn!("SCHEDULER | {e}");
    }
}

fn queue_file(dir: &Path, module: &str) -> PathBuf {
    dir.join(format!("{module}.{LOGQUEUE_SUFFIX}"))
}

struct Registration {
    name: String,
    queue_size: usize,
    handler: Box<dyn Module>,
}

pub struct SchedulerBuilder {
    modules: Vec<Registration>,
    routes: Vec<RouteSpec>,
    cache: Option<Arc<ConfigCache>>,
    queue_dir: Option<PathBuf>,
    backoff: Backoff,
    poll: Option<Box<dyn PollBridge>>,
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    rx: mpsc::UnboundedReceiver<SchedulerCommand>,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            modules: Vec::new(),
            routes: Vec::new(),
            cache: None,
            queue_dir: None,
            backoff: Backoff::default(),
            poll: None,
            tx,
            rx,
        }
    }

    /// Handle of the scheduler being built, e.g. for a poll bridge.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::from_sender(self.tx.clone())
    }

    /// Registers a module. Ids are assigned in registration order.
    #[must_use]
    pub fn module(
        mut self,
        name: impl Into<String>,
        queue_size: Option<usize>,
        handler: Box<dyn Module>,
    ) -> Self {
        self.modules.push(Registration {
            name: name.into(),
            queue_size: queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            handler,
        });
        self
    }

    #[must_use]
    pub fn route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<ConfigCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Snapshots module queues into `dir` at shutdown and restores them at init.
    #[must_use]
    pub fn persist_queues(mut self, dir: impl Into<PathBuf>) -> Self {
        self.queue_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn poll_bridge(mut self, poll: Box<dyn PollBridge>) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        let mut names = HashMap::with_capacity(self.modules.len());
        for (index, registration) in self.modules.iter().enumerate() {
            if names
                .insert(registration.name.clone(), ModuleId::new(index))
                .is_some()
            {
                return Err(BuildError::DuplicateModule(registration.name.clone()));
            }
        }
        let kinds: Vec<ModuleKind> = self
            .modules
            .iter()
            .map(|registration| registration.handler.kind())
            .collect();
        let routes = self
            .routes
            .iter()
            .map(|spec| Route::resolve(spec, &names, &kinds))
            .collect::<Result<Vec<_>, _>>()?;

        let mut handlers = Vec::with_capacity(self.modules.len());
        let mut modules = Vec::with_capacity(self.modules.len());
        let sizes: Vec<usize> = self.modules.iter().map(|r| r.queue_size).collect();
        for (index, registration) in self.modules.into_iter().enumerate() {
            let id = ModuleId::new(index);
            let kind = kinds[index];
            modules.push(ModuleState {
                name: registration.name,
                kind,
                status: Status::Uninitialized,
                priority: 0,
                queue: LogQueue::new(registration.queue_size),
                job: kind.has_job().then(|| JobId::for_module(id)),
                gate: FlowGate::default(),
                downstream: Vec::new(),
                upstream: Vec::new(),
                counters: Arc::new(ModuleCounters::default()),
                parked: Vec::new(),
                failures: 0,
            });
            handlers.push(registration.handler);
        }

        for route in &routes {
            for id in &route.modules {
                let module = &mut modules[id.index()];
                module.priority = module.priority.max(route.priority);
            }
            for (from, to) in route.edges() {
                let producer = &mut modules[from.index()];
                if !producer.downstream.iter().any(|link| link.to == to) {
                    producer
                        .downstream
                        .push(FlowLink::new(to, &route.flow, sizes[to.index()]));
                }
                let consumer = &mut modules[to.index()];
                if !consumer.upstream.contains(&from) {
                    consumer.upstream.push(from);
                }
            }
        }
        for module in &modules {
            let routed = module.kind == ModuleKind::Extension
                || !module.downstream.is_empty()
                || !module.upstream.is_empty();
            if !routed {
                warn!("SCHEDULER | module '{}' is not part of any route", module.name);
            }
        }

        let handle = SchedulerHandle::from_sender(self.tx);
        Ok(Scheduler {
            state: SchedulerState {
                modules,
                routes,
                events: EventQueue::new(),
                cache: self
                    .cache
                    .unwrap_or_else(|| Arc::new(ConfigCache::in_memory())),
                poll: self.poll.unwrap_or_else(|| Box::new(NoopBridge)),
                tick: Instant::now(),
            },
            handlers,
            rx: self.rx,
            handle,
            backoff: self.backoff,
            queue_dir: self.queue_dir,
            shutdown_requested: false,
        })
    }
}
