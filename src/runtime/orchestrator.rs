// Copyright (c) 2026 Twincall
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Connection orchestrator: decides when the signaling connection is
//! up, from lifecycle events, push arrivals, alarm wakeups, network
//! changes and resource leases.
//!
//! Rules:
//! - In foreground the connection stays up; disconnects are suppressed.
//! - In background, without a VoIP lease or a pending message job, the
//!   connection is dropped after the configured delay.
//! - A push wakeup grants a bounded foreground grace, extended by VoIP
//!   leases or message jobs.
//! - An alarm wakeup probes for activity periodically and terminates
//!   early when idle.
//! - Reconnect alarms are long when push delivery works, short when it
//!   does not, and never below the configured floor.
//!
//! The monitor guards the whole state; it is never held across calls
//! into the collaborators.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::core::types::{now_ms, CoreConfig};
use crate::monitoring::metrics::Metrics;
use crate::runtime::executor::{ScheduledHandle, SerialExecutor};
use crate::runtime::jobs::{JobId, JobList, JobPriority};
use crate::runtime::ApplicationState;

/// Quiescence window before a power handle is released.
const LOCK_RELEASE_DELAY_MS: u64 = 1_000;

/// Delivery class of a push notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPriority {
    /// Time-critical (incoming call).
    High,
    /// Routine (message sync).
    Normal,
}

/// Persistent-scheduled alarm slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmId {
    /// Short-delay reconnect after a connection loss.
    Reconnect,
    /// Long-delay periodic check.
    Connect,
}

/// Resource leases mapped onto host power locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockKind {
    /// Keep the radio up.
    Network,
    /// Keep the CPU up.
    Processing,
    /// Keep the screen interactive.
    Interactive,
    /// A call is active.
    Voip,
}

/// Connection lifecycle commands issued by the orchestrator.
pub trait ContextControl: Send + Sync {
    /// Bring the signaling connection up.
    fn connect(&self);
    /// Drop the signaling connection.
    fn disconnect(&self);
    /// Shed everything (host memory pressure).
    fn suspend(&self);
}

/// Native alarm facility.
pub trait Scheduler: Send + Sync {
    /// Arm `id` to fire at `deadline` (ms since epoch).
    fn schedule_at(&self, id: AlarmId, deadline: u64);
    /// Disarm `id`.
    fn cancel(&self, id: AlarmId);
}

/// Host power-lock facility. Called on 0-to-1 and quiesced 1-to-0
/// transitions only.
pub trait PowerManager: Send + Sync {
    /// Acquire the underlying OS handle.
    fn acquire(&self, lock: LockKind);
    /// Release the underlying OS handle.
    fn release(&self, lock: LockKind);
}

/// Network reachability source.
pub trait ConnectivityService: Send + Sync {
    /// True when a usable network exists.
    fn is_connected_network(&self) -> bool;
}

struct LockState {
    count: u32,
    held: bool,
    release: Option<ScheduledHandle>,
}

struct State {
    app_state: ApplicationState,
    online: bool,
    push_available: bool,
    locks: BTreeMap<LockKind, LockState>,
    jobs: JobList,
    disconnect_handle: Option<ScheduledHandle>,
    grace_handle: Option<ScheduledHandle>,
    probe_handle: Option<ScheduledHandle>,
    alarm_deadline: u64,
}

/// Registration token handed to the host alarm entry point; firing it
/// drives the orchestrator without any global lookup.
#[derive(Clone)]
pub struct AlarmToken {
    inner: Weak<Orchestrator>,
}

impl AlarmToken {
    /// Route an alarm into the orchestrator (no-op after shutdown).
    pub fn fire(&self, id: AlarmId) {
        if let Some(orchestrator) = self.inner.upgrade() {
            orchestrator.on_alarm(id);
        }
    }
}

/// The process-wide connection policy engine.
pub struct Orchestrator {
    me: Weak<Orchestrator>,
    executor: SerialExecutor,
    control: Arc<dyn ContextControl>,
    scheduler: Arc<dyn Scheduler>,
    power: Arc<dyn PowerManager>,
    connectivity: Arc<dyn ConnectivityService>,
    metrics: Arc<Metrics>,
    config: CoreConfig,
    state: Mutex<State>,
}

impl Orchestrator {
    /// Build the orchestrator with its collaborator set.
    pub fn new(
        executor: SerialExecutor,
        control: Arc<dyn ContextControl>,
        scheduler: Arc<dyn Scheduler>,
        power: Arc<dyn PowerManager>,
        connectivity: Arc<dyn ConnectivityService>,
        metrics: Arc<Metrics>,
        config: CoreConfig,
    ) -> Arc<Self> {
        let online = connectivity.is_connected_network();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            executor,
            control,
            scheduler,
            power,
            connectivity,
            metrics,
            config,
            state: Mutex::new(State {
                app_state: ApplicationState::BackgroundIdle,
                online,
                push_available: false,
                locks: BTreeMap::new(),
                jobs: JobList::new(),
                disconnect_handle: None,
                grace_handle: None,
                probe_handle: None,
                alarm_deadline: 0,
            }),
        })
    }

    /// Token for the host alarm callback registration.
    pub fn alarm_token(&self) -> AlarmToken {
        AlarmToken {
            inner: self.me.clone(),
        }
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.me.upgrade()
    }

    /// Current application state.
    pub fn application_state(&self) -> ApplicationState {
        self.state.lock().unwrap().app_state
    }

    /// Live network reachability as reported by the host.
    pub fn network_available(&self) -> bool {
        self.connectivity.is_connected_network()
    }

    fn request_connect(&self) {
        self.metrics.orchestrator_connect_total.inc();
        self.control.connect();
    }

    fn request_disconnect(&self) {
        self.metrics.orchestrator_disconnect_total.inc();
        self.control.disconnect();
    }

    /// The application became visible.
    pub fn on_enter_foreground(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::Foreground;
            if let Some(handle) = state.disconnect_handle.take() {
                handle.cancel();
            }
            if let Some(handle) = state.grace_handle.take() {
                handle.cancel();
            }
        }
        self.scheduler.cancel(AlarmId::Reconnect);
        self.scheduler.cancel(AlarmId::Connect);
        info!("foreground: connecting");
        self.request_connect();
        self.reschedule();
    }

    /// The application left the screen.
    pub fn on_enter_background(&self) {
        let Some(svc) = self.strong() else {
            return;
        };
        let handle = self.executor.schedule(
            Duration::from_millis(self.config.background_disconnect_ms),
            move || svc.maybe_disconnect(),
        );
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::Background;
            if let Some(old) = state.disconnect_handle.replace(handle) {
                old.cancel();
            }
        }
        self.reschedule();
    }

    /// Drop the connection unless a VoIP lease or a pending message job
    /// keeps it alive; in that case check again after the same delay.
    fn maybe_disconnect(&self) {
        let busy = {
            let state = self.state.lock().unwrap();
            if state.app_state == ApplicationState::Foreground {
                return;
            }
            Self::voip_held(&state) || state.jobs.has_priority(JobPriority::Message)
        };
        if busy {
            let Some(svc) = self.strong() else {
                return;
            };
            let handle = self.executor.schedule(
                Duration::from_millis(self.config.background_disconnect_ms),
                move || svc.maybe_disconnect(),
            );
            let mut state = self.state.lock().unwrap();
            if let Some(old) = state.disconnect_handle.replace(handle) {
                old.cancel();
            }
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::BackgroundIdle;
            state.disconnect_handle = None;
        }
        debug!("background idle: disconnecting");
        self.request_disconnect();
        self.schedule_reconnect();
    }

    fn voip_held(state: &State) -> bool {
        state
            .locks
            .get(&LockKind::Voip)
            .map(|l| l.count > 0)
            .unwrap_or(false)
    }

    /// A push notification granted us a foreground service window.
    /// `sent_time` is the broker-side send timestamp; `delay_ms` the
    /// window the host granted (floored to the configured grace).
    pub fn start_foreground_service(
        &self,
        priority: PushPriority,
        sent_time: u64,
        delay_ms: u64,
    ) {
        let latency = now_ms().saturating_sub(sent_time);
        debug!(?priority, latency, "push wakeup");

        let grace = delay_ms.max(self.config.push_grace_ms);
        let Some(svc) = self.strong() else {
            return;
        };
        let handle = self
            .executor
            .schedule(Duration::from_millis(grace), move || svc.end_push_grace());
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::WakeupPush;
            state.push_available = true;
            if let Some(old) = state.grace_handle.replace(handle) {
                old.cancel();
            }
        }
        self.request_connect();
        self.reschedule();
    }

    fn end_push_grace(&self) {
        let busy = {
            let state = self.state.lock().unwrap();
            if state.app_state != ApplicationState::WakeupPush {
                return;
            }
            Self::voip_held(&state) || state.jobs.has_priority(JobPriority::Message)
        };
        if busy {
            let Some(svc) = self.strong() else {
                return;
            };
            let handle = self.executor.schedule(
                Duration::from_millis(self.config.push_grace_ms),
                move || svc.end_push_grace(),
            );
            let mut state = self.state.lock().unwrap();
            if let Some(old) = state.grace_handle.replace(handle) {
                old.cancel();
            }
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::BackgroundIdle;
            state.grace_handle = None;
        }
        debug!("push grace over: disconnecting");
        self.request_disconnect();
        self.schedule_reconnect();
    }

    /// A persistent alarm fired.
    pub fn on_alarm(&self, id: AlarmId) {
        debug!(?id, "alarm wakeup");
        let Some(svc) = self.strong() else {
            return;
        };
        let handle = self.executor.schedule(
            Duration::from_millis(self.config.alarm_probe_ms),
            move || svc.alarm_probe(),
        );
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::WakeupAlarm;
            state.alarm_deadline = now_ms() + self.config.alarm_service_ms;
            if let Some(old) = state.probe_handle.replace(handle) {
                old.cancel();
            }
        }
        self.request_connect();
        self.reschedule();
    }

    fn alarm_probe(&self) {
        let (done, busy) = {
            let state = self.state.lock().unwrap();
            if state.app_state != ApplicationState::WakeupAlarm {
                return;
            }
            let active = state.locks.values().any(|l| l.count > 0) || !state.jobs.is_empty();
            let expired = now_ms() >= state.alarm_deadline;
            (expired || !active, Self::voip_held(&state))
        };
        if !done || busy {
            // Still working (or a call is up): keep probing.
            let Some(svc) = self.strong() else {
                return;
            };
            let handle = self.executor.schedule(
                Duration::from_millis(self.config.alarm_probe_ms),
                move || svc.alarm_probe(),
            );
            let mut state = self.state.lock().unwrap();
            if let Some(old) = state.probe_handle.replace(handle) {
                old.cancel();
            }
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::BackgroundIdle;
            state.probe_handle = None;
        }
        debug!("alarm window idle: disconnecting");
        self.request_disconnect();
        self.schedule_reconnect();
    }

    /// The signaling transport reported usable connectivity.
    pub fn on_twinlife_online(&self) {
        self.state.lock().unwrap().online = true;
        self.reschedule();
    }

    /// Connectivity was lost; jobs needing the network wait.
    pub fn on_twinlife_offline(&self) {
        self.state.lock().unwrap().online = false;
        self.schedule_reconnect();
    }

    /// Whether the broker can reach us by push; decides reconnect pace.
    pub fn set_push_available(&self, available: bool) {
        self.state.lock().unwrap().push_available = available;
        self.schedule_reconnect();
    }

    /// Host memory pressure: shed everything.
    pub fn suspend(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.app_state = ApplicationState::Suspended;
        }
        self.control.suspend();
    }

    /// Acquire a reference-counted resource lease. The OS handle is
    /// taken on the 0-to-1 transition only.
    pub fn acquire_lock(&self, kind: LockKind) {
        let acquire = {
            let mut state = self.state.lock().unwrap();
            let lock = state.locks.entry(kind).or_insert(LockState {
                count: 0,
                held: false,
                release: None,
            });
            lock.count += 1;
            if let Some(pending) = lock.release.take() {
                pending.cancel();
            }
            if !lock.held {
                lock.held = true;
                true
            } else {
                false
            }
        };
        if acquire {
            self.power.acquire(kind);
        }
    }

    /// Release a resource lease. The OS handle is dropped after a
    /// short quiescence so lease bursts coalesce.
    pub fn release_lock(&self, kind: LockKind) {
        let mut state = self.state.lock().unwrap();
        let Some(lock) = state.locks.get_mut(&kind) else {
            return;
        };
        lock.count = lock.count.saturating_sub(1);
        if lock.count > 0 {
            return;
        }
        let Some(svc) = self.strong() else {
            return;
        };
        let handle = self
            .executor
            .schedule(Duration::from_millis(LOCK_RELEASE_DELAY_MS), move || {
                svc.release_quiesced(kind)
            });
        if let Some(old) = lock.release.replace(handle) {
            old.cancel();
        }
    }

    fn release_quiesced(&self, kind: LockKind) {
        let release = {
            let mut state = self.state.lock().unwrap();
            match state.locks.get_mut(&kind) {
                Some(lock) if lock.count == 0 && lock.held => {
                    lock.held = false;
                    lock.release = None;
                    true
                }
                _ => false,
            }
        };
        if release {
            self.power.release(kind);
        }
    }

    /// Register a job. Due and admitted jobs run on the executor; the
    /// rest wait for their deadline or an enabling state change.
    pub fn schedule_job(
        &self,
        name: &str,
        priority: JobPriority,
        deadline: u64,
        work: Box<dyn FnOnce() + Send>,
    ) -> JobId {
        let id = {
            let mut state = self.state.lock().unwrap();
            state.jobs.add(name, priority, deadline, work)
        };
        let delay = deadline.saturating_sub(now_ms());
        if delay > 0 {
            if let Some(svc) = self.strong() {
                // Fire-and-forget timer: the job list decides at fire time.
                let _ = self
                    .executor
                    .schedule(Duration::from_millis(delay), move || svc.reschedule());
            }
        }
        self.reschedule();
        id
    }

    /// Cancel a job that has not run yet.
    pub fn cancel_job(&self, id: JobId) -> bool {
        self.state.lock().unwrap().jobs.cancel(id)
    }

    /// Run every admitted, due job and refresh the reconnect alarm.
    pub fn reschedule(&self) {
        let runnable = {
            let mut state = self.state.lock().unwrap();
            let app_state = state.app_state;
            let online = state.online;
            state.jobs.take_runnable(app_state, online, now_ms())
        };
        for (name, work) in runnable {
            debug!(job = %name, "running job");
            self.metrics.jobs_run_total.inc();
            self.executor.execute(work);
        }
    }

    /// Arm both alarm jobs. The short-delay reconnect starts from the
    /// push-dependent base and is pulled in by the earliest pending
    /// message deadline; the long-delay periodic check keeps the base
    /// pace regardless of traffic. Neither drops below the floor.
    fn schedule_reconnect(&self) {
        let (base, message_deadline) = {
            let state = self.state.lock().unwrap();
            if state.app_state == ApplicationState::Foreground {
                return;
            }
            let base = if state.push_available {
                self.config.reconnect_push_ms
            } else {
                self.config.reconnect_no_push_ms
            };
            (base, state.jobs.earliest_deadline(JobPriority::Message))
        };
        let now = now_ms();
        let mut delay = base;
        if let Some(deadline) = message_deadline {
            delay = delay.min(deadline.saturating_sub(now));
        }
        delay = delay.max(self.config.reconnect_min_ms);
        self.scheduler.schedule_at(AlarmId::Reconnect, now + delay);

        let periodic = base.max(self.config.reconnect_min_ms);
        self.scheduler.schedule_at(AlarmId::Connect, now + periodic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockControl {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ContextControl for MockControl {
        fn connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        fn suspend(&self) {}
    }

    #[derive(Default)]
    struct MockScheduler {
        scheduled: Mutex<Vec<(AlarmId, u64)>>,
    }

    impl Scheduler for MockScheduler {
        fn schedule_at(&self, id: AlarmId, deadline: u64) {
            self.scheduled.lock().unwrap().push((id, deadline));
        }
        fn cancel(&self, _id: AlarmId) {}
    }

    #[derive(Default)]
    struct MockPower {
        acquires: AtomicUsize,
        releases: AtomicUsize,
    }

    impl PowerManager for MockPower {
        fn acquire(&self, _lock: LockKind) {
            self.acquires.fetch_add(1, Ordering::SeqCst);
        }
        fn release(&self, _lock: LockKind) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockConnectivity;

    impl ConnectivityService for MockConnectivity {
        fn is_connected_network(&self) -> bool {
            true
        }
    }

    fn quick_config() -> CoreConfig {
        let mut config = CoreConfig::with_data_dir("unused");
        config.background_disconnect_ms = 30;
        config.push_grace_ms = 40;
        config.alarm_service_ms = 100;
        config.alarm_probe_ms = 20;
        config
    }

    fn build(
        config: CoreConfig,
    ) -> (
        Arc<Orchestrator>,
        Arc<MockControl>,
        Arc<MockPower>,
        Arc<MockScheduler>,
    ) {
        let (executor, _join) = SerialExecutor::start();
        let control = Arc::new(MockControl::default());
        let power = Arc::new(MockPower::default());
        let scheduler = Arc::new(MockScheduler::default());
        let metrics = Arc::new(Metrics::new().unwrap());
        let orchestrator = Orchestrator::new(
            executor,
            control.clone(),
            scheduler.clone(),
            power.clone(),
            Arc::new(MockConnectivity),
            metrics,
            config,
        );
        (orchestrator, control, power, scheduler)
    }

    #[tokio::test]
    async fn foreground_connects_and_suppresses_disconnect() {
        let (orchestrator, control, _, _) = build(quick_config());
        orchestrator.on_enter_foreground();
        assert_eq!(orchestrator.application_state(), ApplicationState::Foreground);
        assert_eq!(control.connects.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(control.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn background_disconnects_after_delay() {
        let (orchestrator, control, _, _) = build(quick_config());
        orchestrator.on_enter_foreground();
        orchestrator.on_enter_background();
        assert_eq!(orchestrator.application_state(), ApplicationState::Background);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(control.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator.application_state(),
            ApplicationState::BackgroundIdle
        );
    }

    #[tokio::test]
    async fn voip_lock_blocks_background_disconnect() {
        let (orchestrator, control, _, _) = build(quick_config());
        orchestrator.on_enter_foreground();
        orchestrator.acquire_lock(LockKind::Voip);
        orchestrator.on_enter_background();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(control.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lock_handle_acquired_once_and_released_after_quiescence() {
        let (orchestrator, _, power, _) = build(quick_config());
        orchestrator.acquire_lock(LockKind::Network);
        orchestrator.acquire_lock(LockKind::Network);
        assert_eq!(power.acquires.load(Ordering::SeqCst), 1);

        orchestrator.release_lock(LockKind::Network);
        orchestrator.release_lock(LockKind::Network);
        assert_eq!(power.releases.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(power.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reacquire_inside_quiescence_keeps_handle() {
        let (orchestrator, _, power, _) = build(quick_config());
        orchestrator.acquire_lock(LockKind::Processing);
        orchestrator.release_lock(LockKind::Processing);
        orchestrator.acquire_lock(LockKind::Processing);

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(power.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(power.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn jobs_wait_for_admission() {
        let (orchestrator, _, _, _) = build(quick_config());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        orchestrator.schedule_job(
            "refresh",
            JobPriority::Update,
            now_ms(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Update jobs need the foreground.
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        orchestrator.on_enter_foreground();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
