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

//! Scheduled jobs. A job is created by a caller, waits in the
//! process-wide list, and is executed once and removed (or cancelled).
//! Admission depends on its priority and the current application state.

use crate::runtime::ApplicationState;
use std::collections::BTreeMap;

/// What a job is allowed to interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    /// Connection maintenance; admitted in every state.
    Connect,
    /// Interactive work; foreground-ish states only.
    Foreground,
    /// Content refresh; foreground and online only.
    Update,
    /// Message delivery; any state while online.
    Message,
    /// Telemetry/reporting; wakeup states while online.
    Report,
}

/// True when a job of `priority` may run in `state`.
pub fn admitted(priority: JobPriority, state: ApplicationState, online: bool) -> bool {
    use ApplicationState::*;
    match priority {
        JobPriority::Connect => true,
        JobPriority::Foreground => matches!(state, Foreground | WakeupPush | WakeupAlarm),
        JobPriority::Update => online && state == Foreground,
        JobPriority::Message => online,
        JobPriority::Report => online && matches!(state, Foreground | WakeupPush | WakeupAlarm),
    }
}

/// Opaque job handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct JobId(pub u64);

struct Job {
    name: String,
    priority: JobPriority,
    deadline: u64,
    work: Option<Box<dyn FnOnce() + Send>>,
}

/// The process-wide job list. Callers guard it with the orchestrator
/// monitor; the list itself is single-owner.
pub struct JobList {
    next: u64,
    jobs: BTreeMap<u64, Job>,
}

impl Default for JobList {
    fn default() -> Self {
        Self::new()
    }
}

impl JobList {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            next: 1,
            jobs: BTreeMap::new(),
        }
    }

    /// Register a job due at `deadline` (ms since epoch).
    pub fn add(
        &mut self,
        name: &str,
        priority: JobPriority,
        deadline: u64,
        work: Box<dyn FnOnce() + Send>,
    ) -> JobId {
        let id = self.next;
        self.next += 1;
        self.jobs.insert(
            id,
            Job {
                name: name.to_string(),
                priority,
                deadline,
                work: Some(work),
            },
        );
        JobId(id)
    }

    /// Remove a job before it ran.
    pub fn cancel(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id.0).is_some()
    }

    /// Number of waiting jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when no job waits.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True when a job of `priority` is waiting.
    pub fn has_priority(&self, priority: JobPriority) -> bool {
        self.jobs.values().any(|j| j.priority == priority)
    }

    /// Earliest deadline among jobs of `priority`.
    pub fn earliest_deadline(&self, priority: JobPriority) -> Option<u64> {
        self.jobs
            .values()
            .filter(|j| j.priority == priority)
            .map(|j| j.deadline)
            .min()
    }

    /// Next deadline among jobs not yet admitted or not yet due.
    pub fn next_deadline(&self) -> Option<u64> {
        self.jobs.values().map(|j| j.deadline).min()
    }

    /// Pull every job that is due and admitted; the caller executes the
    /// returned work items (outside the monitor).
    pub fn take_runnable(
        &mut self,
        state: ApplicationState,
        online: bool,
        now: u64,
    ) -> Vec<(String, Box<dyn FnOnce() + Send>)> {
        let due: Vec<u64> = self
            .jobs
            .iter()
            .filter(|(_, j)| j.deadline <= now && admitted(j.priority, state, online))
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::with_capacity(due.len());
        for id in due {
            if let Some(mut job) = self.jobs.remove(&id) {
                if let Some(work) = job.work.take() {
                    out.push((job.name.clone(), work));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ApplicationState::*;

    #[test]
    fn admission_table() {
        for state in [
            Foreground,
            Background,
            BackgroundIdle,
            WakeupPush,
            WakeupAlarm,
            Suspended,
        ] {
            assert!(admitted(JobPriority::Connect, state, false));
        }
        assert!(admitted(JobPriority::Foreground, WakeupPush, false));
        assert!(!admitted(JobPriority::Foreground, Background, true));
        assert!(admitted(JobPriority::Update, Foreground, true));
        assert!(!admitted(JobPriority::Update, Foreground, false));
        assert!(!admitted(JobPriority::Update, WakeupPush, true));
        assert!(admitted(JobPriority::Message, BackgroundIdle, true));
        assert!(!admitted(JobPriority::Message, BackgroundIdle, false));
        assert!(admitted(JobPriority::Report, WakeupAlarm, true));
        assert!(!admitted(JobPriority::Report, Background, true));
    }

    #[test]
    fn jobs_run_once_and_disappear() {
        let mut list = JobList::new();
        let id = list.add("sync", JobPriority::Message, 100, Box::new(|| {}));
        assert_eq!(list.len(), 1);

        // Not due yet.
        assert!(list.take_runnable(Foreground, true, 50).is_empty());
        // Not admitted offline.
        assert!(list.take_runnable(Foreground, false, 200).is_empty());

        let runnable = list.take_runnable(Foreground, true, 200);
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].0, "sync");
        assert!(list.is_empty());
        assert!(!list.cancel(id));
    }

    #[test]
    fn earliest_deadline_per_priority() {
        let mut list = JobList::new();
        list.add("a", JobPriority::Message, 500, Box::new(|| {}));
        list.add("b", JobPriority::Message, 300, Box::new(|| {}));
        list.add("c", JobPriority::Report, 100, Box::new(|| {}));
        assert_eq!(list.earliest_deadline(JobPriority::Message), Some(300));
        assert_eq!(list.next_deadline(), Some(100));
        assert!(list.has_priority(JobPriority::Report));
        assert!(!list.has_priority(JobPriority::Update));
    }
}
