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

//! Process runtime: the serial executor, the scheduled-job list and the
//! connection orchestrator.

/// Serial executor with cancellable timers.
pub mod executor;
/// Job list and admission rules.
pub mod jobs;
/// Connection presence policy.
pub mod orchestrator;

/// Where the process currently stands with the host OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApplicationState {
    /// Application visible; the connection must stay up.
    Foreground,
    /// Application backgrounded, connection still up.
    Background,
    /// Backgrounded and disconnected.
    BackgroundIdle,
    /// Woken by a push notification.
    WakeupPush,
    /// Woken by a scheduled alarm.
    WakeupAlarm,
    /// Host asked us to shed everything.
    Suspended,
}
