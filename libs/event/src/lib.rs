// Copyright (c) 2022 Huawei Technologies Co.,Ltd. All rights reserved.
//
// sysMaster is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

//! A single-threaded event scheduling framework based on epoll.
//!
//! Callers register [`Source`]s with [`Events`] and drive the loop with
//! `run`/`rloop`. One source is dispatched per iteration; callbacks run
//! sequentially on the loop thread and may add or remove sources freely.

pub mod error;
pub mod events;
pub mod poll;
pub mod source;
pub mod timer;

pub use crate::error::{Error, Result};
pub use crate::events::Events;
pub use crate::poll::Poll;
pub use crate::source::Source;

/// The kind of an event source.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EventType {
    /// file-descriptor readiness
    Io,
    /// CLOCK_MONOTONIC timer
    TimerMonotonic,
    /// CLOCK_REALTIME timer
    TimerRealtime,
    /// signalfd
    Signal,
    /// dispatched on every loop iteration while enabled
    Defer,
    /// dispatched after any non-post source fires
    Post,
}

/// The enable state of an event source.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventState {
    /// not listened to
    Off,
    /// listened to until disabled
    On,
    /// disabled again after the next dispatch
    OneShot,
}
