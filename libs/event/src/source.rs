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

//! # Event sources must implement the Source trait
use crate::EventType;
use crate::Events;
use nix::sys::signal::Signal;
use std::fmt::Debug;
use std::os::unix::io::RawFd;

/// Everything registered with [`Events`] implements this trait.
pub trait Source {
    /// Io sources name the fd to listen to
    fn fd(&self) -> RawFd {
        unreachable!("the source has no file descriptor.")
    }

    /// Signal sources name the signals to listen to
    fn signals(&self) -> Vec<Signal> {
        vec![]
    }

    /// timer sources: expiry relative to now, in microseconds
    fn time_relative(&self) -> u64 {
        u64::MAX
    }

    /// the kind of this source
    fn event_type(&self) -> EventType {
        EventType::Io
    }

    /// the epoll event mask to listen for
    fn epoll_event(&self) -> u32 {
        libc::EPOLLIN as u32
    }

    /// Distinguishes sources from each other. Unless a uniform scheme is
    /// wanted, the address of the source is the usual implementation:
    /// ```ignore
    /// fn token(&self) -> u64 {
    ///     let data: u64 = unsafe { std::mem::transmute(self) };
    ///     data
    /// }
    /// ```
    fn token(&self) -> u64;

    /// -127i8 ~ 128i8, the smaller the value, the higher the priority
    fn priority(&self) -> i8 {
        0i8
    }

    /// the callback
    fn dispatch(&self, event: &Events) -> i32;

    /// short description for diagnostics
    fn description(&self) -> String {
        String::from("default")
    }
}

// for HashMap keys
impl std::hash::Hash for dyn Source {
    fn hash<H>(&self, state: &mut H)
    where
        H: std::hash::Hasher,
    {
        self.token().hash(state);
    }
}

impl PartialEq for dyn Source {
    fn eq(&self, other: &dyn Source) -> bool {
        self.token() == other.token()
    }
}

impl Eq for dyn Source {}

// for BinaryHeap: smaller priority value pops first
impl Ord for dyn Source {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority()).reverse()
    }
}

impl PartialOrd for dyn Source {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Source {{ {} }}", self.description())
    }
}
