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

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// What relationships the `from` node of an edge has with its `to` node.
    ///
    /// The bit values are stable: persisted unit definitions encode them
    /// numerically.
    pub(crate) struct EdgeRelation: u16 {
        /// for a start job, enqueue a required dependency start job on `to`
        const ADD_START = 1 << 0;
        /// as ADD_START, but the result is ignored
        const ADD_START_NONREQ = 1 << 1;
        /// for a start job, enqueue a required verify (is it online?) job on `to`
        const ADD_VERIFY = 1 << 2;
        /// for a start job, enqueue a required stop job on `to` (conflict)
        const ADD_STOP = 1 << 3;
        /// as ADD_STOP, but the result is ignored
        const ADD_STOP_NONREQ = 1 << 4;
        /// for a stop job, enqueue a stop job on `to`
        const PROPAGATES_STOP_TO = 1 << 5;
        /// for a restart job, enqueue a try-restart job on `to`
        const PROPAGATES_RESTART_TO = 1 << 6;
        /// for a reload job, enqueue a try-reload job on `to`
        const PROPAGATES_RELOAD_TO = 1 << 7;
        /// on unexpected start, enqueue a start job for `to`
        const START_ON_STARTED = 1 << 8;
        /// on unexpected start, enqueue a try-start job for `to`
        const TRY_START_ON_STARTED = 1 << 9;
        /// on unexpected start, enqueue a stop job for `to`
        const STOP_ON_STARTED = 1 << 10;
        /// on unexpected stop, enqueue a stop job for `to`
        const STOP_ON_STOPPED = 1 << 11;
        /// on entering offline from online, enqueue a start job for `to`
        const ON_SUCCESS = 1 << 12;
        /// on entering the maintenance state, enqueue a start job for `to`
        const ON_FAILURE = 1 << 13;
        /// run jobs on `from` only after jobs on `to` have run
        const AFTER = 1 << 14;
        /// inverse ordering; normalized into a reverse AFTER at ingestion
        const BEFORE = 1 << 15;
    }
}

/// The lifecycle state of a unit.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum UnitState {
    /// not [yet] loaded
    Uninitialised,
    /// not up
    Offline,
    /// going up
    Starting,
    /// up
    Online,
    /// going down
    Stopping,
    /// error occurred
    Maintenance,
}

impl UnitState {
    /// is the unit up, for resolving the try-flavored job kinds
    pub(crate) fn is_online(&self) -> bool {
        matches!(self, UnitState::Online | UnitState::Starting)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::Uninitialised => "uninitialised",
            UnitState::Offline => "offline",
            UnitState::Starting => "starting",
            UnitState::Online => "online",
            UnitState::Stopping => "stopping",
            UnitState::Maintenance => "maintenance",
        };
        write!(f, "{}", s)
    }
}
