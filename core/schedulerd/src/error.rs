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

//! Error define. Generation errors surface from `enqueue`; runtime failures
//! become job outcomes instead and never show up here.
use snafu::prelude::*;

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// the caller handed in an id or an edge the graph cannot hold
    #[snafu(display("graph invariant violated: {}", what))]
    GraphInvariant { what: String },

    /// an ordering cycle whose every member is required by the goal
    #[snafu(display("ordering cycle through '{}' cannot be resolved", unit))]
    CycleUnresolvable { unit: String },

    /// two goal-required jobs on one unit cannot be merged
    #[snafu(display("conflicting required jobs on '{}' cannot be merged", unit))]
    MergeUnresolvable { unit: String },

    #[snafu(display("NotFound: '{}'.", what))]
    NotFound { what: String },

    /// invalid request input
    Input,

    /// a reactor primitive failed
    #[snafu(display("event error: {}", source))]
    Event { source: event::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
