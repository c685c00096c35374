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

//! The transaction engine.
//!
//! `[entry]`: the job object, requirement links, the merge matrix and the
//! run-phase machinery.
//!
//! `[alloc]`: job id allocation.
//!
//! `[transaction]`: request expansion, ordering-cycle resolution and
//! per-unit merging.
//!
//! `[manager]`: the dispatcher driving transactions against the reactor and
//! the restarters.
//!
//! `[notify]`: corrective jobs synthesized from asynchronous state changes.

pub(crate) use entry::{JobId, JobKind, JobState};
pub(crate) use manager::JobManager;
pub(crate) use transaction::Transaction;

mod alloc;
mod entry;
mod manager;
mod notify;
mod transaction;
