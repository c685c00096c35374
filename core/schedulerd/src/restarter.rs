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

//! Per-unit-type strategies for physically starting and stopping units.

use crate::job::{JobId, JobManager, JobState};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// The backend contract. Returning true means accepted, with an eventual
/// `JobManager::job_complete(id, ..)`; returning false is a synchronous
/// rejection. Implementations with background work of their own re-enter the
/// scheduler only from the reactor thread.
pub(crate) trait Restarter {
    fn start(&self, id: JobId) -> bool;

    fn stop(&self, id: JobId) -> bool;

    /// reload is delegated to start unless the backend distinguishes it
    fn reload(&self, id: JobId) -> bool {
        self.start(id)
    }

    /// best-effort; declining still counts the job as cancelled
    fn cancel(&self, _id: JobId) -> bool {
        false
    }

    /// per-unit-type override of the scheduler's default job timeout
    fn job_timeout_usec(&self) -> Option<u64> {
        None
    }
}

/// The registry, keyed by the unit-type string.
pub(crate) struct RestarterDb {
    t: RefCell<HashMap<String, Rc<dyn Restarter>>>,
}

impl RestarterDb {
    pub(crate) fn new() -> RestarterDb {
        RestarterDb {
            t: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn register(&self, unit_type: &str, restarter: Rc<dyn Restarter>) {
        if self
            .t
            .borrow_mut()
            .insert(unit_type.to_string(), restarter)
            .is_some()
        {
            log::info!("restarter for '{}' replaced.", unit_type);
        }
    }

    pub(crate) fn get(&self, unit_type: &str) -> Option<Rc<dyn Restarter>> {
        self.t.borrow().get(unit_type).map(Rc::clone)
    }
}

/// Targets have no process behind them; starting or stopping one completes
/// on the spot.
pub(crate) struct TargetRestarter {
    jm: RefCell<Weak<JobManager>>,
}

impl TargetRestarter {
    pub(crate) fn new() -> TargetRestarter {
        TargetRestarter {
            jm: RefCell::new(Weak::new()),
        }
    }

    pub(crate) fn attach(&self, jm: &Rc<JobManager>) {
        *self.jm.borrow_mut() = Rc::downgrade(jm);
    }

    fn complete(&self, id: JobId) -> bool {
        match self.jm.borrow().upgrade() {
            None => false,
            Some(jm) => {
                jm.job_complete(id, JobState::Success);
                true
            }
        }
    }
}

impl Restarter for TargetRestarter {
    fn start(&self, id: JobId) -> bool {
        self.complete(id)
    }

    fn stop(&self, id: JobId) -> bool {
        self.complete(id)
    }
}
