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

use super::entry::{Job, JobId};
use std::cell::Cell;

/// Hands out job ids. Ids are assigned lazily, first when a job is admitted
/// to execution, and are never reused within one scheduler lifetime.
pub(super) struct JobAlloc {
    n_id: Cell<JobId>,
}

impl JobAlloc {
    pub(super) fn new() -> JobAlloc {
        JobAlloc { n_id: Cell::new(0) }
    }

    /// give the job an id if it does not carry one yet
    pub(super) fn assign(&self, job: &Job) -> JobId {
        match job.id() {
            Some(id) => id,
            None => {
                let id = self.n_id.get() + 1;
                self.n_id.set(id);
                job.set_id(id);
                id
            }
        }
    }

    pub(super) fn clear(&self) {
        self.n_id.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::entry::JobKind;
    use crate::unit::UnitX;
    use std::rc::Rc;

    #[test]
    fn alloc_assigns_once() {
        let ja = JobAlloc::new();
        let unit = Rc::new(UnitX::new(vec![String::from("a.service")], "service"));
        let job = Job::new(&unit, JobKind::Start);

        assert_eq!(job.id(), None);
        let id = ja.assign(&job);
        assert_eq!(job.id(), Some(id));
        // a second admission keeps the first id
        assert_eq!(ja.assign(&job), id);

        let other = Job::new(&unit, JobKind::Stop);
        assert_ne!(ja.assign(&other), id);
    }
}
