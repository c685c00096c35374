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

//! A transaction: one goal job plus the closure of jobs it implies.
//!
//! Building happens in three strictly separated passes: submission expands
//! the request along the dependency edges, `verify_acyclic` breaks ordering
//! cycles by discarding expendable jobs, and `merge_jobs` collapses multiple
//! operations per unit. Merging only ever runs on acyclic input.

use super::entry::{job_merge_into, job_merge_kinds, Job, JobKind};
use crate::error::*;
use crate::unit::{EdgeRelation, UnitDb, UnitX};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub(crate) struct Transaction {
    // key: unit, value: jobs on it; after the merge pass at most one pending
    jobs: RefCell<HashMap<Rc<UnitX>, Vec<Rc<Job>>>>,
    objective: RefCell<Option<Rc<Job>>>,
}

impl Transaction {
    pub(crate) fn new() -> Transaction {
        Transaction {
            jobs: RefCell::new(HashMap::new()),
            objective: RefCell::new(None),
        }
    }

    /// Add a job, expanding its implied dependency jobs recursively. An
    /// existing (unit, kind) job is reused; a re-submission can then only
    /// strengthen the goal_required flags.
    pub(crate) fn submit(
        &self,
        db: &UnitDb,
        unit: &Rc<UnitX>,
        kind: JobKind,
        requirer: Option<&Rc<Job>>,
        required: bool,
        is_goal: bool,
    ) -> Rc<Job> {
        let (job, new) = self.lookup_or_create(unit, kind);

        if is_goal {
            *self.objective.borrow_mut() = Some(Rc::clone(&job));
            job.promote_goal_required();
        }

        if let Some(from) = requirer {
            from.add_req(&job, required, false);
        }

        if new {
            self.expand(db, &job);
        }

        job
    }

    // one step of the closure: walk the out-edges of the job's unit
    fn expand(&self, db: &UnitDb, job: &Rc<Job>) {
        let parent = job.kind();
        let starting = matches!(
            parent,
            JobKind::Start
                | JobKind::Restart
                | JobKind::TryRestart
                | JobKind::RestartOrStart
                | JobKind::ReloadOrStart
        );

        for edge in job.unit().out_edges() {
            let rel = edge.relation();
            let to = db.units_get_or_create(edge.to());

            if starting {
                if rel.contains(EdgeRelation::ADD_START) {
                    self.submit(db, &to, JobKind::Start, Some(job), true, false);
                }
                if rel.contains(EdgeRelation::ADD_START_NONREQ) {
                    self.submit(db, &to, JobKind::Start, Some(job), false, false);
                }
                if rel.contains(EdgeRelation::ADD_VERIFY) {
                    self.submit(db, &to, JobKind::Verify, Some(job), true, false);
                }
                if rel.contains(EdgeRelation::ADD_STOP) {
                    self.submit(db, &to, JobKind::Stop, Some(job), true, false);
                }
                if rel.contains(EdgeRelation::ADD_STOP_NONREQ) {
                    self.submit(db, &to, JobKind::Stop, Some(job), false, false);
                }
            }

            if parent == JobKind::Stop && rel.contains(EdgeRelation::PROPAGATES_STOP_TO) {
                self.submit(db, &to, JobKind::Stop, Some(job), true, false);
            }

            if matches!(
                parent,
                JobKind::Restart | JobKind::TryRestart | JobKind::RestartOrStart
            ) && rel.contains(EdgeRelation::PROPAGATES_RESTART_TO)
            {
                self.submit(db, &to, JobKind::TryRestart, Some(job), true, false);
            }

            if matches!(
                parent,
                JobKind::Reload | JobKind::TryReload | JobKind::ReloadOrStart
            ) && rel.contains(EdgeRelation::PROPAGATES_RELOAD_TO)
            {
                self.submit(db, &to, JobKind::TryReload, Some(job), true, false);
            }
        }
    }

    fn lookup_or_create(&self, unit: &Rc<UnitX>, kind: JobKind) -> (Rc<Job>, bool) {
        if let Some(list) = self.jobs.borrow().get(unit) {
            if let Some(job) = list.iter().find(|j| j.kind() == kind) {
                return (Rc::clone(job), false);
            }
        }

        let job = Rc::new(Job::new(unit, kind));
        self.jobs
            .borrow_mut()
            .entry(Rc::clone(unit))
            .or_default()
            .push(Rc::clone(&job));
        (job, true)
    }

    /// Break every ordering cycle by discarding the job set of some
    /// non-essential unit on it, or fail if a cycle is made entirely of
    /// goal-required jobs.
    pub(crate) fn verify_acyclic(&self, db: &UnitDb) -> Result<()> {
        loop {
            let path = match self.find_cycle(db) {
                None => return Ok(()),
                Some(v) => v,
            };
            self.try_remove_cycle(&path)?;
        }
    }

    fn find_cycle(&self, db: &UnitDb) -> Option<Vec<Rc<UnitX>>> {
        let mut done: HashSet<String> = HashSet::new();

        for unit in self.units() {
            if done.contains(unit.id()) {
                continue;
            }
            let mut path: Vec<Rc<UnitX>> = Vec::new();
            if let Some(cycle) = self.cycle_dfs(db, &unit, &mut path, &mut done) {
                return Some(cycle);
            }
        }

        None
    }

    fn cycle_dfs(
        &self,
        db: &UnitDb,
        unit: &Rc<UnitX>,
        path: &mut Vec<Rc<UnitX>>,
        done: &mut HashSet<String>,
    ) -> Option<Vec<Rc<UnitX>>> {
        if let Some(pos) = path.iter().position(|u| Rc::ptr_eq(u, unit)) {
            // back-edge into the current path: the tail is the cycle
            return Some(path[pos..].to_vec());
        }
        if done.contains(unit.id()) {
            return None;
        }

        path.push(Rc::clone(unit));
        for succ in db.ordering_successors(unit) {
            if !self.has_jobs(&succ) {
                continue;
            }
            if let Some(cycle) = self.cycle_dfs(db, &succ, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(unit.id().to_string());

        None
    }

    fn try_remove_cycle(&self, path: &[Rc<UnitX>]) -> Result<()> {
        for unit in path.iter().rev() {
            if self.unit_jobs_essential(unit) {
                continue;
            }

            let dels = self.del_jobs_for(unit);
            log::info!(
                "breaking ordering cycle by deleting {} job(s) of {}",
                dels.len(),
                unit.id()
            );
            return Ok(());
        }

        Err(Error::CycleUnresolvable {
            unit: path[0].id().to_string(),
        })
    }

    // is any job on this unit the objective, or required by it
    fn unit_jobs_essential(&self, unit: &Rc<UnitX>) -> bool {
        let objective = self.objective.borrow();
        for job in self.jobs_for(unit) {
            if job.goal_required() {
                return true;
            }
            if let Some(goal) = objective.as_ref() {
                if Rc::ptr_eq(goal, &job) {
                    return true;
                }
            }
        }
        false
    }

    /// Delete all jobs on a unit, together with every job that transitively
    /// requires one of them through a required link.
    pub(crate) fn del_jobs_for(&self, unit: &Rc<UnitX>) -> Vec<Rc<Job>> {
        let mut dels = Vec::new();
        for job in self.jobs_for(unit) {
            self.job_del_with_requirers(&job, &mut dels);
        }
        dels
    }

    pub(crate) fn job_del_with_requirers(&self, job: &Rc<Job>, dels: &mut Vec<Rc<Job>>) {
        if !self.remove_job(job) {
            return;
        }

        let requirers = job.requirers();
        job.unlink_reqs();
        dels.push(Rc::clone(job));

        for (from, required) in requirers {
            if required {
                self.job_del_with_requirers(&from, dels);
            }
        }
    }

    /// Collapse multiple pending operations per unit into one.
    pub(crate) fn merge_jobs(&self) -> Result<()> {
        for unit in self.units() {
            loop {
                let pending = self
                    .jobs_for(&unit)
                    .into_iter()
                    .filter(|j| j.state() == super::entry::JobState::Awaiting)
                    .collect::<Vec<_>>();
                if pending.len() < 2 {
                    break;
                }

                let a = Rc::clone(&pending[0]);
                let b = Rc::clone(&pending[1]);
                match job_merge_kinds(a.kind(), b.kind()) {
                    Some(kind) => {
                        job_merge_into(&a, &b, kind);
                        self.remove_job(&b);
                    }
                    None => {
                        let del = match (a.goal_required(), b.goal_required()) {
                            (true, true) => {
                                return Err(Error::MergeUnresolvable {
                                    unit: unit.id().to_string(),
                                })
                            }
                            (true, false) => b,
                            (false, true) => a,
                            // neither is essential: prefer dropping the stop
                            (false, false) => {
                                if a.kind() == JobKind::Stop {
                                    a
                                } else {
                                    b
                                }
                            }
                        };

                        let mut dels = Vec::new();
                        self.job_del_with_requirers(&del, &mut dels);
                        log::info!(
                            "unmergeable job on {} deleted with {} requirer(s)",
                            unit.id(),
                            dels.len().saturating_sub(1)
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn remove_job(&self, job: &Rc<Job>) -> bool {
        let mut map = self.jobs.borrow_mut();
        let list = match map.get_mut(job.unit()) {
            None => return false,
            Some(v) => v,
        };

        let before = list.len();
        list.retain(|j| !Rc::ptr_eq(j, job));
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(job.unit());
        }

        if removed {
            let mut objective = self.objective.borrow_mut();
            if let Some(goal) = objective.as_ref() {
                if Rc::ptr_eq(goal, job) {
                    *objective = None;
                }
            }
        }

        removed
    }

    pub(crate) fn objective(&self) -> Option<Rc<Job>> {
        self.objective.borrow().as_ref().map(Rc::clone)
    }

    pub(crate) fn units(&self) -> Vec<Rc<UnitX>> {
        self.jobs.borrow().keys().map(Rc::clone).collect()
    }

    pub(crate) fn jobs_for(&self, unit: &Rc<UnitX>) -> Vec<Rc<Job>> {
        self.jobs
            .borrow()
            .get(unit)
            .map(|l| l.iter().map(Rc::clone).collect())
            .unwrap_or_default()
    }

    pub(crate) fn jobs_all(&self) -> Vec<Rc<Job>> {
        self.jobs
            .borrow()
            .values()
            .flat_map(|l| l.iter().map(Rc::clone))
            .collect()
    }

    pub(crate) fn has_jobs(&self, unit: &Rc<UnitX>) -> bool {
        self.jobs.borrow().contains_key(unit)
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.borrow().values().map(|l| l.len()).sum()
    }

    /// The transaction is over when its objective has reached a terminal
    /// state (or was emptied away) -- remaining jobs are then expendable.
    pub(crate) fn is_finished(&self) -> bool {
        match self.objective() {
            None => true,
            Some(goal) => goal.state().is_terminal(),
        }
    }
}
