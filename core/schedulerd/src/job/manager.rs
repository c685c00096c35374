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

//! The runtime dispatcher: a FIFO of transactions, a table of dispatched
//! jobs, timeout timers, and completion propagation.

use super::alloc::JobAlloc;
use super::entry::{
    job_completion_verb, job_dispatch_action, job_is_unit_applicable, job_order_inverted,
    DispatchAction, Job, JobId, JobKind, JobState, JobTimer,
};
use super::notify;
use super::transaction::Transaction;
use crate::error::*;
use crate::logger::{self, StatusBracket};
use crate::restarter::RestarterDb;
use crate::unit::{UnitDb, UnitState, UnitX};
use event::{EventState, Events};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

pub(crate) struct JobManager {
    data: Rc<JobManagerData>,
}

impl JobManager {
    pub(crate) fn new(
        eventsr: &Rc<Events>,
        dbr: &Rc<UnitDb>,
        restartersr: &Rc<RestarterDb>,
        default_timeout_usec: u64,
    ) -> JobManager {
        JobManager {
            data: Rc::new(JobManagerData::new(
                eventsr,
                dbr,
                restartersr,
                default_timeout_usec,
            )),
        }
    }

    /// Expand a request into a transaction, validate it and queue it. The
    /// head transaction starts dispatching immediately.
    pub(crate) fn exec(&self, unit: &Rc<UnitX>, kind: JobKind) -> Result<()> {
        self.data.exec(unit, kind)
    }

    /// Entry for restarters: a dispatched job has finished.
    pub(crate) fn job_complete(&self, id: JobId, result: JobState) {
        self.data.job_complete(id, result);
    }

    /// The event sink half: an asynchronous state change was observed and no
    /// job of ours explains it. Synthesizes corrective jobs and merges them
    /// into the head transaction (or a fresh one).
    pub(crate) fn notify_state_change(&self, unit: &Rc<UnitX>, os: UnitState, ns: UnitState) {
        self.data.notify_state_change(unit, os, ns);
    }

    /// is a job of ours currently dispatched for this unit
    pub(crate) fn has_active_job(&self, unit: &Rc<UnitX>) -> bool {
        self.data.has_active_job(unit)
    }

    /// unit and current phase of a dispatched job, for restarters
    pub(crate) fn job_info(&self, id: JobId) -> Option<(Rc<UnitX>, JobKind)> {
        self.data.job_info(id)
    }

    /// Cancel everything: queued transactions and dispatched jobs.
    pub(crate) fn cancel_all(&self) {
        self.data.cancel_all();
    }

    #[allow(dead_code)]
    pub(crate) fn queue_len(&self) -> usize {
        self.data.transactions.borrow().len()
    }

    #[allow(dead_code)]
    pub(crate) fn running_len(&self) -> usize {
        self.data.running.borrow().len()
    }
}

pub(super) struct JobManagerData {
    // associated objects
    events: Rc<Events>,
    db: Rc<UnitDb>,
    restarters: Rc<RestarterDb>,

    // owned objects
    ja: JobAlloc,
    default_timeout_usec: Cell<u64>,

    transactions: RefCell<VecDeque<Rc<Transaction>>>,
    running: RefCell<HashMap<JobId, Rc<Job>>>,

    // completions queue up while a dispatch round is on the stack, so that
    // synchronous restarter callbacks cannot re-enter the tables
    completions: RefCell<VecDeque<(JobId, JobState)>>,
    in_flight: Cell<bool>,
}

// the declaration "pub(self)" is for identification only.
impl JobManagerData {
    pub(self) fn new(
        eventsr: &Rc<Events>,
        dbr: &Rc<UnitDb>,
        restartersr: &Rc<RestarterDb>,
        default_timeout_usec: u64,
    ) -> JobManagerData {
        JobManagerData {
            events: Rc::clone(eventsr),
            db: Rc::clone(dbr),
            restarters: Rc::clone(restartersr),
            ja: JobAlloc::new(),
            default_timeout_usec: Cell::new(default_timeout_usec),
            transactions: RefCell::new(VecDeque::new()),
            running: RefCell::new(HashMap::new()),
            completions: RefCell::new(VecDeque::new()),
            in_flight: Cell::new(false),
        }
    }

    pub(self) fn exec(self: &Rc<Self>, unit: &Rc<UnitX>, kind: JobKind) -> Result<()> {
        if !job_is_unit_applicable(kind, unit) {
            return Err(Error::Input);
        }

        let tx = Rc::new(Transaction::new());
        tx.submit(&self.db, unit, kind, None, true, true);
        tx.verify_acyclic(&self.db)?;
        tx.merge_jobs()?;

        log::info!(
            "queued transaction {:?} on {} with {} job(s)",
            kind,
            unit.id(),
            tx.len()
        );
        self.transactions.borrow_mut().push_back(tx);
        self.process();
        Ok(())
    }

    pub(self) fn notify_state_change(self: &Rc<Self>, unit: &Rc<UnitX>, os: UnitState, ns: UnitState) {
        let targets = notify::job_notify_events(&self.db, unit, os, ns);
        if targets.is_empty() {
            return;
        }

        let head = self.transactions.borrow().front().map(Rc::clone);
        let (tx, fresh) = match head {
            Some(tx) => (tx, false),
            None => (Rc::new(Transaction::new()), true),
        };

        let mut is_goal = fresh;
        for (other, kind) in targets {
            tx.submit(&self.db, &other, kind, None, true, is_goal);
            is_goal = false;
        }

        // pseudo-jobs are never goal-required on a live head, so validation
        // can only drop them, not wedge the transaction
        if let Err(e) = tx.verify_acyclic(&self.db).and_then(|_| tx.merge_jobs()) {
            log::error!("discarding state-change jobs for {}: {}", unit.id(), e);
            if fresh {
                return;
            }
        } else if fresh {
            self.transactions.borrow_mut().push_back(tx);
        }

        self.process();
    }

    pub(self) fn job_complete(self: &Rc<Self>, id: JobId, result: JobState) {
        self.completions.borrow_mut().push_back((id, result));
        self.process();
    }

    /// timeout timer callback
    pub(super) fn job_expired(self: &Rc<Self>, id: JobId) {
        self.job_complete(id, JobState::Timeout);
    }

    pub(self) fn has_active_job(&self, unit: &Rc<UnitX>) -> bool {
        self.running
            .borrow()
            .values()
            .any(|j| j.unit().id() == unit.id())
    }

    pub(self) fn job_info(&self, id: JobId) -> Option<(Rc<UnitX>, JobKind)> {
        self.running
            .borrow()
            .get(&id)
            .map(|j| (Rc::clone(j.unit()), j.run_kind()))
    }

    pub(self) fn cancel_all(self: &Rc<Self>) {
        let txs = self.transactions.borrow_mut().drain(..).collect::<Vec<_>>();
        for tx in txs.iter() {
            for job in tx.jobs_all() {
                self.job_cancel(&job);
            }
        }

        // dispatched jobs of already-popped transactions
        let leftover = self.running.borrow().values().map(Rc::clone).collect::<Vec<_>>();
        for job in leftover {
            self.job_cancel(&job);
        }

        self.completions.borrow_mut().clear();
        assert!(self.running.borrow().is_empty());
    }

    fn job_cancel(&self, job: &Rc<Job>) {
        match job.state() {
            JobState::Awaiting => {
                job.set_state(JobState::Cancelled);
                self.console_result(job, job.run_kind(), JobState::Cancelled);
            }
            JobState::Running => {
                let id = job.id().expect("a running job always has an id.");
                self.running.borrow_mut().remove(&id);
                if let Some(timer) = job.take_timer() {
                    let _ = self.events.del_source(timer);
                }
                // the restarter may decline; the job is still over for us
                if let Some(r) = self.restarters.get(job.unit().unit_type()) {
                    r.cancel(id);
                }
                job.set_state(JobState::Cancelled);
                self.console_result(job, job.run_kind(), JobState::Cancelled);
            }
            _ => {}
        }
    }

    /// Drain completions and dispatch runnable leaves until neither makes
    /// progress. Re-entrant calls only queue work for the outer frame.
    fn process(self: &Rc<Self>) {
        if self.in_flight.replace(true) {
            return;
        }

        loop {
            let next = self.completions.borrow_mut().pop_front();
            if let Some((id, result)) = next {
                self.do_complete(id, result);
                continue;
            }
            if self.dispatch_round() {
                continue;
            }
            if self.completions.borrow().is_empty() {
                break;
            }
        }

        self.in_flight.set(false);
    }

    // returns whether any progress was made
    fn dispatch_round(self: &Rc<Self>) -> bool {
        let tx = match self.transactions.borrow().front() {
            None => return false,
            Some(tx) => Rc::clone(tx),
        };

        if tx.is_finished() {
            self.tx_abandon(&tx);
            self.transactions.borrow_mut().pop_front();
            return true;
        }

        let ready = tx
            .jobs_all()
            .into_iter()
            .filter(|j| j.state() == JobState::Awaiting && self.job_runnable(&tx, j))
            .collect::<Vec<_>>();

        if ready.is_empty() {
            let waiting = tx
                .jobs_all()
                .iter()
                .any(|j| j.state() == JobState::Running);
            if !waiting
                && self.completions.borrow().is_empty()
                && self.running.borrow().is_empty()
            {
                // every pending job is blocked and nothing can unblock it
                log::error!("transaction wedged, cancelling it");
                self.tx_abandon(&tx);
                self.transactions.borrow_mut().pop_front();
                return true;
            }
            return false;
        }

        for job in ready.iter() {
            if job.state() == JobState::Awaiting {
                self.job_run(job);
            }
        }
        true
    }

    /// Is this job free to run under the `After` ordering? Stop-phase jobs
    /// run before their ordering target, everything else runs after it.
    /// Terminal peers never block; failure only travels along requirements.
    fn job_runnable(&self, tx: &Rc<Transaction>, job: &Rc<Job>) -> bool {
        let unit = job.unit();

        // one dispatched job per unit at a time, even across transactions
        if self
            .running
            .borrow()
            .values()
            .any(|r| !Rc::ptr_eq(r, job) && r.unit().id() == unit.id())
        {
            return false;
        }

        for succ in self.db.ordering_successors(unit) {
            for other in tx.jobs_for(&succ) {
                if other.state().is_terminal() {
                    continue;
                }
                if job_order_inverted(job) {
                    continue;
                }
                return false;
            }
        }

        for pred in self.db.ordering_predecessors(unit) {
            for other in tx.jobs_for(&pred) {
                if other.state().is_terminal() {
                    continue;
                }
                if job_order_inverted(&other) {
                    return false;
                }
            }
        }

        true
    }

    fn job_run(self: &Rc<Self>, job: &Rc<Job>) {
        let action = job_dispatch_action(job);
        let id = self.ja.assign(job);

        job.set_action(action);
        job.set_state(JobState::Running);
        self.running.borrow_mut().insert(id, Rc::clone(job));

        match action {
            DispatchAction::NopSuccess => {
                self.completions.borrow_mut().push_back((id, JobState::Success));
            }
            DispatchAction::NopFailure => {
                self.completions.borrow_mut().push_back((id, JobState::Failure));
            }
            DispatchAction::CallStart | DispatchAction::CallStop | DispatchAction::CallReload => {
                let restarter = match self.restarters.get(job.unit().unit_type()) {
                    None => {
                        log::error!(
                            "no restarter for unit type '{}'",
                            job.unit().unit_type()
                        );
                        self.completions.borrow_mut().push_back((id, JobState::Failure));
                        return;
                    }
                    Some(r) => r,
                };

                let usec = restarter
                    .job_timeout_usec()
                    .unwrap_or(self.default_timeout_usec.get());
                if usec > 0 {
                    let timer = Rc::new(JobTimer::new(usec));
                    timer.attach(job, self);
                    job.set_timer(Rc::clone(&timer));
                    if self
                        .events
                        .add_source(Rc::clone(&timer) as Rc<dyn event::Source>)
                        .is_err()
                    {
                        log::error!("failed to add the job timeout source, skipping.");
                    } else if self
                        .events
                        .set_enabled(timer, EventState::OneShot)
                        .is_err()
                    {
                        log::error!("failed to enable the job timeout source, skipping.");
                    }
                }

                log::debug!(
                    "dispatching job {} ({:?} {})",
                    id,
                    job.run_kind(),
                    job.unit().id()
                );
                let accepted = match action {
                    DispatchAction::CallStart => restarter.start(id),
                    DispatchAction::CallStop => restarter.stop(id),
                    DispatchAction::CallReload => restarter.reload(id),
                    _ => unreachable!(),
                };

                if !accepted {
                    // synchronous rejection
                    self.completions.borrow_mut().push_back((id, JobState::Failure));
                }
            }
        }
    }

    fn do_complete(self: &Rc<Self>, id: JobId, result: JobState) {
        let job = match self.running.borrow_mut().remove(&id) {
            None => {
                // restarter bug or a very late completion; not fatal
                log::error!("completion for unknown job {}, ignoring.", id);
                return;
            }
            Some(v) => v,
        };

        if let Some(timer) = job.take_timer() {
            let _ = self.events.del_source(timer);
        }

        let finished_rk = job.run_kind();
        let nop = matches!(
            job.action(),
            Some(DispatchAction::NopSuccess) | Some(DispatchAction::NopFailure)
        );

        // a restart that finished its stop half goes around again as a start
        if !nop && result == JobState::Success && job.update_runkind() {
            job.unit().set_state(UnitState::Offline);
            self.console_result(&job, finished_rk, JobState::Success);
            job.set_state(JobState::Awaiting);
            return;
        }

        job.set_state(result);
        if !nop {
            self.unit_apply_result(&job, finished_rk, result);
        }
        // nothing-to-do resolutions are only worth a line when they carry a
        // verdict, like a verify
        if !nop || job.kind() == JobKind::Verify {
            self.console_result(&job, finished_rk, result);
        }

        if result.is_failed() {
            self.fail_requirers(&job);
        }
    }

    // the scheduler's own view of the unit after a completed phase; external
    // observers still report through the event sink
    fn unit_apply_result(&self, job: &Rc<Job>, run_kind: JobKind, result: JobState) {
        let unit = job.unit();
        match (run_kind, result) {
            (JobKind::Stop, JobState::Success) => unit.set_state(UnitState::Offline),
            (JobKind::Verify, _) => {}
            (_, JobState::Success) => unit.set_state(UnitState::Online),
            (JobKind::Stop, _) => {}
            (_, JobState::Failure) | (_, JobState::Timeout) => {
                unit.set_state(UnitState::Maintenance)
            }
            _ => {}
        }
    }

    /// A failed job takes its required requirers with it; non-required
    /// requirers continue on their own.
    fn fail_requirers(self: &Rc<Self>, job: &Rc<Job>) {
        for (from, required) in job.requirers() {
            if !required {
                continue;
            }

            match from.state() {
                JobState::Awaiting => {
                    from.set_state(JobState::Failure);
                    self.console_result(&from, from.run_kind(), JobState::Failure);
                    self.fail_requirers(&from);
                }
                JobState::Running => {
                    let rid = from.id().expect("a running job always has an id.");
                    if self.running.borrow_mut().remove(&rid).is_none() {
                        continue;
                    }
                    if let Some(timer) = from.take_timer() {
                        let _ = self.events.del_source(timer);
                    }
                    if let Some(r) = self.restarters.get(from.unit().unit_type()) {
                        r.cancel(rid);
                    }
                    from.set_state(JobState::Cancelled);
                    self.console_result(&from, from.run_kind(), JobState::Cancelled);
                    self.fail_requirers(&from);
                }
                _ => {}
            }
        }
    }

    // cancel whatever is still pending when a transaction is popped
    fn tx_abandon(&self, tx: &Rc<Transaction>) {
        for job in tx.jobs_all() {
            if job.state() == JobState::Awaiting {
                job.set_state(JobState::Cancelled);
                self.console_result(&job, job.run_kind(), JobState::Cancelled);
            }
        }
    }

    fn console_result(&self, job: &Rc<Job>, run_kind: JobKind, result: JobState) {
        let bracket = match result {
            JobState::Success => StatusBracket::Ok,
            JobState::Failure => StatusBracket::Fail,
            JobState::Timeout => StatusBracket::Time,
            JobState::Cancelled => StatusBracket::Cancel,
            JobState::Awaiting | JobState::Running => unreachable!("job has not completed."),
        };
        let left = format!(
            "{} {}",
            job_completion_verb(run_kind, result),
            job.unit().id()
        );
        logger::console_line(&left, bracket);
    }
}
