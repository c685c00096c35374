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

use super::manager::JobManagerData;
use crate::unit::{UnitState, UnitX};
use event::{EventType, Events, Source};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) type JobId = u64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum JobKind {
    // 'type' is better, but it's a keyword in rust
    /* basic: change or query the stage of one unit */
    Start,
    Verify,
    Stop,
    Reload,
    Restart,

    /* compound: resolved against the unit state at dispatch */
    TryStart,
    TryRestart,
    TryReload,
    ReloadOrStart,
    RestartOrStart,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum JobState {
    Awaiting,
    Running,
    Success,
    Failure,
    Timeout,
    Cancelled,
}

impl JobState {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Awaiting | JobState::Running)
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(
            self,
            JobState::Failure | JobState::Timeout | JobState::Cancelled
        )
    }
}

/// A requirement from one job that another job complete successfully.
///
/// Registered in `from.reqs` and `to.reqs_on`; both registrations disappear
/// together when either endpoint is unlinked.
pub(crate) struct Requirement {
    from: RefCell<Weak<Job>>,
    to: RefCell<Weak<Job>>,
    required: Cell<bool>,      // to's failure fails from
    goal_required: Cell<bool>, // to's failure fails the objective
}

impl Requirement {
    pub(crate) fn from_job(&self) -> Option<Rc<Job>> {
        self.from.borrow().upgrade()
    }

    pub(crate) fn to_job(&self) -> Option<Rc<Job>> {
        self.to.borrow().upgrade()
    }

    pub(crate) fn required(&self) -> bool {
        self.required.get()
    }

    pub(crate) fn goal_required(&self) -> bool {
        self.goal_required.get()
    }
}

/// A state-changing or state-querying task for one unit inside a transaction.
pub(crate) struct Job {
    // config
    unit: Rc<UnitX>,
    kind: Cell<JobKind>,

    // execution status
    id: Cell<Option<JobId>>, // assigned when admitted to execution
    state: Cell<JobState>,
    run_kind: Cell<JobKind>, // current phase, Restart runs Stop then Start
    goal_required: Cell<bool>,
    action: Cell<Option<DispatchAction>>, // how the last dispatch resolved
    timer: RefCell<Option<Rc<JobTimer>>>,

    // requirement links
    reqs: RefCell<Vec<Rc<Requirement>>>,    // to other jobs
    reqs_on: RefCell<Vec<Rc<Requirement>>>, // on this job
}

impl Job {
    pub(super) fn new(unit: &Rc<UnitX>, kind: JobKind) -> Job {
        Job {
            unit: Rc::clone(unit),
            kind: Cell::new(kind),
            id: Cell::new(None),
            state: Cell::new(JobState::Awaiting),
            run_kind: Cell::new(job_rkind_new(kind)),
            goal_required: Cell::new(false),
            action: Cell::new(None),
            timer: RefCell::new(None),
            reqs: RefCell::new(Vec::new()),
            reqs_on: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn unit(&self) -> &Rc<UnitX> {
        &self.unit
    }

    pub(crate) fn kind(&self) -> JobKind {
        self.kind.get()
    }

    pub(crate) fn state(&self) -> JobState {
        self.state.get()
    }

    pub(super) fn set_state(&self, state: JobState) {
        self.state.set(state);
    }

    pub(crate) fn run_kind(&self) -> JobKind {
        self.run_kind.get()
    }

    pub(super) fn set_run_kind(&self, kind: JobKind) {
        self.run_kind.set(kind);
    }

    pub(crate) fn id(&self) -> Option<JobId> {
        self.id.get()
    }

    pub(super) fn set_id(&self, id: JobId) {
        self.id.set(Some(id));
    }

    pub(crate) fn goal_required(&self) -> bool {
        self.goal_required.get()
    }

    pub(super) fn action(&self) -> Option<DispatchAction> {
        self.action.get()
    }

    pub(super) fn set_action(&self, action: DispatchAction) {
        self.action.set(Some(action));
    }

    pub(super) fn set_timer(&self, timer: Rc<JobTimer>) {
        *self.timer.borrow_mut() = Some(timer);
    }

    pub(super) fn take_timer(&self) -> Option<Rc<JobTimer>> {
        self.timer.borrow_mut().take()
    }

    /// Rewrite the operation after a merge. Only pending jobs may change.
    pub(super) fn set_kind(&self, kind: JobKind) {
        assert!(self.state.get() == JobState::Awaiting);
        self.kind.set(kind);
        self.run_kind.set(job_rkind_new(kind));
    }

    /// Add (or strengthen) a requirement on another job.
    pub(super) fn add_req(self: &Rc<Self>, on: &Rc<Job>, required: bool, goal_required: bool) {
        let goal = goal_required || (self.goal_required() && required);

        // the strongest flags win when several edges imply the same pair
        for req in self.reqs.borrow().iter() {
            if let Some(to) = req.to_job() {
                if Rc::ptr_eq(&to, on) {
                    if required {
                        req.required.set(true);
                    }
                    if goal {
                        req.goal_required.set(true);
                        on.promote_goal_required();
                    }
                    return;
                }
            }
        }

        let req = Rc::new(Requirement {
            from: RefCell::new(Rc::downgrade(self)),
            to: RefCell::new(Rc::downgrade(on)),
            required: Cell::new(required),
            goal_required: Cell::new(goal),
        });
        self.reqs.borrow_mut().push(Rc::clone(&req));
        on.reqs_on.borrow_mut().push(req);

        if goal {
            on.promote_goal_required();
        }
    }

    /// Mark this job as essential to the objective; sticky, and carried
    /// transitively through required requirements.
    pub(super) fn promote_goal_required(self: &Rc<Self>) {
        if self.goal_required.replace(true) {
            return;
        }

        let reqs = self.reqs.borrow().iter().map(Rc::clone).collect::<Vec<_>>();
        for req in reqs {
            if !req.required() {
                continue;
            }
            req.goal_required.set(true);
            if let Some(to) = req.to_job() {
                to.promote_goal_required();
            }
        }
    }

    /// jobs that require this one
    pub(crate) fn requirers(&self) -> Vec<(Rc<Job>, bool)> {
        self.reqs_on
            .borrow()
            .iter()
            .filter_map(|r| r.from_job().map(|j| (j, r.required())))
            .collect()
    }

    pub(crate) fn reqs(&self) -> Vec<Rc<Requirement>> {
        self.reqs.borrow().iter().map(Rc::clone).collect()
    }

    pub(crate) fn reqs_on(&self) -> Vec<Rc<Requirement>> {
        self.reqs_on.borrow().iter().map(Rc::clone).collect()
    }

    /// Drop every requirement touching this job, on both sides of each link.
    pub(super) fn unlink_reqs(&self) {
        let outgoing = self.reqs.borrow_mut().drain(..).collect::<Vec<_>>();
        for req in outgoing.iter() {
            if let Some(to) = req.to_job() {
                to.reqs_on.borrow_mut().retain(|r| !Rc::ptr_eq(r, req));
            }
        }

        let incoming = self.reqs_on.borrow_mut().drain(..).collect::<Vec<_>>();
        for req in incoming.iter() {
            if let Some(from) = req.from_job() {
                from.reqs.borrow_mut().retain(|r| !Rc::ptr_eq(r, req));
            }
        }
    }

    /// On success of the stop half of a restart, move to the start half.
    /// Returns true when the job re-enters the queue.
    pub(super) fn update_runkind(&self) -> bool {
        match (self.kind.get(), self.run_kind.get()) {
            (JobKind::Restart, JobKind::Stop)
            | (JobKind::TryRestart, JobKind::Stop)
            | (JobKind::RestartOrStart, JobKind::Stop) => {
                self.run_kind.set(JobKind::Start);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("unit", &self.unit.id())
            .field("kind", &self.kind.get())
            .field("run_kind", &self.run_kind.get())
            .field("state", &self.state.get())
            .field("goal_required", &self.goal_required.get())
            .finish()
    }
}

/// Merge a second job onto `survivor`, leaving `other` fully unlinked.
pub(super) fn job_merge_into(survivor: &Rc<Job>, other: &Rc<Job>, merged: JobKind) {
    if survivor.kind() != merged {
        survivor.set_kind(merged);
    }
    if other.goal_required() {
        survivor.promote_goal_required();
    }

    // the survivor inherits both sides of the other's requirement links
    for req in other.reqs() {
        if let Some(to) = req.to_job() {
            if !Rc::ptr_eq(&to, survivor) {
                survivor.add_req(&to, req.required(), req.goal_required());
            }
        }
    }
    for req in other.reqs_on() {
        if let Some(from) = req.from_job() {
            if !Rc::ptr_eq(&from, survivor) {
                from.add_req(survivor, req.required(), req.goal_required());
            }
        }
    }

    other.unlink_reqs();
}

/// What kind of job does a ⊕ b collapse to on one unit?
/// Total, symmetric, idempotent; `None` is an invalid merge.
pub(crate) fn job_merge_kinds(a: JobKind, b: JobKind) -> Option<JobKind> {
    if a == b {
        return Some(a);
    }
    if a == JobKind::Stop || b == JobKind::Stop {
        return None;
    }
    merge_table(a, b).or_else(|| merge_table(b, a))
}

fn merge_table(a: JobKind, b: JobKind) -> Option<JobKind> {
    use JobKind::*;
    match (a, b) {
        (Start, Verify) => Some(Start),
        (Start, Reload) => Some(Start),
        (Start, Restart) => Some(Restart),
        (Start, TryStart) => Some(Start),
        (Start, TryRestart) => Some(RestartOrStart),
        (Start, TryReload) => Some(Start),
        (Start, ReloadOrStart) => Some(ReloadOrStart),
        (Start, RestartOrStart) => Some(RestartOrStart),
        (Verify, Reload) => Some(Reload),
        (Verify, Restart) => Some(Restart),
        (Verify, TryStart) => Some(TryStart),
        (Verify, TryRestart) => Some(TryRestart),
        (Verify, TryReload) => Some(TryReload),
        (Verify, ReloadOrStart) => Some(ReloadOrStart),
        (Verify, RestartOrStart) => Some(RestartOrStart),
        (Reload, Restart) => Some(Restart),
        (Reload, TryStart) => Some(ReloadOrStart),
        (Reload, TryRestart) => Some(TryRestart),
        (Reload, TryReload) => Some(Reload),
        (Reload, ReloadOrStart) => Some(ReloadOrStart),
        (Reload, RestartOrStart) => Some(RestartOrStart),
        (Restart, TryStart) => Some(Restart),
        (Restart, TryRestart) => Some(Restart),
        (Restart, TryReload) => Some(Restart),
        (Restart, ReloadOrStart) => Some(Restart),
        (Restart, RestartOrStart) => Some(RestartOrStart),
        (TryStart, TryRestart) => Some(RestartOrStart),
        (TryStart, TryReload) => Some(ReloadOrStart),
        (TryStart, ReloadOrStart) => Some(ReloadOrStart),
        (TryStart, RestartOrStart) => Some(RestartOrStart),
        (TryRestart, TryReload) => Some(TryRestart),
        (TryRestart, ReloadOrStart) => Some(RestartOrStart),
        (TryRestart, RestartOrStart) => Some(RestartOrStart),
        (TryReload, ReloadOrStart) => Some(ReloadOrStart),
        (TryReload, RestartOrStart) => Some(RestartOrStart),
        (ReloadOrStart, RestartOrStart) => Some(RestartOrStart),
        _ => None,
    }
}

/// the phase a freshly created job starts in
fn job_rkind_new(kind: JobKind) -> JobKind {
    match kind {
        JobKind::Restart | JobKind::TryRestart | JobKind::RestartOrStart => JobKind::Stop,
        JobKind::TryStart => JobKind::Start,
        JobKind::TryReload | JobKind::ReloadOrStart => JobKind::Reload,
        kind => kind,
    }
}

/// What the dispatcher should do for a job, given the unit state now.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum DispatchAction {
    CallStart,
    CallStop,
    CallReload,
    /// try-flavors on a unit that is down: nothing to do
    NopSuccess,
    /// verify of a unit that is down
    NopFailure,
}

pub(super) fn job_dispatch_action(job: &Job) -> DispatchAction {
    let online = job.unit().state().is_online();

    match job.run_kind() {
        JobKind::Stop => match (job.kind(), online) {
            (JobKind::Stop, true) => DispatchAction::CallStop,
            (JobKind::Stop, false) => DispatchAction::NopSuccess,
            (_, true) => DispatchAction::CallStop, // stop half of a restart
            (JobKind::TryRestart, false) => DispatchAction::NopSuccess,
            (_, false) => {
                // restarting something that is down means starting it
                job.set_run_kind(JobKind::Start);
                DispatchAction::CallStart
            }
        },
        JobKind::Reload => match (job.kind(), online) {
            (_, true) => DispatchAction::CallReload,
            (JobKind::TryReload, false) => DispatchAction::NopSuccess,
            (_, false) => {
                // reload-or-start of something that is down
                job.set_run_kind(JobKind::Start);
                DispatchAction::CallStart
            }
        },
        JobKind::Verify => {
            if online {
                DispatchAction::NopSuccess
            } else {
                DispatchAction::NopFailure
            }
        }
        _ => DispatchAction::CallStart,
    }
}

/// Does this job run before the target of its `After` edges? Stop-phase
/// jobs do; everything else waits.
pub(crate) fn job_order_inverted(job: &Job) -> bool {
    job.run_kind() == JobKind::Stop
}

/// One-shot timeout for a dispatched job.
pub(super) struct JobTimer {
    time_usec: Cell<u64>,
    job: RefCell<Weak<Job>>,
    jm: RefCell<Weak<JobManagerData>>,
}

impl JobTimer {
    pub(super) fn new(usec: u64) -> JobTimer {
        JobTimer {
            time_usec: Cell::new(usec),
            job: RefCell::new(Weak::new()),
            jm: RefCell::new(Weak::new()),
        }
    }

    pub(super) fn attach(&self, job: &Rc<Job>, jm: &Rc<JobManagerData>) {
        *self.job.borrow_mut() = Rc::downgrade(job);
        *self.jm.borrow_mut() = Rc::downgrade(jm);
    }

    fn do_dispatch(&self) -> i32 {
        let job = match self.job.borrow().upgrade() {
            None => {
                log::info!("the job has already been removed, skipping.");
                return 0;
            }
            Some(v) => v,
        };
        let jm = match self.jm.borrow().upgrade() {
            None => return 0,
            Some(v) => v,
        };

        log::info!("job {:?} of unit {} timed out", job.kind(), job.unit().id());
        if let Some(id) = job.id() {
            jm.job_expired(id);
        }
        0
    }
}

impl Source for JobTimer {
    fn event_type(&self) -> EventType {
        EventType::TimerMonotonic
    }

    fn time_relative(&self) -> u64 {
        self.time_usec.get()
    }

    fn dispatch(&self, _: &Events) -> i32 {
        self.do_dispatch()
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn priority(&self) -> i8 {
        0i8
    }

    fn description(&self) -> String {
        String::from("JobTimer")
    }
}

/// the restarter verb a completed phase is reported under
pub(super) fn job_completion_verb(run_kind: JobKind, result: JobState) -> String {
    let doing = match run_kind {
        JobKind::Stop => "stopping",
        JobKind::Reload => "reloading",
        JobKind::Verify => "verifying",
        _ => "starting",
    };
    let done = match run_kind {
        JobKind::Stop => "Stopped",
        JobKind::Reload => "Reloaded",
        JobKind::Verify => "Verified",
        _ => "Started",
    };

    match result {
        JobState::Success => done.to_string(),
        JobState::Failure => format!("Failed {}", doing),
        JobState::Timeout => format!("Timed out {}", doing),
        JobState::Cancelled => format!("Cancelled {}", doing),
        JobState::Awaiting | JobState::Running => unreachable!("job has not completed."),
    }
}

/// is the unit in a shape this operation can be applied to
pub(super) fn job_is_unit_applicable(kind: JobKind, unit: &UnitX) -> bool {
    match kind {
        JobKind::Stop => true,
        _ => unit.state() != UnitState::Uninitialised,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitX;

    const ALL_KINDS: [JobKind; 10] = [
        JobKind::Start,
        JobKind::Verify,
        JobKind::Stop,
        JobKind::Reload,
        JobKind::Restart,
        JobKind::TryStart,
        JobKind::TryRestart,
        JobKind::TryReload,
        JobKind::ReloadOrStart,
        JobKind::RestartOrStart,
    ];

    fn test_unit(name: &str) -> Rc<UnitX> {
        Rc::new(UnitX::new(vec![name.to_string()], "service"))
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        for a in ALL_KINDS {
            assert_eq!(job_merge_kinds(a, a), Some(a));
            for b in ALL_KINDS {
                assert_eq!(job_merge_kinds(a, b), job_merge_kinds(b, a));
            }
        }
    }

    #[test]
    fn merge_is_total() {
        // every non-Stop pair collapses; Stop only merges with itself
        for a in ALL_KINDS {
            for b in ALL_KINDS {
                let ret = job_merge_kinds(a, b);
                if a == JobKind::Stop || b == JobKind::Stop {
                    assert_eq!(ret.is_some(), a == b);
                } else {
                    assert!(ret.is_some(), "{:?} + {:?} has no entry", a, b);
                }
            }
        }
    }

    #[test]
    fn merge_key_cells() {
        assert_eq!(
            job_merge_kinds(JobKind::Start, JobKind::Verify),
            Some(JobKind::Start)
        );
        assert_eq!(
            job_merge_kinds(JobKind::Start, JobKind::Reload),
            Some(JobKind::Start)
        );
        assert_eq!(
            job_merge_kinds(JobKind::Start, JobKind::Restart),
            Some(JobKind::Restart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::Restart, JobKind::Reload),
            Some(JobKind::Restart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::Restart, JobKind::Verify),
            Some(JobKind::Restart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::TryStart, JobKind::Start),
            Some(JobKind::Start)
        );
        assert_eq!(
            job_merge_kinds(JobKind::TryRestart, JobKind::Reload),
            Some(JobKind::TryRestart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::TryRestart, JobKind::Restart),
            Some(JobKind::Restart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::ReloadOrStart, JobKind::Reload),
            Some(JobKind::ReloadOrStart)
        );
        assert_eq!(
            job_merge_kinds(JobKind::ReloadOrStart, JobKind::Start),
            Some(JobKind::ReloadOrStart)
        );
        assert_eq!(job_merge_kinds(JobKind::Stop, JobKind::Start), None);
        assert_eq!(job_merge_kinds(JobKind::Stop, JobKind::Reload), None);
    }

    #[test]
    fn requirement_links_both_sides() {
        let j1 = Rc::new(Job::new(&test_unit("a.service"), JobKind::Start));
        let j2 = Rc::new(Job::new(&test_unit("b.service"), JobKind::Start));

        j1.add_req(&j2, true, false);
        assert_eq!(j1.reqs().len(), 1);
        assert_eq!(j2.reqs_on().len(), 1);

        j2.unlink_reqs();
        assert_eq!(j1.reqs().len(), 0);
        assert_eq!(j2.reqs_on().len(), 0);
    }

    #[test]
    fn requirement_flags_strengthen_only() {
        let j1 = Rc::new(Job::new(&test_unit("a.service"), JobKind::Start));
        let j2 = Rc::new(Job::new(&test_unit("b.service"), JobKind::Start));

        j1.add_req(&j2, false, false);
        assert!(!j1.reqs()[0].required());

        // a second edge implying the same pair upgrades the link in place
        j1.add_req(&j2, true, false);
        assert_eq!(j1.reqs().len(), 1);
        assert!(j1.reqs()[0].required());
    }

    #[test]
    fn goal_promotion_rides_required_links() {
        let j1 = Rc::new(Job::new(&test_unit("a.service"), JobKind::Start));
        let j2 = Rc::new(Job::new(&test_unit("b.service"), JobKind::Start));
        let j3 = Rc::new(Job::new(&test_unit("c.service"), JobKind::Start));
        let j4 = Rc::new(Job::new(&test_unit("d.service"), JobKind::Start));

        j1.add_req(&j2, true, false);
        j2.add_req(&j3, true, false);
        j2.add_req(&j4, false, false);

        j1.promote_goal_required();
        assert!(j1.goal_required());
        assert!(j2.goal_required());
        assert!(j3.goal_required());
        // the non-required branch is not essential
        assert!(!j4.goal_required());
    }

    #[test]
    fn restart_promotes_to_start_half() {
        let job = Job::new(&test_unit("a.service"), JobKind::Restart);
        assert_eq!(job.run_kind(), JobKind::Stop);
        assert!(job.update_runkind());
        assert_eq!(job.run_kind(), JobKind::Start);
        // the start half is the last one
        assert!(!job.update_runkind());
    }

    #[test]
    fn stop_phase_inverts_ordering() {
        let stop = Job::new(&test_unit("a.service"), JobKind::Stop);
        let restart = Job::new(&test_unit("b.service"), JobKind::Restart);
        let start = Job::new(&test_unit("c.service"), JobKind::Start);

        assert!(job_order_inverted(&stop));
        assert!(job_order_inverted(&restart)); // still in its stop half
        assert!(!job_order_inverted(&start));

        restart.update_runkind();
        assert!(!job_order_inverted(&restart));
    }

    #[test]
    fn completion_verbs() {
        assert_eq!(
            job_completion_verb(JobKind::Start, JobState::Success),
            "Started"
        );
        assert_eq!(
            job_completion_verb(JobKind::Stop, JobState::Success),
            "Stopped"
        );
        assert_eq!(
            job_completion_verb(JobKind::Start, JobState::Timeout),
            "Timed out starting"
        );
        assert_eq!(
            job_completion_verb(JobKind::Start, JobState::Cancelled),
            "Cancelled starting"
        );
    }
}
