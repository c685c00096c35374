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

//! The daemon facade: owns the reactor, the unit graph, the transaction
//! engine and the restarter registry, and wires signals for a graceful stop.

use crate::config::SchedConfig;
use crate::error::*;
use crate::job::{JobKind, JobManager};
use crate::restarter::{RestarterDb, TargetRestarter};
use crate::unit::{UnitDb, UnitLoader, UnitState};
use event::{EventState, EventType, Events, Source};
use nix::sys::signal::Signal;
use snafu::ResultExt;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct Manager {
    events: Rc<Events>,
    db: Rc<UnitDb>,
    restarters: Rc<RestarterDb>,
    jm: Rc<JobManager>,
    loader: RefCell<Option<Rc<dyn UnitLoader>>>,
}

impl Manager {
    pub(crate) fn new(config: &SchedConfig) -> Result<Rc<Manager>> {
        let events = Rc::new(Events::new().context(EventSnafu)?);
        let db = Rc::new(UnitDb::new());
        let restarters = Rc::new(RestarterDb::new());
        let jm = Rc::new(JobManager::new(
            &events,
            &db,
            &restarters,
            config.job_timeout_msec * 1000,
        ));

        let manager = Rc::new(Manager {
            events,
            db,
            restarters,
            jm,
            loader: RefCell::new(None),
        });

        // targets always work out of the box
        let target = Rc::new(TargetRestarter::new());
        target.attach(&manager.jm);
        manager.restarters.register("target", target);

        let signals = Rc::new(SignalMgr::new(&manager));
        manager
            .events
            .add_source(Rc::clone(&signals) as Rc<dyn Source>)
            .context(EventSnafu)?;
        manager
            .events
            .set_enabled(signals, EventState::On)
            .context(EventSnafu)?;

        Ok(manager)
    }

    pub(crate) fn db(&self) -> &Rc<UnitDb> {
        &self.db
    }

    pub(crate) fn restarters(&self) -> &Rc<RestarterDb> {
        &self.restarters
    }

    pub(crate) fn job_manager(&self) -> &Rc<JobManager> {
        &self.jm
    }

    pub(crate) fn set_loader(&self, loader: Rc<dyn UnitLoader>) {
        *self.loader.borrow_mut() = Some(loader);
    }

    /// Hydrate every queued placeholder through the loader. Names queued
    /// while a definition installs are drained in the same pass.
    pub(crate) fn dispatch_load_queue(&self) {
        let loader = self.loader.borrow().as_ref().map(Rc::clone);
        loop {
            let name = match self.db.load_queue_pop() {
                None => break,
                Some(v) => v,
            };
            match loader.as_ref() {
                None => log::debug!("no loader, {} stays a placeholder.", name),
                Some(l) => {
                    if let Err(e) = l.load_unit(&name) {
                        log::error!("failed to load {}: {}", name, e);
                    }
                }
            }
        }
    }

    /// Bring a unit to a requested state.
    pub(crate) fn enqueue(&self, name: &str, kind: JobKind) -> Result<()> {
        self.dispatch_load_queue();
        let unit = self.db.units_get(name).ok_or(Error::NotFound {
            what: name.to_string(),
        })?;
        self.jm.exec(&unit, kind)?;
        // the expansion may have referenced units nobody loaded yet
        self.dispatch_load_queue();
        Ok(())
    }

    /// The event sink: an external observer reports a unit state. Expected
    /// changes (a job of ours is on the unit) just update the graph; anything
    /// else synthesizes corrective jobs.
    pub(crate) fn set_state(&self, name: &str, state: UnitState) -> Result<()> {
        let unit = self.db.units_get(name).ok_or(Error::NotFound {
            what: name.to_string(),
        })?;

        let old = unit.state();
        if old == state {
            return Ok(());
        }
        unit.set_state(state);

        if self.jm.has_active_job(&unit) {
            return Ok(());
        }

        log::info!("{}: unexpected {} -> {}", unit.id(), old, state);
        self.jm.notify_state_change(&unit, old, state);
        self.dispatch_load_queue();
        Ok(())
    }

    pub(crate) fn run(&self) -> Result<i32> {
        self.events.rloop().context(EventSnafu)
    }

    pub(crate) fn shutdown(&self) {
        log::info!("cancelling all transactions and leaving the loop.");
        self.jm.cancel_all();
        self.events.set_exit();
    }
}

/// SIGINT/SIGTERM bring the daemon down gracefully.
struct SignalMgr {
    manager: RefCell<Weak<Manager>>,
}

impl SignalMgr {
    fn new(manager: &Rc<Manager>) -> SignalMgr {
        SignalMgr {
            manager: RefCell::new(Rc::downgrade(manager)),
        }
    }
}

impl Source for SignalMgr {
    fn event_type(&self) -> EventType {
        EventType::Signal
    }

    fn signals(&self) -> Vec<Signal> {
        vec![Signal::SIGINT, Signal::SIGTERM]
    }

    fn token(&self) -> u64 {
        let data: u64 = unsafe { std::mem::transmute(self) };
        data
    }

    fn priority(&self) -> i8 {
        -10i8
    }

    fn dispatch(&self, events: &Events) -> i32 {
        if let Some(info) = events.read_signals() {
            log::info!("received signal {}, shutting down.", info.ssi_signo);
        }
        if let Some(manager) = self.manager.borrow().upgrade() {
            manager.shutdown();
        }
        0
    }

    fn description(&self) -> String {
        String::from("SignalMgr")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobState};
    use crate::restarter::Restarter;
    use crate::unit::{EdgeDef, EdgeRelation, StaticLoader, UnitSpec};
    use std::cell::Cell;
    use std::collections::HashSet;

    /// Records every restarter call and optionally completes, rejects or
    /// sits on jobs, per unit.
    struct TestRestarter {
        jm: RefCell<Weak<JobManager>>,
        calls: RefCell<Vec<(String, &'static str)>>,
        auto: Cell<Option<JobState>>,
        rejects: RefCell<HashSet<String>>,
        timeout_usec: Cell<Option<u64>>,
    }

    impl TestRestarter {
        fn new() -> TestRestarter {
            TestRestarter {
                jm: RefCell::new(Weak::new()),
                calls: RefCell::new(Vec::new()),
                auto: Cell::new(Some(JobState::Success)),
                rejects: RefCell::new(HashSet::new()),
                timeout_usec: Cell::new(None),
            }
        }

        fn attach(&self, jm: &Rc<JobManager>) {
            *self.jm.borrow_mut() = Rc::downgrade(jm);
        }

        fn dispatched(&self, id: JobId, verb: &'static str) -> bool {
            let jm = self.jm.borrow().upgrade().unwrap();
            let (unit, _) = jm.job_info(id).unwrap();
            self.calls.borrow_mut().push((unit.id().to_string(), verb));

            if self.rejects.borrow().contains(unit.id()) {
                return false;
            }
            if let Some(result) = self.auto.get() {
                jm.job_complete(id, result);
            }
            true
        }

        fn calls(&self) -> Vec<(String, &'static str)> {
            self.calls.borrow().clone()
        }
    }

    impl Restarter for TestRestarter {
        fn start(&self, id: JobId) -> bool {
            self.dispatched(id, "start")
        }
        fn stop(&self, id: JobId) -> bool {
            self.dispatched(id, "stop")
        }
        fn job_timeout_usec(&self) -> Option<u64> {
            self.timeout_usec.get()
        }
    }

    fn prepare() -> (Rc<Manager>, Rc<TestRestarter>) {
        crate::logger::init_log_to_console("manager_test", log::LevelFilter::Debug);
        let config = SchedConfig::default();
        let manager = Manager::new(&config).unwrap();

        let tr = Rc::new(TestRestarter::new());
        tr.attach(manager.job_manager());
        manager
            .restarters()
            .register("test", Rc::clone(&tr) as Rc<dyn crate::restarter::Restarter>);
        (manager, tr)
    }

    fn install(manager: &Manager, name: &str) -> Rc<crate::unit::UnitX> {
        manager.db().unit_install(vec![name.to_string()], "test")
    }

    #[test]
    fn mgr_cycle_resolves_and_orders_dispatch() {
        // C -(After|AddStart)-> B -(After|AddStartNonreq)-> A -(After)-> C
        let (manager, tr) = prepare();
        install(&manager, "a.test");
        install(&manager, "b.test");
        install(&manager, "c.test");
        let db = manager.db();
        db.edges_insert(
            "c.test",
            EdgeRelation::AFTER | EdgeRelation::ADD_START,
            "c.test",
            "b.test",
        )
        .unwrap();
        db.edges_insert(
            "b.test",
            EdgeRelation::AFTER | EdgeRelation::ADD_START_NONREQ,
            "b.test",
            "a.test",
        )
        .unwrap();
        db.edges_insert("a.test", EdgeRelation::AFTER, "a.test", "c.test")
            .unwrap();

        manager.enqueue("c.test", JobKind::Start).unwrap();

        // a's job fell to the cycle breaker; b ran before c
        let calls = tr.calls();
        assert_eq!(
            calls,
            vec![
                (String::from("b.test"), "start"),
                (String::from("c.test"), "start"),
            ]
        );
        assert_eq!(
            db.units_get("b.test").unwrap().state(),
            UnitState::Online
        );
        assert_eq!(
            db.units_get("c.test").unwrap().state(),
            UnitState::Online
        );
        assert_eq!(
            db.units_get("a.test").unwrap().state(),
            UnitState::Offline
        );
        assert_eq!(manager.job_manager().queue_len(), 0);
        assert_eq!(manager.job_manager().running_len(), 0);
    }

    #[test]
    fn mgr_rejection_fails_required_requirer() {
        let (manager, tr) = prepare();
        install(&manager, "x.test");
        install(&manager, "y.test");
        manager
            .db()
            .edges_insert(
                "x.test",
                EdgeRelation::ADD_START | EdgeRelation::AFTER,
                "x.test",
                "y.test",
            )
            .unwrap();
        tr.rejects.borrow_mut().insert(String::from("y.test"));

        manager.enqueue("x.test", JobKind::Start).unwrap();

        // y was rejected; x never reached its restarter
        assert_eq!(tr.calls(), vec![(String::from("y.test"), "start")]);
        assert_eq!(
            manager.db().units_get("y.test").unwrap().state(),
            UnitState::Maintenance
        );
        assert_eq!(
            manager.db().units_get("x.test").unwrap().state(),
            UnitState::Offline
        );
        assert_eq!(manager.job_manager().queue_len(), 0);
    }

    #[test]
    fn mgr_restart_propagates_and_stops_before_start() {
        let (manager, tr) = prepare();
        let z = install(&manager, "z.test");
        let w = install(&manager, "w.test");
        z.set_state(UnitState::Online);
        w.set_state(UnitState::Online);
        manager
            .db()
            .edges_insert(
                "z.test",
                EdgeRelation::PROPAGATES_RESTART_TO,
                "z.test",
                "w.test",
            )
            .unwrap();

        manager.enqueue("z.test", JobKind::Restart).unwrap();

        let calls = tr.calls();
        let z_stop = calls
            .iter()
            .position(|c| c == &(String::from("z.test"), "stop"))
            .unwrap();
        let z_start = calls
            .iter()
            .position(|c| c == &(String::from("z.test"), "start"))
            .unwrap();
        assert!(z_stop < z_start);

        // the propagated try-restart also went around both halves
        assert!(calls.contains(&(String::from("w.test"), "stop")));
        assert!(calls.contains(&(String::from("w.test"), "start")));
        assert_eq!(z.state(), UnitState::Online);
        assert_eq!(manager.job_manager().queue_len(), 0);
    }

    #[test]
    fn mgr_try_restart_of_down_unit_is_a_nop() {
        let (manager, tr) = prepare();
        install(&manager, "idle.test");

        manager.enqueue("idle.test", JobKind::TryRestart).unwrap();

        assert!(tr.calls().is_empty());
        assert_eq!(
            manager.db().units_get("idle.test").unwrap().state(),
            UnitState::Offline
        );
        assert_eq!(manager.job_manager().queue_len(), 0);
    }

    #[test]
    fn mgr_job_timeout_is_terminal() {
        let (manager, tr) = prepare();
        let slow = install(&manager, "slow.test");
        tr.auto.set(None); // accept and never complete
        tr.timeout_usec.set(Some(20_000)); // 20ms for the test

        manager.enqueue("slow.test", JobKind::Start).unwrap();
        assert_eq!(manager.job_manager().running_len(), 1);

        // drive the reactor until the timeout fires
        for _ in 0..100 {
            if manager.job_manager().running_len() == 0 {
                break;
            }
            manager.events.run(10).unwrap();
        }

        assert_eq!(manager.job_manager().running_len(), 0);
        assert_eq!(manager.job_manager().queue_len(), 0);
        assert_eq!(slow.state(), UnitState::Maintenance);
    }

    #[test]
    fn mgr_state_change_triggers_on_success() {
        let (manager, tr) = prepare();
        let v = install(&manager, "v.test");
        install(&manager, "w.test");
        v.set_state(UnitState::Online);
        manager
            .db()
            .edges_insert("v.test", EdgeRelation::ON_SUCCESS, "v.test", "w.test")
            .unwrap();

        manager.set_state("v.test", UnitState::Offline).unwrap();

        assert_eq!(tr.calls(), vec![(String::from("w.test"), "start")]);
        assert_eq!(
            manager.db().units_get("w.test").unwrap().state(),
            UnitState::Online
        );
    }

    #[test]
    fn mgr_expected_state_change_stays_quiet() {
        let (manager, tr) = prepare();
        let v = install(&manager, "v.test");
        install(&manager, "w.test");
        v.set_state(UnitState::Online);
        manager
            .db()
            .edges_insert("v.test", EdgeRelation::ON_SUCCESS, "v.test", "w.test")
            .unwrap();

        // sit on the stop job so it is still active when the state lands
        tr.auto.set(None);
        manager.enqueue("v.test", JobKind::Stop).unwrap();
        assert_eq!(manager.job_manager().running_len(), 1);

        manager.set_state("v.test", UnitState::Offline).unwrap();

        // only the stop call; no pseudo-transaction fired
        assert_eq!(tr.calls(), vec![(String::from("v.test"), "stop")]);
    }

    #[test]
    fn mgr_load_queue_drains_recursively() {
        let (manager, _tr) = prepare();
        let loader = Rc::new(StaticLoader::new(manager.db()));
        loader.insert(UnitSpec {
            aliases: vec![String::from("top.target")],
            unit_type: String::from("target"),
            out_edges: vec![EdgeDef {
                relation: EdgeRelation::ADD_START | EdgeRelation::AFTER,
                other: String::from("mid.target"),
            }],
            in_edges: vec![],
        });
        loader.insert(UnitSpec {
            aliases: vec![String::from("mid.target")],
            unit_type: String::from("target"),
            out_edges: vec![EdgeDef {
                relation: EdgeRelation::ADD_START | EdgeRelation::AFTER,
                other: String::from("leaf.target"),
            }],
            in_edges: vec![],
        });
        manager.set_loader(loader);

        manager.db().units_get_or_create("top.target");
        manager.dispatch_load_queue();

        // mid was queued while top installed, leaf while mid installed
        let mid = manager.db().units_get("mid.target").unwrap();
        assert_eq!(mid.state(), UnitState::Offline);
        assert!(manager.db().units_get("leaf.target").is_some());

        // the whole chain starts through the built-in target restarter
        manager.enqueue("top.target", JobKind::Start).unwrap();
        assert_eq!(
            manager.db().units_get("top.target").unwrap().state(),
            UnitState::Online
        );
        assert_eq!(mid.state(), UnitState::Online);
    }

    #[test]
    fn mgr_shutdown_cancels_everything() {
        let (manager, tr) = prepare();
        install(&manager, "held.test");
        tr.auto.set(None);
        tr.timeout_usec.set(Some(0)); // no timer in this test

        manager.enqueue("held.test", JobKind::Start).unwrap();
        assert_eq!(manager.job_manager().running_len(), 1);

        manager.shutdown();
        assert_eq!(manager.job_manager().running_len(), 0);
        assert_eq!(manager.job_manager().queue_len(), 0);
    }

    #[test]
    fn mgr_enqueue_unknown_unit_fails() {
        let (manager, _tr) = prepare();
        let ret = manager.enqueue("nosuch.test", JobKind::Start);
        assert!(matches!(ret, Err(Error::NotFound { .. })));
    }

    #[test]
    fn mgr_start_of_unloaded_unit_is_rejected() {
        let (manager, _tr) = prepare();
        manager.db().units_get_or_create("ghost.test");
        let ret = manager.enqueue("ghost.test", JobKind::Start);
        assert!(matches!(ret, Err(Error::Input)));
    }
}
