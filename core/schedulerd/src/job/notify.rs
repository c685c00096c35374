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

//! Mapping from asynchronous unit state changes to the corrective jobs the
//! after-the-fact edge relations ask for. The jobs land in a
//! pseudo-transaction that rides the normal generation pipeline.

use super::entry::JobKind;
use crate::unit::{EdgeRelation, UnitDb, UnitState, UnitX};
use std::rc::Rc;

/// What jobs does this (unexpected) state transition imply? Each entry names
/// the far endpoint of a triggered edge and the operation to submit on it.
pub(super) fn job_notify_events(
    db: &UnitDb,
    unit: &UnitX,
    os: UnitState,
    ns: UnitState,
) -> Vec<(Rc<UnitX>, JobKind)> {
    let started = !os.is_online() && ns.is_online();
    let stopped = os.is_online() && ns == UnitState::Offline;
    let failed = ns == UnitState::Maintenance && os != UnitState::Maintenance;

    let mut targets = Vec::new();
    for edge in unit.out_edges() {
        let rel = edge.relation();
        let to = match db.units_get(edge.to()) {
            None => continue,
            Some(v) => v,
        };

        if started {
            if rel.contains(EdgeRelation::START_ON_STARTED) {
                targets.push((Rc::clone(&to), JobKind::Start));
            }
            if rel.contains(EdgeRelation::TRY_START_ON_STARTED) {
                targets.push((Rc::clone(&to), JobKind::TryStart));
            }
            if rel.contains(EdgeRelation::STOP_ON_STARTED) {
                targets.push((Rc::clone(&to), JobKind::Stop));
            }
        }

        if stopped {
            if rel.contains(EdgeRelation::ON_SUCCESS) {
                targets.push((Rc::clone(&to), JobKind::Start));
            }
            if rel.contains(EdgeRelation::STOP_ON_STOPPED) {
                targets.push((Rc::clone(&to), JobKind::Stop));
            }
        }

        if failed && rel.contains(EdgeRelation::ON_FAILURE) {
            targets.push((Rc::clone(&to), JobKind::Start));
        }
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn prepare() -> (Rc<UnitDb>, Rc<UnitX>, Rc<UnitX>) {
        let db = Rc::new(UnitDb::new());
        let v = db.unit_install(vec![String::from("v.service")], "service");
        let w = db.unit_install(vec![String::from("w.service")], "service");
        (db, v, w)
    }

    #[test]
    fn notify_on_success_starts_dependent() {
        let (db, v, w) = prepare();
        db.edges_insert("v.service", EdgeRelation::ON_SUCCESS, "v.service", "w.service")
            .unwrap();

        let targets = job_notify_events(&db, &v, UnitState::Online, UnitState::Offline);
        assert_eq!(targets.len(), 1);
        assert!(Rc::ptr_eq(&targets[0].0, &w));
        assert_eq!(targets[0].1, JobKind::Start);

        // a failure transition does not trigger ON_SUCCESS
        let targets = job_notify_events(&db, &v, UnitState::Online, UnitState::Maintenance);
        assert!(targets.is_empty());
    }

    #[test]
    fn notify_unexpected_start() {
        let (db, v, _w) = prepare();
        db.edges_insert(
            "v.service",
            EdgeRelation::STOP_ON_STARTED,
            "v.service",
            "w.service",
        )
        .unwrap();
        db.edges_insert(
            "v.service",
            EdgeRelation::TRY_START_ON_STARTED,
            "v.service",
            "x.service",
        )
        .unwrap();

        let mut targets = job_notify_events(&db, &v, UnitState::Offline, UnitState::Online);
        targets.sort_by(|a, b| a.0.id().cmp(b.0.id()));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].1, JobKind::Stop);
        assert_eq!(targets[1].1, JobKind::TryStart);
    }

    #[test]
    fn notify_on_failure() {
        let (db, v, w) = prepare();
        db.edges_insert("v.service", EdgeRelation::ON_FAILURE, "v.service", "w.service")
            .unwrap();

        let targets = job_notify_events(&db, &v, UnitState::Starting, UnitState::Maintenance);
        assert_eq!(targets.len(), 1);
        assert!(Rc::ptr_eq(&targets[0].0, &w));
    }
}
