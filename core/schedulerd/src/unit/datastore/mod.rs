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

//! The unit object storage: alias resolution, placeholder hydration, edge
//! installation and the load queue.

use super::base::{EdgeRelation, UnitState};
use super::entry::{GraphEdge, UnitX};
use crate::error::*;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

mod deps;
mod sets;

use sets::UnitSets;

// units discovered by reference get this restarter class until loaded
const PLACEHOLDER_UNIT_TYPE: &str = "target";

pub(crate) struct UnitDb {
    units: UnitSets,
    load_queue: RefCell<VecDeque<String>>,
}

impl UnitDb {
    pub(crate) fn new() -> UnitDb {
        UnitDb {
            units: UnitSets::new(),
            load_queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn units_get(&self, name: &str) -> Option<Rc<UnitX>> {
        self.units.get(name)
    }

    /// Look a unit up, creating an unloaded placeholder on first reference.
    /// Placeholder names are queued for the loader.
    pub(crate) fn units_get_or_create(&self, name: &str) -> Rc<UnitX> {
        if let Some(unit) = self.units.get(name) {
            return unit;
        }

        let unit = Rc::new(UnitX::new(
            vec![name.to_string()],
            PLACEHOLDER_UNIT_TYPE,
        ));
        self.units.insert(name.to_string(), Rc::clone(&unit));
        self.load_queue.borrow_mut().push_back(name.to_string());
        unit
    }

    #[allow(dead_code)]
    pub(crate) fn units_get_all(&self) -> Vec<Rc<UnitX>> {
        self.units.get_all()
    }

    /// Install a loaded unit, replacing whatever instance currently answers
    /// to any of the aliases. Edges the replaced configuration introduced are
    /// dropped; edges it did not own move to the new instance.
    pub(crate) fn unit_install(&self, aliases: Vec<String>, unit_type: &str) -> Rc<UnitX> {
        assert!(!aliases.is_empty());

        let mut olds: Vec<Rc<UnitX>> = Vec::new();
        for alias in aliases.iter() {
            if let Some(unit) = self.units.get(alias) {
                if !olds.iter().any(|u| Rc::ptr_eq(u, &unit)) {
                    olds.push(unit);
                }
            }
        }

        let mut owner_names = aliases.clone();
        for old in olds.iter() {
            for alias in old.aliases() {
                if !owner_names.iter().any(|a| a == alias) {
                    owner_names.push(alias.clone());
                }
            }
        }
        deps::edges_disown(&self.units.get_all(), &owner_names);

        let new = Rc::new(UnitX::new(aliases.clone(), unit_type));
        match olds.first() {
            Some(old) => new.set_state(old.state()),
            None => new.set_state(UnitState::Offline),
        }

        for old in olds.iter() {
            for alias in old.aliases() {
                self.units.remove(alias);
            }
            deps::edges_migrate(old, &new);
        }

        for alias in aliases {
            self.units.insert(alias, Rc::clone(&new));
        }

        new
    }

    /// Add an edge, hydrating absent endpoints as placeholders.
    pub(crate) fn edges_insert(
        &self,
        owner: &str,
        relation: EdgeRelation,
        from: &str,
        to: &str,
    ) -> Result<Rc<GraphEdge>> {
        if relation.is_empty() {
            return Err(Error::GraphInvariant {
                what: format!("edge {} -> {} carries no relation", from, to),
            });
        }
        if from == to {
            return Err(Error::GraphInvariant {
                what: format!("self-edge on {}", from),
            });
        }

        let from_unit = self.units_get_or_create(from);
        let to_unit = self.units_get_or_create(to);
        Ok(deps::edge_attach(owner, relation, &from_unit, &to_unit))
    }

    /// Units `unit` must be ordered after, within the current graph.
    pub(crate) fn ordering_successors(&self, unit: &UnitX) -> Vec<Rc<UnitX>> {
        deps::ordering_successors(unit, |name| self.units.get(name))
    }

    /// Units ordered after `unit`.
    pub(crate) fn ordering_predecessors(&self, unit: &UnitX) -> Vec<Rc<UnitX>> {
        deps::ordering_predecessors(unit, |name| self.units.get(name))
    }

    pub(crate) fn load_queue_pop(&self) -> Option<String> {
        self.load_queue.borrow_mut().pop_front()
    }

    #[allow(dead_code)]
    pub(crate) fn load_queue_len(&self) -> usize {
        self.load_queue.borrow().len()
    }

    #[allow(dead_code)]
    pub(crate) fn clear(&self) {
        self.units.clear();
        self.load_queue.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_placeholder_is_queued_once() {
        let db = UnitDb::new();
        let unit = db.units_get_or_create("app.service");
        assert_eq!(unit.state(), UnitState::Uninitialised);
        assert_eq!(db.load_queue_len(), 1);

        let again = db.units_get_or_create("app.service");
        assert!(Rc::ptr_eq(&unit, &again));
        assert_eq!(db.load_queue_len(), 1);
    }

    #[test]
    fn db_edges_hydrate_endpoints() {
        let db = UnitDb::new();
        db.edges_insert(
            "a.service",
            EdgeRelation::ADD_START | EdgeRelation::AFTER,
            "a.service",
            "b.service",
        )
        .unwrap();

        assert!(db.units_get("a.service").is_some());
        assert!(db.units_get("b.service").is_some());
        assert_eq!(db.load_queue_len(), 2);

        let a = db.units_get("a.service").unwrap();
        let succs = db.ordering_successors(&a);
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].id(), "b.service");
    }

    #[test]
    fn db_edges_reject_degenerate_input() {
        let db = UnitDb::new();
        let ret = db.edges_insert("a.service", EdgeRelation::empty(), "a.service", "b.service");
        assert!(ret.is_err());
        let ret = db.edges_insert("a.service", EdgeRelation::AFTER, "a.service", "a.service");
        assert!(ret.is_err());
    }

    #[test]
    fn db_before_normalizes_to_reverse_after() {
        let db = UnitDb::new();
        db.edges_insert(
            "early.service",
            EdgeRelation::BEFORE,
            "early.service",
            "late.service",
        )
        .unwrap();

        // late.service must now order itself after early.service
        let late = db.units_get("late.service").unwrap();
        let succs = db.ordering_successors(&late);
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].id(), "early.service");

        let early = db.units_get("early.service").unwrap();
        let preds = db.ordering_predecessors(&early);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].id(), "late.service");
    }

    #[test]
    fn db_install_replaces_and_migrates() {
        let db = UnitDb::new();

        // www.service pulls in db.service; this edge is owned by www.service
        db.edges_insert(
            "www.service",
            EdgeRelation::ADD_START,
            "www.service",
            "db.service",
        )
        .unwrap();

        // an edge owned by a third unit pointing at db.service
        db.edges_insert(
            "backup.service",
            EdgeRelation::AFTER,
            "backup.service",
            "db.service",
        )
        .unwrap();

        let old = db.units_get("db.service").unwrap();
        old.set_state(UnitState::Online);

        // reload db.service under an extra alias
        let new = db.unit_install(
            vec![String::from("db.service"), String::from("postgres.service")],
            "service",
        );

        assert!(!Rc::ptr_eq(&old, &new));
        assert_eq!(new.state(), UnitState::Online);
        let resolved = db.units_get("postgres.service").unwrap();
        assert!(Rc::ptr_eq(&resolved, &new));

        // the third-party edges survived and now reach the new instance
        let www = db.units_get("www.service").unwrap();
        assert_eq!(www.out_edges().len(), 1);
        assert_eq!(new.in_edges().len(), 2);
    }

    #[test]
    fn db_install_drops_owned_edges() {
        let db = UnitDb::new();
        db.edges_insert(
            "app.service",
            EdgeRelation::ADD_START,
            "app.service",
            "db.service",
        )
        .unwrap();

        let app = db.units_get("app.service").unwrap();
        assert_eq!(app.out_edges().len(), 1);

        // reinstalling app.service drops the edge its old configuration owned
        let new = db.unit_install(vec![String::from("app.service")], "service");
        assert_eq!(new.out_edges().len(), 0);

        let dbu = db.units_get("db.service").unwrap();
        assert_eq!(dbu.in_edges().len(), 0);
    }
}
