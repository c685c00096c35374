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

//! Deferred hydration of units discovered during graph traversal.

use super::base::EdgeRelation;
use super::datastore::UnitDb;
use crate::error::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The loader collaborator. `load_unit` is expected to call
/// `UnitDb::unit_install` (plus `edges_insert`) exactly once per known name;
/// unknown names are left as placeholders.
pub(crate) trait UnitLoader {
    fn load_unit(&self, name: &str) -> Result<()>;
}

/// One edge of a unit definition. `other` names the far endpoint.
#[derive(Clone, Debug)]
pub(crate) struct EdgeDef {
    pub(crate) relation: EdgeRelation,
    pub(crate) other: String,
}

/// A unit definition as handed over by whatever produces configuration.
#[derive(Clone, Debug)]
pub(crate) struct UnitSpec {
    pub(crate) aliases: Vec<String>,
    pub(crate) unit_type: String,
    /// edges from this unit
    pub(crate) out_edges: Vec<EdgeDef>,
    /// edges from `other` to this unit
    pub(crate) in_edges: Vec<EdgeDef>,
}

/// A table-backed loader. The daemon front-ends (and the tests) register
/// definitions here; anything else stays a placeholder.
pub(crate) struct StaticLoader {
    db: Rc<UnitDb>,
    table: RefCell<HashMap<String, Rc<UnitSpec>>>,
}

impl StaticLoader {
    pub(crate) fn new(dbr: &Rc<UnitDb>) -> StaticLoader {
        StaticLoader {
            db: Rc::clone(dbr),
            table: RefCell::new(HashMap::new()),
        }
    }

    /// register a definition under each of its aliases
    pub(crate) fn insert(&self, spec: UnitSpec) {
        let spec = Rc::new(spec);
        for alias in spec.aliases.iter() {
            self.table
                .borrow_mut()
                .insert(alias.clone(), Rc::clone(&spec));
        }
    }
}

impl UnitLoader for StaticLoader {
    fn load_unit(&self, name: &str) -> Result<()> {
        let spec = match self.table.borrow().get(name) {
            None => {
                log::debug!("no definition for {}, leaving the placeholder.", name);
                return Ok(());
            }
            Some(v) => Rc::clone(v),
        };

        let unit = self
            .db
            .unit_install(spec.aliases.clone(), &spec.unit_type);
        let id = unit.id().to_string();

        for edge in spec.out_edges.iter() {
            self.db.edges_insert(&id, edge.relation, &id, &edge.other)?;
        }
        for edge in spec.in_edges.iter() {
            self.db.edges_insert(&id, edge.relation, &edge.other, &id)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::base::UnitState;

    #[test]
    fn loader_installs_with_edges() {
        let db = Rc::new(UnitDb::new());
        let loader = StaticLoader::new(&db);
        loader.insert(UnitSpec {
            aliases: vec![String::from("web.service")],
            unit_type: String::from("service"),
            out_edges: vec![EdgeDef {
                relation: EdgeRelation::ADD_START | EdgeRelation::AFTER,
                other: String::from("db.service"),
            }],
            in_edges: vec![],
        });

        db.units_get_or_create("web.service");
        loader.load_unit("web.service").unwrap();

        let web = db.units_get("web.service").unwrap();
        assert_eq!(web.state(), UnitState::Offline);
        assert_eq!(web.unit_type(), "service");
        assert_eq!(web.out_edges().len(), 1);
        // the far endpoint was hydrated and queued
        assert!(db.units_get("db.service").is_some());
    }

    #[test]
    fn loader_keeps_unknown_placeholder() {
        let db = Rc::new(UnitDb::new());
        let loader = StaticLoader::new(&db);

        let unit = db.units_get_or_create("ghost.service");
        loader.load_unit("ghost.service").unwrap();
        assert_eq!(unit.state(), UnitState::Uninitialised);
    }
}
