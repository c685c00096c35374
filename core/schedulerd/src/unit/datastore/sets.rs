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

use super::super::entry::UnitX;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// The alias map. Every alias resolves to at most one unit at a time; a unit
/// appears once per alias it owns.
pub(super) struct UnitSets {
    t: RefCell<HashMap<String, Rc<UnitX>>>,
}

impl UnitSets {
    pub(super) fn new() -> UnitSets {
        UnitSets {
            t: RefCell::new(HashMap::new()),
        }
    }

    pub(super) fn insert(&self, alias: String, unit: Rc<UnitX>) -> Option<Rc<UnitX>> {
        self.t.borrow_mut().insert(alias, unit)
    }

    pub(super) fn remove(&self, alias: &str) -> Option<Rc<UnitX>> {
        self.t.borrow_mut().remove(alias)
    }

    pub(super) fn get(&self, alias: &str) -> Option<Rc<UnitX>> {
        self.t.borrow().get(alias).map(Rc::clone)
    }

    /// every distinct unit, regardless of how many aliases point at it
    pub(super) fn get_all(&self) -> Vec<Rc<UnitX>> {
        let mut units: Vec<Rc<UnitX>> = Vec::new();
        for unit in self.t.borrow().values() {
            if !units.iter().any(|u| Rc::ptr_eq(u, unit)) {
                units.push(Rc::clone(unit));
            }
        }
        units
    }

    pub(super) fn clear(&self) {
        self.t.borrow_mut().clear();
    }
}
