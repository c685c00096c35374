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

use super::base::{EdgeRelation, UnitState};
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// An edge between two units in the schedulable objects graph.
///
/// Endpoints are carried by name so that replacing a unit instance does not
/// invalidate the edge. Immutable after creation.
pub(crate) struct GraphEdge {
    owner: String, // unit whose configuration introduced this edge
    relation: EdgeRelation,
    from: String,
    to: String,
}

impl GraphEdge {
    pub(super) fn new(owner: &str, relation: EdgeRelation, from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            owner: owner.to_string(),
            relation,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    pub(crate) fn relation(&self) -> EdgeRelation {
        self.relation
    }

    pub(crate) fn from(&self) -> &str {
        &self.from
    }

    pub(crate) fn to(&self) -> &str {
        &self.to
    }
}

impl fmt::Debug for GraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edge({} -> {}, {:?}, owner {})",
            self.from, self.to, self.relation, self.owner
        )
    }
}

/// A schedulable unit.
///
/// The alias list is fixed at construction; the first entry is the principal
/// name. Replacing a configuration yields a fresh instance, never a rename.
pub(crate) struct UnitX {
    aliases: Vec<String>,
    unit_type: String,
    state: Cell<UnitState>,

    /* edges from this node are owned here, edges to it are back-references */
    out_edges: RefCell<Vec<Rc<GraphEdge>>>,
    in_edges: RefCell<Vec<Weak<GraphEdge>>>,
}

impl UnitX {
    pub(crate) fn new(aliases: Vec<String>, unit_type: &str) -> UnitX {
        assert!(!aliases.is_empty());
        UnitX {
            aliases,
            unit_type: unit_type.to_string(),
            state: Cell::new(UnitState::Uninitialised),
            out_edges: RefCell::new(Vec::new()),
            in_edges: RefCell::new(Vec::new()),
        }
    }

    /// the principal name of this unit
    pub(crate) fn id(&self) -> &str {
        &self.aliases[0]
    }

    pub(crate) fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a == name)
    }

    pub(crate) fn unit_type(&self) -> &str {
        &self.unit_type
    }

    pub(crate) fn state(&self) -> UnitState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: UnitState) {
        self.state.set(state);
    }

    pub(super) fn push_out_edge(&self, edge: Rc<GraphEdge>) {
        debug_assert!(self.has_alias(edge.from()));
        self.out_edges.borrow_mut().push(edge);
    }

    pub(super) fn push_in_edge(&self, edge: &Rc<GraphEdge>) {
        debug_assert!(self.has_alias(edge.to()));
        self.in_edges.borrow_mut().push(Rc::downgrade(edge));
    }

    /// snapshot of the edges leading out of this unit
    pub(crate) fn out_edges(&self) -> Vec<Rc<GraphEdge>> {
        self.out_edges.borrow().iter().map(Rc::clone).collect()
    }

    /// snapshot of the live edges leading into this unit
    pub(crate) fn in_edges(&self) -> Vec<Rc<GraphEdge>> {
        // drop back-references whose edge has gone away
        self.in_edges
            .borrow_mut()
            .retain(|w| w.upgrade().is_some());
        self.in_edges
            .borrow()
            .iter()
            .filter_map(|w| w.upgrade())
            .collect()
    }

    pub(super) fn retain_out_edges<F: Fn(&GraphEdge) -> bool>(&self, keep: F) {
        self.out_edges.borrow_mut().retain(|e| keep(e));
    }

    pub(super) fn take_out_edges(&self) -> Vec<Rc<GraphEdge>> {
        self.out_edges.borrow_mut().drain(..).collect()
    }
}

impl PartialEq for UnitX {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for UnitX {}

impl PartialOrd for UnitX {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UnitX {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(other.id())
    }
}

impl Hash for UnitX {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for UnitX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id())
            .field("type", &self.unit_type)
            .field("state", &self.state.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_principal_alias() {
        let unit = UnitX::new(
            vec![String::from("net.target"), String::from("network.target")],
            "target",
        );
        assert_eq!(unit.id(), "net.target");
        assert!(unit.has_alias("network.target"));
        assert!(!unit.has_alias("other.target"));
    }

    #[test]
    fn unit_in_edges_prune_dead_references() {
        let from = UnitX::new(vec![String::from("a.service")], "service");
        let to = UnitX::new(vec![String::from("b.service")], "service");

        let edge = Rc::new(GraphEdge::new(
            "a.service",
            EdgeRelation::ADD_START,
            "a.service",
            "b.service",
        ));
        from.push_out_edge(Rc::clone(&edge));
        to.push_in_edge(&edge);
        assert_eq!(to.in_edges().len(), 1);

        from.retain_out_edges(|_| false);
        drop(edge);
        assert_eq!(to.in_edges().len(), 0);
    }
}
