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

//! Edge plumbing: attachment, Before-normalization, re-parenting on unit
//! replacement, and the ordering traversals used by the transaction engine.

use super::super::base::EdgeRelation;
use super::super::entry::{GraphEdge, UnitX};
use std::rc::Rc;

/// Attach one edge between two hydrated endpoints. A `BEFORE` bit is
/// normalized into an additional reverse `AFTER` edge under the same owner.
pub(super) fn edge_attach(
    owner: &str,
    relation: EdgeRelation,
    from: &Rc<UnitX>,
    to: &Rc<UnitX>,
) -> Rc<GraphEdge> {
    let edge = Rc::new(GraphEdge::new(owner, relation, from.id(), to.id()));
    from.push_out_edge(Rc::clone(&edge));
    to.push_in_edge(&edge);

    if relation.contains(EdgeRelation::BEFORE) {
        let mirror = Rc::new(GraphEdge::new(
            owner,
            EdgeRelation::AFTER,
            to.id(),
            from.id(),
        ));
        to.push_out_edge(Rc::clone(&mirror));
        from.push_in_edge(&mirror);
    }

    edge
}

/// Drop every edge introduced by a configuration that is going away.
pub(super) fn edges_disown(units: &[Rc<UnitX>], owner_aliases: &[String]) {
    for unit in units.iter() {
        unit.retain_out_edges(|e| !owner_aliases.iter().any(|a| a == e.owner()));
    }
}

/// Move the surviving (non-owned) edges of a replaced instance onto its
/// successor. In-edge back-references on third units stay valid because
/// edges are carried by name. Edges hanging off an alias the successor no
/// longer answers to are dropped.
pub(super) fn edges_migrate(old: &Rc<UnitX>, new: &Rc<UnitX>) {
    for edge in old.take_out_edges() {
        if new.has_alias(edge.from()) {
            new.push_out_edge(edge);
        }
    }
    for edge in old.in_edges() {
        if new.has_alias(edge.to()) {
            new.push_in_edge(&edge);
        }
    }
}

/// Units this unit is ordered after: targets of its `AFTER` edges.
pub(super) fn ordering_successors<F>(unit: &UnitX, resolve: F) -> Vec<Rc<UnitX>>
where
    F: Fn(&str) -> Option<Rc<UnitX>>,
{
    let mut units: Vec<Rc<UnitX>> = Vec::new();
    for edge in unit.out_edges() {
        if !edge.relation().contains(EdgeRelation::AFTER) {
            continue;
        }
        if let Some(other) = resolve(edge.to()) {
            if !units.iter().any(|u| Rc::ptr_eq(u, &other)) {
                units.push(other);
            }
        }
    }
    units
}

/// Units ordered after this one: sources of incoming `AFTER` edges.
pub(super) fn ordering_predecessors<F>(unit: &UnitX, resolve: F) -> Vec<Rc<UnitX>>
where
    F: Fn(&str) -> Option<Rc<UnitX>>,
{
    let mut units: Vec<Rc<UnitX>> = Vec::new();
    for edge in unit.in_edges() {
        if !edge.relation().contains(EdgeRelation::AFTER) {
            continue;
        }
        if let Some(other) = resolve(edge.from()) {
            if !units.iter().any(|u| Rc::ptr_eq(u, &other)) {
                units.push(other);
            }
        }
    }
    units
}
