//! Chaitin-Briggs simplify/select over an `InterferenceGraph` (§4.C steps 3-4).
//!
//! Classic optimistic coloring: repeatedly remove ("simplify") any virtual node whose degree is
//! below the number of allocatable colors, pushing it on a stack; once no such node remains,
//! pick the highest-degree remaining virtual node as a spill candidate and remove it too
//! (optimistic: it may still turn out colorable once its neighbors are). Then pop the stack,
//! assigning each node the lowest-numbered available color not used by an already-colored
//! neighbor. A node that runs out of colors when popped is added to the actual spill set.

use crate::entity::EntityRef;
use crate::isa::x86::registers::RegUnit;
use crate::isa::CallConv;
use crate::mir::VReg;
use crate::regalloc::interference::InterferenceGraph;
use std::collections::{HashMap, HashSet};

/// Either every virtual vreg got a color, or some need to be spilled and retried.
pub enum ColoringResult {
    Colored(HashMap<VReg, RegUnit>),
    Spill(Vec<VReg>),
}

/// Color every virtual (non-physical) node of `graph` using the allocatable register pool, given
/// that some of them have already been claimed as physical precoloring nodes. `_call_conv` is
/// accepted for symmetry with `InterferenceGraph::build` and future multi-convention allocatable
/// pools; this crate's one target has a single pool regardless of convention.
pub fn color(graph: &InterferenceGraph, _call_conv: CallConv) -> ColoringResult {
    let pool = crate::isa::x86::allocatable_gprs();
    let num_colors = pool.len() as usize;

    let virtual_nodes: Vec<VReg> = graph
        .nodes()
        .filter(|v| v.is_virtual())
        .collect();

    let mut degree: HashMap<VReg, usize> = virtual_nodes
        .iter()
        .map(|&v| (v, count_virtual_neighbors(graph, v)))
        .collect();

    let mut removed: HashSet<VReg> = HashSet::new();
    let mut stack: Vec<VReg> = Vec::new();

    loop {
        let mut progressed = true;
        while progressed {
            progressed = false;
            // Lowest vreg number first (tie-break: deterministic, matches the rest of the
            // allocator's "prefer the lower index" convention).
            let mut candidates: Vec<VReg> = degree
                .iter()
                .filter(|(v, &d)| !removed.contains(v) && d < num_colors)
                .map(|(&v, _)| v)
                .collect();
            candidates.sort();
            for v in candidates {
                if removed.contains(&v) {
                    continue;
                }
                simplify_one(graph, &mut degree, &mut removed, v);
                stack.push(v);
                progressed = true;
            }
        }

        // No low-degree node left; pick a spill candidate optimistically (highest degree, lowest
        // vreg number breaks ties) and keep going, unless everything is already removed.
        let remaining: Vec<VReg> = virtual_nodes
            .iter()
            .copied()
            .filter(|v| !removed.contains(v))
            .collect();
        if remaining.is_empty() {
            break;
        }

        let pick = *remaining
            .iter()
            .max_by_key(|v| (degree[v], std::cmp::Reverse(v.index())))
            .unwrap();
        simplify_one(graph, &mut degree, &mut removed, pick);
        stack.push(pick);
    }

    let mut colors: HashMap<VReg, RegUnit> = HashMap::new();
    let mut spills: Vec<VReg> = Vec::new();

    while let Some(v) = stack.pop() {
        let mut used = HashSet::new();
        for n in graph.neighbors(v) {
            if let Some(p) = n.as_physical() {
                used.insert(p);
            } else if let Some(&c) = colors.get(&n) {
                used.insert(c);
            }
        }
        match pool.iter().find(|r| !used.contains(r)) {
            Some(r) => {
                colors.insert(v, r);
            }
            None => spills.push(v),
        }
    }

    if spills.is_empty() {
        ColoringResult::Colored(colors)
    } else {
        ColoringResult::Spill(spills)
    }
}

fn count_virtual_neighbors(graph: &InterferenceGraph, v: VReg) -> usize {
    graph.neighbors(v).count()
}

fn simplify_one(
    graph: &InterferenceGraph,
    degree: &mut HashMap<VReg, usize>,
    removed: &mut HashSet<VReg>,
    v: VReg,
) {
    removed.insert(v);
    degree.remove(&v);
    for n in graph.neighbors(v) {
        if let Some(d) = degree.get_mut(&n) {
            *d -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;
    use crate::isa::x86::registers::NUM_GPRS;

    #[test]
    fn two_interfering_vregs_get_distinct_colors() {
        let mut graph = InterferenceGraph::default();
        let a = VReg::new(NUM_GPRS);
        let b = VReg::new(NUM_GPRS + 1);
        graph.add_edge(a, b);

        match color(&graph, CallConv::SystemV) {
            ColoringResult::Colored(map) => {
                assert_ne!(map[&a], map[&b]);
            }
            ColoringResult::Spill(_) => panic!("two nodes must never force a spill"),
        }
    }

    #[test]
    fn precolored_neighbor_is_avoided() {
        let mut graph = InterferenceGraph::default();
        let a = VReg::new(NUM_GPRS);
        let rax = VReg::physical(crate::isa::x86::registers::RAX);
        graph.add_edge(a, rax);

        match color(&graph, CallConv::SystemV) {
            ColoringResult::Colored(map) => assert_ne!(map[&a], crate::isa::x86::registers::RAX),
            ColoringResult::Spill(_) => panic!("one vreg with one precolored neighbor always fits"),
        }
    }
}
