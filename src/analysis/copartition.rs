//! Co-partition dependencies: for every ordered pair of relations sharing a
//! rule, the dependencies leading from the first relation's attributes to an
//! attribute of the second. The policy search uses them to pull a partition
//! function from one side of a join back onto the other.

use std::collections::HashMap;

use log::trace;

use super::{
    deps::{dep_closure, fd_set, fds, Fd, FdMap},
    set::EqSet,
};
use crate::middleware::{Program, RelationId, Rule};

/// An ordered pair of relations appearing together in some rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CdKey {
    pub dom: RelationId,
    pub codom: RelationId,
}

pub type CdMap = HashMap<CdKey, EqSet<Fd>>;

/// Computes the co-partition dependencies of the whole program.
///
/// The first rule a pair appears in contributes its full dependency set;
/// every further shared rule intersects, so a dependency survives only when
/// every rule joining the two relations derives it. Negated atoms are
/// included: partitioning has to respect negated joins as well.
pub fn copartition_deps(program: &Program) -> CdMap {
    let fd_map = fds(program);
    copartition_deps_with(program, &fd_map)
}

pub fn copartition_deps_with(program: &Program, fd_map: &FdMap) -> CdMap {
    let mut cds: CdMap = HashMap::new();

    for rule in program.rules() {
        let rels = rule_relations(rule);
        let closure = dep_closure(program, rule, fd_map, true);

        for &dom_rel in &rels {
            let in_rule = cds_for_rel_in_rule(program, dom_rel, &rels, &closure);
            for &codom_rel in &rels {
                if codom_rel == dom_rel {
                    continue;
                }
                let contribution = in_rule
                    .get(&codom_rel)
                    .cloned()
                    .unwrap_or_else(fd_set);
                let key = CdKey {
                    dom: dom_rel,
                    codom: codom_rel,
                };
                match cds.entry(key) {
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(contribution);
                    }
                    std::collections::hash_map::Entry::Occupied(mut e) => {
                        e.get_mut().intersect(&contribution);
                    }
                }
                trace!(
                    "co-partition deps {} -> {}: {}",
                    program.relation(dom_rel).name(),
                    program.relation(codom_rel).name(),
                    cds[&key].len()
                );
            }
        }
    }

    cds
}

/// The head and positive body relations of a rule, deduplicated in source
/// order.
fn rule_relations(rule: &Rule) -> Vec<RelationId> {
    let mut rels = vec![rule.head()];
    for &rel in rule.body() {
        if !rels.contains(&rel) {
            rels.push(rel);
        }
    }
    rels
}

/// Splits one rule's closure by codomain relation, keeping only the
/// dependencies whose domain lies entirely within `dom_rel`.
fn cds_for_rel_in_rule(
    program: &Program,
    dom_rel: RelationId,
    rels: &[RelationId],
    closure: &EqSet<Fd>,
) -> HashMap<RelationId, EqSet<Fd>> {
    let dom_attrs = program.relation(dom_rel).attrs();

    let mut by_codom: HashMap<RelationId, EqSet<Fd>> = HashMap::new();
    for fd in closure.elems() {
        if !fd.dom().iter().all(|a| dom_attrs.contains(a)) {
            continue;
        }
        for &codom_rel in rels {
            if codom_rel == dom_rel {
                continue;
            }
            if program
                .relation(codom_rel)
                .attrs()
                .contains(fd.codom())
            {
                by_codom
                    .entry(codom_rel)
                    .or_insert_with(fd_set)
                    .insert(fd.clone());
            }
        }
    }
    by_codom
}
