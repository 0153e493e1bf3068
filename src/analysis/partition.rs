//! Distribution-policy search.
//!
//! A partition function maps a relation's tuple to its shard key; a policy
//! assigns one to every non-extensional relation appearing in a rule body,
//! such that every join is between co-partitioned tuples and each rule can
//! run without cross-shard shuffling. The search seeds singleton policies
//! from identity functions on single attributes and grows them across
//! relations connected by shared rules, pulling partition functions back
//! through the co-partition dependencies.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use log::{debug, trace};
use serde::Serialize;

use super::{
    copartition::{copartition_deps, CdKey, CdMap},
    deps::{dep_equal, fd_set, func_sub, Dep},
    func::{Expr, Func},
    set::EqSet,
};
use crate::middleware::{Attribute, Program, RelationId};

/// A candidate partition function during the search: an attribute dependency
/// whose domain lies within one relation's attributes.
pub type PartitionFn = Dep<Attribute>;

/// A finalized partition function for one relation.
#[derive(Clone, Debug, Serialize)]
pub struct DistFunction {
    relation: RelationId,
    dom: Vec<Attribute>,
    func: Func,
}

impl DistFunction {
    pub fn new(relation: RelationId, dom: Vec<Attribute>, func: Func) -> Self {
        Self {
            relation,
            dom,
            func,
        }
    }

    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn dom(&self) -> &[Attribute] {
        &self.dom
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    pub fn equal(a: &DistFunction, b: &DistFunction) -> bool {
        a.dom == b.dom && a.func.equivalent(&b.func)
    }

    /// Synthesizes the textual partition rule implementing this function: it
    /// joins the relation against the relations backing the opaque nodes,
    /// computes the shard key, looks the target location up in `locs` and
    /// re-emits the tuple into a derived `<relation>_p`. Variable names are
    /// allocated left to right.
    pub fn synthesize_rule(&self, program: &Program) -> String {
        let rel = program.relation(self.relation);
        let mut next_var = b'a';
        let mut attr_vars: HashMap<Attribute, String> = HashMap::new();

        let mut head = format!("{}_p(", rel.name());
        let mut body_atom = format!("{}(", rel.name());
        let mut choose = "choose((".to_string();
        for a in rel.attrs() {
            let v = alloc_var(&mut next_var);
            head.push_str(&v);
            head.push(',');
            body_atom.push_str(&v);
            body_atom.push(',');
            choose.push_str(&v);
            choose.push(',');
            attr_vars.insert(a, v);
        }
        head.push_str("l',t')");
        body_atom.push_str("l,t)");
        choose.push_str("l'), t')");

        let mut out = format!("{head} :- {body_atom}, ");
        let loc_attr = self.emit_joins(self.func.exp(), program, &mut attr_vars, &mut next_var, &mut out);
        out.push_str(&format!("locs({},l'), ", attr_vars[&loc_attr]));
        out.push_str(&choose);
        out
    }

    /// Walks the opaque expression tree, emitting one join atom per node.
    /// Nested nodes emit first, so their codomain variables exist by the
    /// time the enclosing node refers to them. Returns the attribute whose
    /// variable carries the shard key.
    fn emit_joins(
        &self,
        exp: &Expr,
        program: &Program,
        attr_vars: &mut HashMap<Attribute, String>,
        next_var: &mut u8,
        out: &mut String,
    ) -> Attribute {
        match exp {
            Expr::Input(i) => self.dom[*i],
            Expr::BlackBox { args, meta, .. } => {
                let inputs: Vec<Attribute> = args
                    .iter()
                    .map(|arg| match arg {
                        Expr::Input(i) => self.dom[*i],
                        _ => self.emit_joins(arg, program, attr_vars, next_var, out),
                    })
                    .collect();

                let codom = meta.expect("opaque node without join metadata");
                out.push_str(&format!(
                    "{}(",
                    program.relation(codom.relation).name()
                ));
                for a in inputs {
                    let v = match attr_vars.get(&a) {
                        Some(v) => v.clone(),
                        None => {
                            let v = alloc_var(next_var);
                            attr_vars.insert(a, v.clone());
                            v
                        }
                    };
                    out.push_str(&v);
                    out.push(',');
                }
                let cv = alloc_var(next_var);
                attr_vars.insert(codom, cv.clone());
                out.push_str(&format!("{cv}), "));
                codom
            }
            _ => panic!(
                "partition rules can only be synthesized for identity and opaque partition functions"
            ),
        }
    }
}

fn alloc_var(next: &mut u8) -> String {
    let v = (*next as char).to_string();
    *next += 1;
    v
}

impl fmt::Display for DistFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Dom: [")?;
        for (i, a) in self.dom.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, "], Func: {} }}", self.func)
    }
}

/// A complete assignment of partition functions to the non-extensional
/// relations of one connected group of rules.
pub type DistPolicy = HashMap<RelationId, DistFunction>;

pub fn dist_policy_equal(a: &DistPolicy, b: &DistPolicy) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|w| DistFunction::equal(v, w)))
}

/// The textual partition rules of a policy, sorted for reproducibility.
pub fn policy_rules(policy: &DistPolicy, program: &Program) -> Vec<String> {
    let mut rules: Vec<String> = policy
        .values()
        .map(|f| f.synthesize_rule(program))
        .collect();
    rules.sort();
    rules
}

type RawPolicy = HashMap<RelationId, PartitionFn>;

fn raw_policy_equal(a: &RawPolicy, b: &RawPolicy) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.get(k).is_some_and(|w| dep_equal(v, w)))
}

fn identity_on(a: Attribute) -> PartitionFn {
    Dep::new(vec![a], a, Func::identity())
}

/// Enumerates every distribution policy consistent with the program's
/// co-partition dependencies.
pub fn dist_policies(program: &Program) -> Vec<DistPolicy> {
    let cds = copartition_deps(program);
    dist_policies_with(program, &cds)
}

pub fn dist_policies_with(program: &Program, cds: &CdMap) -> Vec<DistPolicy> {
    let body_rels: Vec<RelationId> = program
        .non_extensional_relations()
        .into_iter()
        .filter(|&r| program.relation(r).appears_in_a_body())
        .collect();

    let mut policies: EqSet<RawPolicy> = EqSet::new(raw_policy_equal);
    for &rel in &body_rels {
        for a in program.relation(rel).attrs() {
            let mut p = RawPolicy::new();
            p.insert(rel, identity_on(a));
            policies.insert(p);
        }
    }
    debug!(
        "seeded {} singleton policies over {} relations",
        policies.len(),
        body_rels.len()
    );

    let mut i = 0;
    let mut added = false;
    loop {
        if added {
            i = 0;
        }
        added = false;
        if i >= policies.len() {
            break;
        }
        let policy = policies.elems()[i].clone();

        // Relations without a partition function that share a rule with an
        // already assigned relation, in id order.
        let unassigned: Vec<RelationId> = body_rels
            .iter()
            .copied()
            .filter(|r| !policy.contains_key(r))
            .filter(|&r| policy.keys().any(|&p| shares_rule(program, r, p)))
            .collect();
        let Some(&target) = unassigned.first() else {
            i += 1;
            continue;
        };
        let target_attrs: HashSet<Attribute> =
            program.relation(target).attrs().into_iter().collect();

        let mut assigned: Vec<RelationId> = policy.keys().copied().collect();
        assigned.sort();

        let mut consistent: EqSet<PartitionFn> = EqSet::new(dep_equal);
        let mut inconsistent = false;
        for copart in assigned {
            if !shares_rule(program, target, copart) {
                continue;
            }

            // Pull the assigned partition function back onto the target's
            // attributes through every co-partition dependency, to a fixed
            // point.
            let mut pfs: EqSet<PartitionFn> = EqSet::new(dep_equal);
            pfs.insert(policy[&copart].clone());
            let empty = fd_set();
            let deps = cds
                .get(&CdKey {
                    dom: target,
                    codom: copart,
                })
                .unwrap_or(&empty);
            loop {
                let old = pfs.clone();
                for g in old.elems() {
                    for h in deps.elems() {
                        if let Some(c) = func_sub(h, g) {
                            pfs.insert(c);
                        }
                    }
                }
                if pfs.equal(&old) {
                    break;
                }
            }

            let mut retained: EqSet<PartitionFn> = EqSet::new(dep_equal);
            for f in pfs.elems() {
                if !f.dom().is_empty() && f.dom().iter().all(|a| target_attrs.contains(a)) {
                    retained.insert(f.clone());
                }
            }
            if retained.is_empty() {
                trace!(
                    "no pullback of {} onto {}: policy inconsistent",
                    program.relation(copart).name(),
                    program.relation(target).name()
                );
                inconsistent = true;
                break;
            }
            consistent.union(&retained);
        }

        policies.remove(&policy);
        if inconsistent {
            continue;
        }

        let mut candidates = consistent.elems().to_vec();
        candidates.sort_by_key(|f| f.to_string());
        for c in candidates {
            let mut extended = policy.clone();
            extended.insert(target, c);
            policies.insert(extended);
            added = true;
        }
    }

    // Normalize the surviving policies and collapse the ones equal after
    // normalization.
    let mut seen: EqSet<DistPolicy> = EqSet::new(dist_policy_equal);
    let mut out = Vec::new();
    for p in policies.elems() {
        let finalized: DistPolicy = p
            .iter()
            .map(|(&rel, pf)| {
                let n = pf.normalize();
                (rel, DistFunction::new(rel, n.dom().to_vec(), n.func().clone()))
            })
            .collect();
        if seen.insert(finalized.clone()) {
            out.push(finalized);
        }
    }
    debug!("policy search finished with {} policies", out.len());
    out
}

/// Whether `r1` appears in the body of some rule whose body also contains
/// `r2`.
fn shares_rule(program: &Program, r1: RelationId, r2: RelationId) -> bool {
    program.relation(r1).body_rules().iter().any(|&rl_id| {
        let rl = program.rule(rl_id);
        rl.head() != r1 && rl.body().contains(&r2)
    })
}
