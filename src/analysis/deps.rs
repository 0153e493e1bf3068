//! Functional-dependency records and their derivation.
//!
//! A dependency `(dom, codom, func)` asserts that applying `func` to the
//! domain tuple yields the codomain value in every satisfying instance.
//! Derivation runs per rule in three stages — seeding attribute
//! dependencies, lifting them onto the rule's variables, and closing the
//! variable dependencies under function composition — followed by a lowering
//! back to attributes. The program-wide fixed point unions the per-rule head
//! projections and then intersects them, so a dependency survives only when
//! every rule defining the head derives it.

use std::{collections::HashMap, fmt};

use itertools::Itertools;
use log::{debug, trace};
use serde::Serialize;

use super::{func::Func, set::EqSet};
use crate::middleware::{Attribute, Program, RelationId, Rule, VarId};

/// A functional dependency over element kind `T`, together with the memo of
/// dependencies already substituted into it.
#[derive(Clone, Debug, Serialize)]
pub struct Dep<T> {
    pub(crate) dom: Vec<T>,
    pub(crate) codom: T,
    pub(crate) func: Func,
    #[serde(skip)]
    pub(crate) subs: Vec<Dep<T>>,
}

/// An attribute-level functional dependency.
pub type Fd = Dep<Attribute>;
/// A dependency between the variables of a single rule.
pub type VarDep = Dep<VarId>;

/// The analyzer's main output shape: per-relation dependency sets.
pub type FdMap = HashMap<RelationId, EqSet<Fd>>;

/// The intermediate element kind used while lifting attribute dependencies
/// onto rule variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VarOrAttr {
    Var(VarId),
    Attr(Attribute),
}

impl<T> Dep<T> {
    pub fn new(dom: Vec<T>, codom: T, func: Func) -> Self {
        Self {
            dom,
            codom,
            func,
            subs: Vec::new(),
        }
    }

    pub fn dom(&self) -> &[T] {
        &self.dom
    }

    pub fn codom(&self) -> &T {
        &self.codom
    }

    pub fn func(&self) -> &Func {
        &self.func
    }
}

impl<T: PartialEq> Dep<T> {
    /// A dependency of an element on itself alone; trivially true and purged
    /// from all final outputs.
    pub fn reflexive(&self) -> bool {
        self.dom.len() == 1 && self.dom[0] == self.codom
    }
}

impl Dep<Attribute> {
    /// Sorts the domain into the canonical attribute order, applying the
    /// permutation inside the function so the dependency's meaning is
    /// unchanged. Normalized dependencies deduplicate regardless of the
    /// order their domains were first assembled in.
    pub fn normalize(&self) -> Fd {
        let mut order: Vec<usize> = (0..self.dom.len()).collect();
        order.sort_by_key(|&i| self.dom[i]);

        let dom: Vec<Attribute> = order.iter().map(|&i| self.dom[i]).collect();
        let mut func = self.func.clone();
        let moved: HashMap<usize, usize> = order
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();
        func.permute_inputs(&moved);

        Dep::new(dom, self.codom, func)
    }
}

/// Dependency equality: equal ordered domains, equal codomains, equivalent
/// functions.
pub fn dep_equal<T: PartialEq>(a: &Dep<T>, b: &Dep<T>) -> bool {
    a.dom == b.dom && a.codom == b.codom && a.func.equivalent(&b.func)
}

pub fn fd_set() -> EqSet<Fd> {
    EqSet::new(dep_equal)
}

impl<T: fmt::Display> fmt::Display for Dep<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Dom: [")?;
        for (i, d) in self.dom.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "], Codom: {}, Func: {} }}", self.codom, self.func)
    }
}

impl fmt::Display for VarOrAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarOrAttr::Var(v) => write!(f, "{v}"),
            VarOrAttr::Attr(a) => write!(f, "{a}"),
        }
    }
}

/// Replaces every slot bound to attribute `a` with the variable `v`, folding
/// duplicate domain occurrences of `v` into one via a domain merge.
fn var_sub(dep: &mut Dep<VarOrAttr>, v: VarId, a: Attribute) {
    let target = VarOrAttr::Attr(a);
    let var = VarOrAttr::Var(v);
    for slot in dep.dom.iter_mut() {
        if *slot == target {
            *slot = var;
        }
    }
    if dep.codom == target {
        dep.codom = var;
    }

    let dup: Vec<usize> = dep
        .dom
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == var)
        .map(|(i, _)| i)
        .collect();
    if dup.len() > 1 {
        dep.func.merge_domain(&dup);
        let mut first = true;
        dep.dom.retain(|s| {
            if *s == var {
                std::mem::replace(&mut first, false)
            } else {
                true
            }
        });
    }
}

/// Substitutes the literal `k` for every domain slot bound to attribute `a`,
/// removing those slots from the domain.
fn const_sub(dep: &mut Dep<VarOrAttr>, k: i64, a: Attribute) {
    let target = VarOrAttr::Attr(a);
    while let Some(i) = dep.dom.iter().position(|s| *s == target) {
        dep.func.substitute(i, &[], &Func::constant(k));
        dep.dom.remove(i);
    }
}

/// Composes `g` into `h` by replacing the domain slot of `h` holding `g`'s
/// codomain with `g` itself. Returns `None` when the substitution is refused:
/// `g`'s codomain is absent from `h`'s domain, was already substituted into
/// `h`, or the wiring would feed a slot into itself.
///
/// Substitutions already recorded on `h` are first propagated into `g`, so a
/// chain of compositions applies uniformly to every slot they reach.
pub fn func_sub<T: PartialEq + Clone>(g: &Dep<T>, h: &Dep<T>) -> Option<Dep<T>> {
    if h.subs.iter().any(|t| t.codom == g.codom) {
        return None;
    }

    let mut g = g.clone();
    for t in &h.subs {
        if g.dom.contains(&t.codom) {
            if let Some(rewritten) = func_sub(t, &g) {
                g = rewritten;
            }
        }
    }

    let slot = h.dom.iter().position(|d| *d == g.codom)?;
    let mut h = h.clone();

    let fresh: Vec<T> = g
        .dom
        .iter()
        .filter(|d| !h.dom.contains(d))
        .cloned()
        .collect();
    h.func.add_to_domain(fresh.len());
    h.dom.extend(fresh);

    let dom_indices: Vec<usize> = g
        .dom
        .iter()
        .map(|d| h.dom.iter().position(|x| x == d).expect("domain element vanished"))
        .collect();
    if dom_indices.contains(&slot) {
        return None;
    }

    h.func.substitute(slot, &dom_indices, &g.func);
    h.dom.remove(slot);
    h.subs.push(g);
    Some(h)
}

/// Derives the variable-level dependencies a single rule induces: seeds from
/// core dependencies, previously derived dependency sets and reflexive
/// identities; lifts them onto the rule's variables; closes under
/// composition. Negated atoms participate only when `include_neg` is set.
pub fn rule_deps(
    program: &Program,
    rule: &Rule,
    existing: &FdMap,
    include_neg: bool,
) -> EqSet<VarDep> {
    let mut seeds: Vec<Fd> = Vec::new();
    let mut rels: Vec<RelationId> = rule.body().to_vec();
    if include_neg {
        rels.extend_from_slice(rule.negated_body());
    }
    rels.push(rule.head());

    for rel_id in rels {
        let rel = program.relation(rel_id);
        if rel.is_extensional() && !rel.core_deps().is_empty() {
            seeds.extend(rel.core_deps().iter().cloned());
        } else if rel_id != rule.head() {
            if let Some(known) = existing.get(&rel_id) {
                seeds.extend(known.elems().iter().cloned());
            }
        }
        for a in rel.attrs() {
            if rule.var_of(a).is_some() {
                seeds.push(Dep::new(vec![a], a, Func::identity()));
            }
        }
    }
    trace!("rule {:?}: {} seed dependencies", rule.id(), seeds.len());

    let mut var_deps: EqSet<VarDep> = EqSet::new(dep_equal);
    'seeds: for fd in seeds {
        let mut dep = Dep {
            dom: fd.dom.iter().map(|&a| VarOrAttr::Attr(a)).collect(),
            codom: VarOrAttr::Attr(fd.codom),
            func: fd.func,
            subs: Vec::new(),
        };

        let mut attrs: Vec<Attribute> = Vec::new();
        for slot in dep.dom.iter().chain(std::iter::once(&dep.codom)) {
            if let VarOrAttr::Attr(a) = slot {
                if !attrs.contains(a) {
                    attrs.push(*a);
                }
            }
        }

        for a in attrs {
            if let Some(v) = rule.var_of(a) {
                var_sub(&mut dep, v, a);
            } else if let Some(k) = rule.const_of(a) {
                if dep.codom == VarOrAttr::Attr(a) {
                    // A dependency determining a literal is vacuous.
                    continue 'seeds;
                }
                const_sub(&mut dep, k, a);
            } else {
                panic!(
                    "attribute {a} of rule {:?} is bound to neither a variable nor a constant",
                    rule.id()
                );
            }
        }

        let dom: Vec<VarId> = dep
            .dom
            .iter()
            .map(|s| match s {
                VarOrAttr::Var(v) => *v,
                VarOrAttr::Attr(a) => panic!("attribute {a} survived variable lifting"),
            })
            .collect();
        let codom = match dep.codom {
            VarOrAttr::Var(v) => v,
            VarOrAttr::Attr(a) => panic!("attribute {a} survived variable lifting"),
        };
        var_deps.insert(Dep::new(dom, codom, dep.func));
    }

    let mut iterations = 0;
    loop {
        let mut changed = false;
        let elems = var_deps.elems().to_vec();
        for g in &elems {
            if g.reflexive() {
                continue;
            }
            for h in &elems {
                if h.reflexive() || !h.dom.contains(&g.codom) {
                    continue;
                }
                if let Some(composed) = func_sub(g, h) {
                    if composed.reflexive() {
                        continue;
                    }
                    if var_deps.insert(composed) {
                        changed = true;
                    }
                }
            }
        }
        iterations += 1;
        if !changed {
            break;
        }
    }
    trace!(
        "rule {:?}: closure stabilized after {iterations} sweeps with {} dependencies",
        rule.id(),
        var_deps.len()
    );

    var_deps
}

/// Lowers a rule's closed variable dependencies back to attribute
/// dependencies: each variable expands to every attribute it is bound to,
/// and each expansion is normalized.
pub fn dep_closure(
    program: &Program,
    rule: &Rule,
    existing: &FdMap,
    include_neg: bool,
) -> EqSet<Fd> {
    let var_deps = rule_deps(program, rule, existing, include_neg);

    let mut out = fd_set();
    for dep in var_deps.elems() {
        let mut choices: Vec<Vec<Attribute>> = dep
            .dom
            .iter()
            .map(|&v| rule.variable(v).attrs().to_vec())
            .collect();
        choices.push(rule.variable(dep.codom).attrs().to_vec());

        for combo in choices.into_iter().multi_cartesian_product() {
            let (codom, dom) = combo.split_last().expect("codomain choice missing");
            out.insert(Dep::new(dom.to_vec(), *codom, dep.func.clone()).normalize());
        }
    }
    out
}

/// The attribute dependencies a rule establishes on its head: the subset of
/// the closure that lies entirely within the head's attributes.
pub fn head_fds(program: &Program, rule: &Rule, existing: &FdMap) -> EqSet<Fd> {
    let head_attrs = program.relation(rule.head()).attrs();
    let closure = dep_closure(program, rule, existing, false);

    let mut out = fd_set();
    for fd in closure.elems() {
        if fd.dom.iter().all(|a| head_attrs.contains(a)) && head_attrs.contains(&fd.codom) {
            out.insert(fd.clone());
        }
    }
    out
}

/// Derives the functional dependencies of every intensional relation.
///
/// The union pass accumulates head dependencies until stable; the
/// intersection pass then re-derives each rule with the head's own entry
/// cleared and keeps only what every defining rule agrees on. Reflexive
/// dependencies are purged from the result. Both passes are idempotent, so
/// rule order never shows in the output.
pub fn fds(program: &Program) -> FdMap {
    let mut map: FdMap = HashMap::new();
    for rule in program.rules() {
        map.entry(rule.head()).or_insert_with(fd_set);
    }

    debug!(
        "deriving dependencies for {} rules over {} heads",
        program.rules().len(),
        map.len()
    );

    let mut sweeps = 0;
    loop {
        let mut changed = false;
        for rule in program.rules() {
            let derived = head_fds(program, rule, &map);
            let entry = map.get_mut(&rule.head()).expect("head entry seeded above");
            let before = entry.len();
            entry.union(&derived);
            changed |= entry.len() != before;
        }
        sweeps += 1;
        if !changed {
            break;
        }
    }
    debug!("union pass stabilized after {sweeps} sweeps");

    sweeps = 0;
    loop {
        let mut changed = false;
        for rule in program.rules() {
            let mut scratch = map.clone();
            scratch.insert(rule.head(), fd_set());
            let derived = head_fds(program, rule, &scratch);

            let entry = map.get_mut(&rule.head()).expect("head entry seeded above");
            let before = entry.len();
            entry.intersect(&derived);
            changed |= entry.len() != before;
        }
        sweeps += 1;
        if !changed {
            break;
        }
    }
    debug!("intersection pass stabilized after {sweeps} sweeps");

    for set in map.values_mut() {
        set.retain(|fd| !fd.reflexive());
    }
    map
}
