//! The middleware holds the program model shared by the builder frontend and
//! the analysis passes: relations, attributes, per-rule variables and the
//! rules themselves. Downstream passes refer to everything by stable id, so
//! the `Program` is the single owner of all model data.

mod builder;
mod error;

use std::{collections::HashMap, fmt};

pub use builder::{Atom, ProgramBuilder, Term};
pub use error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};

use crate::analysis::deps::Fd;

/// Identifies a relation inside its owning [`Program`].
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RelationId(pub usize);

/// Identifies a rule inside its owning [`Program`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub usize);

/// Identifies a variable inside its owning [`Rule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A column slot of a relation. Only data columns are attributes: the
/// trailing location/time columns of non-extensional relations are modeled
/// as variable roles on the rule instead.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Attribute {
    pub relation: RelationId,
    pub index: usize,
}

impl Attribute {
    pub fn new(relation: RelationId, index: usize) -> Self {
        Self { relation, index }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation, self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// Preloaded, read-only and replicated everywhere.
    Extensional,
    /// Derived by rules; carries location and time columns.
    Intensional,
}

/// The model the analyzer ignores but the builder validates: how a rule's
/// head timestamp relates to its body timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeModel {
    #[default]
    Same,
    Successor,
    Async,
}

#[derive(Clone, Debug)]
pub struct Relation {
    id: RelationId,
    name: String,
    kind: RelationKind,
    arity: usize,
    auto_persist: bool,
    head_rules: Vec<RuleId>,
    body_rules: Vec<RuleId>,
    core_deps: Vec<Fd>,
}

impl Relation {
    pub(crate) fn new(
        id: RelationId,
        name: impl Into<String>,
        kind: RelationKind,
        arity: usize,
    ) -> Self {
        let name = name.into();
        let auto_persist = name
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);
        Self {
            id,
            name,
            kind,
            arity,
            auto_persist,
            head_rules: Vec::new(),
            body_rules: Vec::new(),
            core_deps: Vec::new(),
        }
    }

    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_extensional(&self) -> bool {
        self.kind == RelationKind::Extensional
    }

    pub fn auto_persist(&self) -> bool {
        self.auto_persist
    }

    /// The number of data columns (location/time excluded).
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn attr(&self, index: usize) -> Attribute {
        debug_assert!(index < self.arity);
        Attribute::new(self.id, index)
    }

    pub fn attrs(&self) -> Vec<Attribute> {
        (0..self.arity).map(|i| self.attr(i)).collect()
    }

    /// Rules in which this relation appears as the head.
    pub fn head_rules(&self) -> &[RuleId] {
        &self.head_rules
    }

    /// Rules in which this relation appears in the (possibly negated) body.
    pub fn body_rules(&self) -> &[RuleId] {
        &self.body_rules
    }

    pub fn appears_in_a_body(&self) -> bool {
        !self.body_rules.is_empty()
    }

    pub fn appears_in_a_rule(&self) -> bool {
        !self.head_rules.is_empty() || !self.body_rules.is_empty()
    }

    /// Dependencies that hold for this relation by construction, e.g. the
    /// arithmetic dependency of `add` or the opaque dependency of a declared
    /// black-box relation.
    pub fn core_deps(&self) -> &[Fd] {
        &self.core_deps
    }

    pub(crate) fn set_core_deps(&mut self, deps: Vec<Fd>) {
        self.core_deps = deps;
    }

    pub(crate) fn record_head_rule(&mut self, rule: RuleId) {
        self.head_rules.push(rule);
    }

    pub(crate) fn record_body_rule(&mut self, rule: RuleId) {
        self.body_rules.push(rule);
    }
}

/// A variable of a single rule, tracking every attribute slot it is bound to
/// across the rule's atoms. A variable marked `constant` stands for a literal
/// term; its value lives in the rule's constant table.
#[derive(Clone, Debug)]
pub struct Variable {
    id: VarId,
    name: String,
    constant: bool,
    attrs: Vec<Attribute>,
}

impl Variable {
    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Every attribute slot this variable occupies, in atom order.
    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    id: RuleId,
    head: RelationId,
    body: Vec<RelationId>,
    negated: Vec<RelationId>,
    vars: Vec<Variable>,
    /// Data-column variables per atom, keyed by the atom's relation. Holds
    /// the head atom as well.
    atom_vars: HashMap<RelationId, Vec<VarId>>,
    /// The variable supplying each head data column.
    head_var_map: Vec<VarId>,
    consts: HashMap<VarId, i64>,
    time_model: TimeModel,
    head_loc: VarId,
    head_time: VarId,
    body_loc: Option<VarId>,
    body_time: Option<VarId>,
}

impl Rule {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn head(&self) -> RelationId {
        self.head
    }

    /// The positive body atoms' relations, in source order.
    pub fn body(&self) -> &[RelationId] {
        &self.body
    }

    pub fn negated_body(&self) -> &[RelationId] {
        &self.negated
    }

    pub fn is_negated(&self, rel: RelationId) -> bool {
        self.negated.contains(&rel)
    }

    pub fn time_model(&self) -> TimeModel {
        self.time_model
    }

    pub fn variable(&self, v: VarId) -> &Variable {
        &self.vars[v.0]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    /// The variables of the head atom's data columns.
    pub fn head_vars(&self) -> &[VarId] {
        &self.head_var_map
    }

    /// The (non-constant) variable bound at `a`, if any.
    pub fn var_of(&self, a: Attribute) -> Option<VarId> {
        let vs = self.atom_vars.get(&a.relation)?;
        let v = *vs.get(a.index)?;
        if self.vars[v.0].constant {
            None
        } else {
            Some(v)
        }
    }

    /// The constant bound at `a`, if `a` holds a literal term.
    pub fn const_of(&self, a: Attribute) -> Option<i64> {
        let vs = self.atom_vars.get(&a.relation)?;
        let v = *vs.get(a.index)?;
        if self.vars[v.0].constant {
            self.consts.get(&v).copied()
        } else {
            None
        }
    }

    pub fn head_loc_var(&self) -> VarId {
        self.head_loc
    }

    pub fn head_time_var(&self) -> VarId {
        self.head_time
    }

    pub fn body_loc_var(&self) -> Option<VarId> {
        self.body_loc
    }

    pub fn body_time_var(&self) -> Option<VarId> {
        self.body_time
    }

    /// Whether deriving the head moves tuples to a different location than
    /// the body was evaluated at.
    pub fn changes_location(&self) -> bool {
        self.body_loc != Some(self.head_loc)
    }

    fn term_name(&self, v: VarId) -> String {
        if let Some(k) = self.consts.get(&v) {
            k.to_string()
        } else {
            self.vars[v.0].name.clone()
        }
    }

    /// Renders the rule in the Datalog surface syntax, including the time
    /// atom implied by the rule's time model.
    pub fn display<'a>(&'a self, program: &'a Program) -> RuleDisplay<'a> {
        RuleDisplay {
            rule: self,
            program,
        }
    }
}

pub struct RuleDisplay<'a> {
    rule: &'a Rule,
    program: &'a Program,
}

impl fmt::Display for RuleDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rl = self.rule;
        let head = self.program.relation(rl.head);

        let head_terms: Vec<String> = rl.head_var_map.iter().map(|&v| rl.term_name(v)).collect();
        write!(
            f,
            "{}({},{},{}) :- ",
            head.name(),
            head_terms.join(","),
            rl.vars[rl.head_loc.0].name,
            rl.vars[rl.head_time.0].name,
        )?;

        for (i, &rel_id) in rl.body.iter().enumerate() {
            let rel = self.program.relation(rel_id);
            let terms: Vec<String> = rl.atom_vars[&rel_id]
                .iter()
                .map(|&v| rl.term_name(v))
                .collect();
            write!(f, "{}({}", rel.name(), terms.join(","))?;
            if !rel.is_extensional() {
                let loc = rl.body_loc.expect("non-extensional atom without location");
                let time = rl.body_time.expect("non-extensional atom without time");
                write!(f, ",{},{}", rl.vars[loc.0].name, rl.vars[time.0].name)?;
            }
            write!(f, ")")?;
            if i < rl.body.len() - 1 {
                write!(f, ", ")?;
            }
        }

        match rl.time_model {
            TimeModel::Same => {}
            TimeModel::Successor => {
                let bt = rl.body_time.expect("successor rule without body time");
                write!(
                    f,
                    ", succ({},{})",
                    rl.vars[bt.0].name, rl.vars[rl.head_time.0].name
                )?;
            }
            TimeModel::Async => {
                let head_terms: Vec<String> =
                    rl.head_var_map.iter().map(|&v| rl.term_name(v)).collect();
                write!(
                    f,
                    ", choose(({}),{})",
                    head_terms.join(","),
                    rl.vars[rl.head_time.0].name
                )?;
            }
        }
        Ok(())
    }
}

/// A group of rules that can be evaluated co-located, along with the
/// relations through which data enters and leaves the group across a
/// location change.
#[derive(Clone, Debug, Default)]
pub struct SubComponent {
    pub rules: Vec<RuleId>,
    pub ingress: Vec<RelationId>,
    pub egress: Vec<RelationId>,
}

/// The fully built program: the owner of all relations and rules.
#[derive(Clone, Debug)]
pub struct Program {
    relations: Vec<Relation>,
    rules: Vec<Rule>,
}

impl Program {
    pub(crate) fn new(relations: Vec<Relation>, rules: Vec<Rule>) -> Self {
        Self { relations, rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.0]
    }

    pub fn relation_by_name(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Non-extensional relations that appear in at least one rule, in id
    /// order.
    pub fn non_extensional_relations(&self) -> Vec<RelationId> {
        self.relations
            .iter()
            .filter(|r| r.appears_in_a_rule() && !r.is_extensional())
            .map(|r| r.id)
            .collect()
    }

    /// Groups rules into location-local components. Starting from an
    /// unvisited rule, the group grows across producers and consumers that
    /// stay at the same location; a relation fed by a location-changing rule
    /// is recorded as an ingress, and the head of a location-changing rule as
    /// an egress.
    pub fn sub_components(&self) -> Vec<SubComponent> {
        let mut seen = vec![false; self.rules.len()];
        let mut components = Vec::new();

        for orig in &self.rules {
            if seen[orig.id.0] {
                continue;
            }

            let mut c = SubComponent::default();
            let mut fringe = vec![orig.id];
            while let Some(rl_id) = fringe.pop() {
                if seen[rl_id.0] {
                    continue;
                }
                seen[rl_id.0] = true;
                c.rules.push(rl_id);
                let rl = self.rule(rl_id);

                for &rel in rl.body() {
                    for &parent in self.relation(rel).head_rules() {
                        if self.rule(parent).changes_location() {
                            c.ingress.push(rel);
                        } else if !seen[parent.0] {
                            fringe.push(parent);
                        }
                    }
                }

                if rl.changes_location() {
                    c.egress.push(rl.head);
                } else {
                    for &child in self.relation(rl.head).body_rules() {
                        if !seen[child.0] {
                            fringe.push(child);
                        }
                    }
                }
            }
            components.push(c);
        }

        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_with_hop() -> Program {
        let mut b = ProgramBuilder::new();
        // mid hops to a new location; sink then stays local to mid.
        b.rule(
            "mid",
            &["a", "m", "t"],
            vec![Atom::pos("src", vec![Term::var("a"), Term::var("l"), Term::var("t")])],
        )
        .unwrap();
        b.rule(
            "sink",
            &["a", "l", "t"],
            vec![Atom::pos("mid", vec![Term::var("a"), Term::var("l"), Term::var("t")])],
        )
        .unwrap();
        b.finish()
    }

    #[test]
    fn attribute_ordering_follows_relation_then_index() {
        let a = Attribute::new(RelationId(0), 2);
        let b = Attribute::new(RelationId(1), 0);
        let c = Attribute::new(RelationId(1), 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn var_and_const_lookup() -> anyhow::Result<()> {
        let mut b = ProgramBuilder::new();
        b.extensional("add", 3)?;
        b.rule(
            "out",
            &["a", "c", "l", "t"],
            vec![
                Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                Atom::pos("add", vec![Term::var("a"), 1.into(), Term::var("c")]),
            ],
        )?;
        let p = b.finish();

        let rl = &p.rules()[0];
        let add = p.relation_by_name("add").unwrap();
        let in1 = p.relation_by_name("in1").unwrap();

        // add.0 and in1.0 hold the same variable.
        assert_eq!(rl.var_of(add.attr(0)), rl.var_of(in1.attr(0)));
        assert_eq!(rl.var_of(add.attr(1)), None);
        assert_eq!(rl.const_of(add.attr(1)), Some(1));
        assert_eq!(rl.const_of(add.attr(2)), None);
        Ok(())
    }

    #[test]
    fn rule_display_round_trips_surface_syntax() {
        let mut b = ProgramBuilder::new();
        b.extensional("add", 3).unwrap();
        b.rule(
            "out",
            &["a", "c", "l", "t"],
            vec![
                Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                Atom::pos("add", vec![Term::var("a"), 1.into(), Term::var("c")]),
            ],
        )
        .unwrap();
        let p = b.finish();
        assert_eq!(
            p.rules()[0].display(&p).to_string(),
            "out(a,c,l,t) :- in1(a,l,t), add(a,1,c)"
        );
    }

    #[test]
    fn successor_rule_displays_time_atom() {
        let mut b = ProgramBuilder::new();
        b.rule(
            "out",
            &["a", "l", "s"],
            vec![
                Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                Atom::pos("succ", vec![Term::var("t"), Term::var("s")]),
            ],
        )
        .unwrap();
        let p = b.finish();
        assert_eq!(p.rules()[0].time_model(), TimeModel::Successor);
        assert_eq!(
            p.rules()[0].display(&p).to_string(),
            "out(a,l,s) :- in1(a,l,t), succ(t,s)"
        );
    }

    #[test]
    fn sub_components_split_on_location_change() {
        let p = chain_with_hop();
        let comps = p.sub_components();
        assert_eq!(comps.len(), 2);

        let mid = p.relation_by_name("mid").unwrap().id();

        // The hop rule forms its own component with mid as its egress; the
        // local sink rule sees mid arriving from a location change, so mid is
        // its ingress.
        assert_eq!(comps[0].rules, vec![RuleId(0)]);
        assert_eq!(comps[0].egress, vec![mid]);
        assert!(comps[0].ingress.is_empty());

        assert_eq!(comps[1].rules, vec![RuleId(1)]);
        assert_eq!(comps[1].ingress, vec![mid]);
        assert!(comps[1].egress.is_empty());
    }
}
