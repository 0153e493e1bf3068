//! Programmatic construction of the program model. This is the contract an
//! external frontend (a parser, a test harness) uses to populate a
//! [`Program`]: it owns the bookkeeping that connects terms to variables,
//! variables to attribute slots, and head columns to the body variables
//! supplying them, and it enforces the model's semantic invariants.

use std::collections::HashMap;

use crate::{
    analysis::{
        deps::Dep,
        func::{Expr, Func, Op},
    },
    middleware::{
        Attribute, ModelError, ModelResult, Program, Relation, RelationId, RelationKind, Rule,
        RuleId, TimeModel, VarId, Variable,
    },
};

const SUCCESSOR_RELATION: &str = "succ";
const CHOOSE_RELATION: &str = "choose";

/// A term of a body atom: a named variable or an integer literal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Const(i64),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Term::Const(v)
    }
}

impl From<&str> for Term {
    fn from(name: &str) -> Self {
        Term::Var(name.to_string())
    }
}

/// A body atom as supplied to [`ProgramBuilder::rule`]. Atoms over the
/// reserved `succ`/`choose` relations select the rule's time model instead of
/// joining a relation.
#[derive(Clone, Debug)]
pub struct Atom {
    relation: String,
    negated: bool,
    terms: Vec<Term>,
}

impl Atom {
    pub fn pos(relation: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            relation: relation.into(),
            negated: false,
            terms,
        }
    }

    pub fn neg(relation: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            relation: relation.into(),
            negated: true,
            terms,
        }
    }
}

/// Builds a [`Program`] one declaration and rule at a time.
///
/// Extensional relations must be declared up front; intensional relations are
/// created on first use with their arity inferred from the atom. The names
/// `add` and `sub` receive their arithmetic core dependencies on
/// declaration, and [`black_box`](Self::black_box) declares an extensional
/// relation whose last attribute is an opaque function of the others.
pub struct ProgramBuilder {
    relations: Vec<Relation>,
    by_name: HashMap<String, RelationId>,
    rules: Vec<Rule>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            relations: Vec::new(),
            by_name: HashMap::new(),
            rules: Vec::new(),
        }
    }

    /// Declares a replicated read-only relation with `arity` data columns.
    pub fn extensional(&mut self, name: &str, arity: usize) -> ModelResult<RelationId> {
        let id = self.declare(name, arity)?;
        if (name == "add" || name == "sub") && arity == 3 {
            let op = if name == "add" { Op::Add } else { Op::Sub };
            let rel = &self.relations[id.0];
            let dep = Dep::new(
                vec![rel.attr(0), rel.attr(1)],
                rel.attr(2),
                Func::from_expr(
                    Expr::bin_op(op, Expr::Input(0), Expr::Input(1)),
                    2,
                ),
            );
            self.relations[id.0].set_core_deps(vec![dep]);
        }
        Ok(id)
    }

    /// Declares a read-only relation `name(x1, …, xk, y)` whose `y` column is
    /// an opaque function of the others, named after the relation.
    pub fn black_box(&mut self, name: &str, arity: usize) -> ModelResult<RelationId> {
        if arity < 2 {
            return Err(ModelError::EmptyBlackBox);
        }
        let id = self.declare(name, arity)?;
        let rel = &self.relations[id.0];
        let codom = rel.attr(arity - 1);
        let dom: Vec<Attribute> = (0..arity - 1).map(|i| rel.attr(i)).collect();
        let dep = Dep::new(dom, codom, Func::black_box(name, arity - 1, Some(codom)));
        self.relations[id.0].set_core_deps(vec![dep]);
        Ok(id)
    }

    fn declare(&mut self, name: &str, arity: usize) -> ModelResult<RelationId> {
        if self.by_name.contains_key(name) {
            return Err(ModelError::DuplicateRelation(name.to_string()));
        }
        let id = RelationId(self.relations.len());
        self.relations
            .push(Relation::new(id, name, RelationKind::Extensional, arity));
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Looks up an existing relation or creates an intensional one sized for
    /// an atom with `num_terms` terms (the trailing two being location and
    /// time).
    fn resolve(&mut self, name: &str, num_terms: usize, is_head: bool) -> ModelResult<RelationId> {
        if let Some(&id) = self.by_name.get(name) {
            let rel = &self.relations[id.0];
            if rel.is_extensional() {
                if is_head {
                    return Err(ModelError::ExtensionalHead(name.to_string()));
                }
                if rel.arity() != num_terms {
                    return Err(ModelError::ArityMismatch {
                        name: name.to_string(),
                        expected: rel.arity(),
                        found: num_terms,
                    });
                }
            } else {
                if num_terms < 2 {
                    return Err(ModelError::MissingLocTime(name.to_string()));
                }
                if rel.arity() != num_terms - 2 {
                    return Err(ModelError::ArityMismatch {
                        name: name.to_string(),
                        expected: rel.arity(),
                        found: num_terms - 2,
                    });
                }
            }
            return Ok(id);
        }

        if num_terms < 2 {
            return Err(ModelError::MissingLocTime(name.to_string()));
        }
        let id = RelationId(self.relations.len());
        self.relations.push(Relation::new(
            id,
            name,
            RelationKind::Intensional,
            num_terms - 2,
        ));
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Adds a rule. `head_terms` are variable names, the last two being the
    /// head's location and time. Body atoms over non-extensional relations
    /// likewise carry trailing location and time terms, which must agree
    /// across the body.
    pub fn rule(
        &mut self,
        head: &str,
        head_terms: &[&str],
        body_atoms: Vec<Atom>,
    ) -> ModelResult<RuleId> {
        let rule_id = RuleId(self.rules.len());

        if head_terms.len() < 2 {
            return Err(ModelError::MissingLocTime(head.to_string()));
        }
        let head_rel = self.resolve(head, head_terms.len(), true)?;
        self.relations[head_rel.0].record_head_rule(rule_id);

        let mut vars: Vec<Variable> = Vec::new();
        let mut by_var_name: HashMap<String, VarId> = HashMap::new();
        let mut consts: HashMap<VarId, i64> = HashMap::new();
        let mut atom_vars: HashMap<RelationId, Vec<VarId>> = HashMap::new();

        let new_var = |vars: &mut Vec<Variable>,
                           by_var_name: &mut HashMap<String, VarId>,
                           name: &str,
                           constant: bool| {
            let id = VarId(vars.len());
            vars.push(Variable {
                id,
                name: name.to_string(),
                constant,
                attrs: Vec::new(),
            });
            if name != "_" {
                by_var_name.insert(name.to_string(), id);
            }
            id
        };

        let n = head_terms.len();
        let head_loc = new_var(&mut vars, &mut by_var_name, head_terms[n - 2], false);
        let head_time = new_var(&mut vars, &mut by_var_name, head_terms[n - 1], false);

        // Head column -> variable name positions, filled in once the
        // variable shows up on the body side.
        let mut head_positions: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut head_var_map: Vec<Option<VarId>> = vec![None; n - 2];
        for (j, name) in head_terms[..n - 2].iter().enumerate() {
            head_positions.entry(*name).or_default().push(j);
        }

        for (j, name) in head_terms[..n - 2].iter().enumerate() {
            let v = match by_var_name.get(*name) {
                Some(&v) => v,
                None => new_var(&mut vars, &mut by_var_name, name, false),
            };
            vars[v.0].attrs.push(Attribute::new(head_rel, j));
            atom_vars.entry(head_rel).or_default().push(v);
        }

        let mut body: Vec<RelationId> = Vec::new();
        let mut negated: Vec<RelationId> = Vec::new();
        let mut body_loc: Option<VarId> = None;
        let mut body_time: Option<VarId> = None;
        let mut late_atoms: Vec<&Atom> = Vec::new();

        for atom in &body_atoms {
            if atom.relation == SUCCESSOR_RELATION || atom.relation == CHOOSE_RELATION {
                late_atoms.push(atom);
                continue;
            }

            let rel_id = self.resolve(&atom.relation, atom.terms.len(), false)?;
            self.relations[rel_id.0].record_body_rule(rule_id);
            if atom.negated {
                negated.push(rel_id);
            } else {
                body.push(rel_id);
            }

            // Literal terms become hidden constant variables.
            let mut term_names: Vec<String> = Vec::with_capacity(atom.terms.len());
            let mut const_vals: HashMap<String, i64> = HashMap::new();
            for (i, t) in atom.terms.iter().enumerate() {
                match t {
                    Term::Var(name) => term_names.push(name.clone()),
                    Term::Const(k) => {
                        let name = format!("_rl{}_{}_{}", rule_id.0, atom.relation, i);
                        const_vals.insert(name.clone(), *k);
                        term_names.push(name);
                    }
                }
            }

            let extensional = self.relations[rel_id.0].is_extensional();
            let data_len = if extensional {
                term_names.len()
            } else {
                term_names.len() - 2
            };

            if !extensional {
                let loc_name = &term_names[term_names.len() - 2];
                match body_loc {
                    None => {
                        let v = match by_var_name.get(loc_name.as_str()) {
                            Some(&v) => v,
                            None => new_var(
                                &mut vars,
                                &mut by_var_name,
                                loc_name,
                                const_vals.contains_key(loc_name),
                            ),
                        };
                        body_loc = Some(v);
                        if let Some(positions) = head_positions.get(loc_name.as_str()) {
                            for &k in positions {
                                head_var_map[k] = Some(v);
                            }
                        }
                    }
                    Some(v) if vars[v.0].name != *loc_name => {
                        return Err(ModelError::BodyLocationMismatch);
                    }
                    Some(_) => {}
                }

                let time_name = &term_names[term_names.len() - 1];
                match body_time {
                    None => {
                        let v = match by_var_name.get(time_name.as_str()) {
                            Some(&v) => v,
                            None => new_var(
                                &mut vars,
                                &mut by_var_name,
                                time_name,
                                const_vals.contains_key(time_name),
                            ),
                        };
                        body_time = Some(v);
                        if let Some(positions) = head_positions.get(time_name.as_str()) {
                            for &k in positions {
                                head_var_map[k] = Some(v);
                            }
                        }
                    }
                    Some(v) if vars[v.0].name != *time_name => {
                        return Err(ModelError::BodyTimeMismatch);
                    }
                    Some(_) => {}
                }
            }

            let mut positions: Vec<VarId> = Vec::with_capacity(data_len);
            for (j, name) in term_names[..data_len].iter().enumerate() {
                let constant = const_vals.contains_key(name);
                let v = match by_var_name.get(name.as_str()) {
                    Some(&v) => v,
                    None => {
                        let v = new_var(&mut vars, &mut by_var_name, name, constant);
                        if constant {
                            consts.insert(v, const_vals[name]);
                        }
                        v
                    }
                };
                vars[v.0].attrs.push(Attribute::new(rel_id, j));
                if let Some(head_positions) = head_positions.get(name.as_str()) {
                    for &k in head_positions {
                        head_var_map[k] = Some(v);
                    }
                }
                positions.push(v);
            }
            atom_vars.insert(rel_id, positions);
        }

        let mut time_model = TimeModel::Same;
        for atom in late_atoms {
            let names: Vec<&str> = atom
                .terms
                .iter()
                .map(|t| match t {
                    Term::Var(name) => Ok(name.as_str()),
                    Term::Const(_) => Err(match atom.relation.as_str() {
                        SUCCESSOR_RELATION => ModelError::MalformedSuccessor,
                        _ => ModelError::MalformedChoose(
                            "all terms in a time atom must be variables".to_string(),
                        ),
                    }),
                })
                .collect::<ModelResult<_>>()?;

            match atom.relation.as_str() {
                SUCCESSOR_RELATION => {
                    let bt = body_time.ok_or(ModelError::MalformedSuccessor)?;
                    if names.len() != 2
                        || names[0] != vars[bt.0].name
                        || names[1] != vars[head_time.0].name
                    {
                        return Err(ModelError::MalformedSuccessor);
                    }
                    time_model = TimeModel::Successor;
                }
                CHOOSE_RELATION => {
                    if names.is_empty() || *names.last().unwrap() != vars[head_time.0].name {
                        return Err(ModelError::MalformedChoose(
                            "the last element of a choose atom must be the head relation's time variable".to_string(),
                        ));
                    }
                    if names[..names.len() - 1] != head_terms[..n - 2] {
                        return Err(ModelError::MalformedChoose(
                            "the leading elements of a choose atom must be the head variables in order".to_string(),
                        ));
                    }
                    time_model = TimeModel::Async;
                }
                _ => unreachable!(),
            }
        }

        let head_var_map = head_var_map
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or(ModelError::HeadVarNotInBody(i)))
            .collect::<ModelResult<Vec<_>>>()?;

        self.rules.push(Rule {
            id: rule_id,
            head: head_rel,
            body,
            negated,
            vars,
            atom_vars,
            head_var_map,
            consts,
            time_model,
            head_loc,
            head_time,
            body_loc,
            body_time,
        });

        Ok(rule_id)
    }

    pub fn finish(self) -> Program {
        Program::new(self.relations, self.rules)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_gets_its_arithmetic_core_dependency() {
        let mut b = ProgramBuilder::new();
        let add = b.extensional("add", 3).unwrap();
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

        let rel = p.relation(add);
        assert_eq!(rel.core_deps().len(), 1);
        let dep = &rel.core_deps()[0];
        assert_eq!(dep.dom, vec![rel.attr(0), rel.attr(1)]);
        assert_eq!(dep.codom, rel.attr(2));
        assert_eq!(dep.func().eval(&[3, 4]), 7);
    }

    #[test]
    fn black_box_core_dependency_records_its_codomain() {
        let mut b = ProgramBuilder::new();
        let f = b.black_box("f", 3).unwrap();
        b.rule(
            "out",
            &["c", "l", "t"],
            vec![
                Atom::pos("in1", vec![Term::var("a"), Term::var("b"), Term::var("l"), Term::var("t")]),
                Atom::pos("f", vec![Term::var("a"), Term::var("b"), Term::var("c")]),
            ],
        )
        .unwrap();
        let p = b.finish();

        let rel = p.relation(f);
        let dep = &rel.core_deps()[0];
        assert_eq!(dep.dom, vec![rel.attr(0), rel.attr(1)]);
        assert_eq!(dep.codom, rel.attr(2));
    }

    #[test]
    fn extensional_relations_cannot_head_rules() {
        let mut b = ProgramBuilder::new();
        b.extensional("facts", 2).unwrap();
        let err = b
            .rule(
                "facts",
                &["a", "b", "l", "t"],
                vec![Atom::pos("in1", vec![Term::var("a"), Term::var("b"), Term::var("l"), Term::var("t")])],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::ExtensionalHead(_)));
    }

    #[test]
    fn arity_must_stay_constant() {
        let mut b = ProgramBuilder::new();
        b.rule(
            "out",
            &["a", "l", "t"],
            vec![Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")])],
        )
        .unwrap();
        let err = b
            .rule(
                "out2",
                &["a", "b", "l", "t"],
                vec![Atom::pos(
                    "in1",
                    vec![Term::var("a"), Term::var("b"), Term::var("l"), Term::var("t")],
                )],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { .. }));
    }

    #[test]
    fn body_locations_must_agree() {
        let mut b = ProgramBuilder::new();
        let err = b
            .rule(
                "out",
                &["a", "b", "l", "t"],
                vec![
                    Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                    Atom::pos("in2", vec![Term::var("b"), Term::var("m"), Term::var("t")]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::BodyLocationMismatch));
    }

    #[test]
    fn head_variables_must_appear_in_the_body() {
        let mut b = ProgramBuilder::new();
        let err = b
            .rule(
                "out",
                &["a", "b", "l", "t"],
                vec![Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")])],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::HeadVarNotInBody(1)));
    }

    #[test]
    fn malformed_successor_atom_is_rejected() {
        let mut b = ProgramBuilder::new();
        let err = b
            .rule(
                "out",
                &["a", "l", "s"],
                vec![
                    Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                    Atom::pos("succ", vec![Term::var("s"), Term::var("t")]),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::MalformedSuccessor));
    }

    #[test]
    fn choose_atom_selects_the_async_time_model() {
        let mut b = ProgramBuilder::new();
        b.rule(
            "out",
            &["a", "l", "s"],
            vec![
                Atom::pos("in1", vec![Term::var("a"), Term::var("l"), Term::var("t")]),
                Atom::pos("choose", vec![Term::var("a"), Term::var("s")]),
            ],
        )
        .unwrap();
        let p = b.finish();
        assert_eq!(p.rules()[0].time_model(), TimeModel::Async);
    }
}
