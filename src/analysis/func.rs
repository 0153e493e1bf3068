//! Symbolic expressions and functions. A `Func` is a single-output function
//! over an ordered tuple of inputs; the derivation passes reshape its domain
//! (merging slots, substituting other functions in) while keeping the
//! expression tree consistent with the slot numbering.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::middleware::Attribute;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Rem,
}

impl Op {
    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Rem => a % b,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Add => write!(f, "+"),
            Op::Sub => write!(f, "-"),
            Op::Mul => write!(f, "*"),
            Op::Rem => write!(f, "%"),
        }
    }
}

/// A symbolic expression over the inputs of the enclosing [`Func`].
///
/// `BlackBox` nodes stand for opaque callables whose semantics are unknown to
/// the algebra; they compare structurally and refuse evaluation. The optional
/// metadata records the attribute whose relation defines the callable, which
/// the partition-rule synthesizer uses to emit the corresponding join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Expr {
    Const(i64),
    Input(usize),
    BinOp(Op, Box<Expr>, Box<Expr>),
    BlackBox {
        id: String,
        args: Vec<Expr>,
        meta: Option<Attribute>,
    },
}

impl Expr {
    pub fn bin_op(op: Op, left: Expr, right: Expr) -> Expr {
        Expr::BinOp(op, Box::new(left), Box::new(right))
    }

    pub fn add(left: Expr, right: Expr) -> Expr {
        Expr::bin_op(Op::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Expr {
        Expr::bin_op(Op::Sub, left, right)
    }

    /// An opaque node whose arguments are the listed raw inputs.
    pub fn black_box(id: impl Into<String>, inputs: &[usize], meta: Option<Attribute>) -> Expr {
        Expr::BlackBox {
            id: id.into(),
            args: inputs.iter().map(|&i| Expr::Input(i)).collect(),
            meta,
        }
    }

    pub fn eval(&self, input: &[i64]) -> i64 {
        match self {
            Expr::Const(n) => *n,
            Expr::Input(i) => input[*i],
            Expr::BinOp(op, a, b) => op.apply(a.eval(input), b.eval(input)),
            Expr::BlackBox { id, .. } => {
                panic!("cannot evaluate the opaque expression {id:?}")
            }
        }
    }

    /// Simultaneously replaces the listed inputs throughout the tree.
    fn replace(&self, replacements: &HashMap<usize, Expr>) -> Expr {
        match self {
            Expr::Const(_) => self.clone(),
            Expr::Input(i) => replacements.get(i).cloned().unwrap_or_else(|| self.clone()),
            Expr::BinOp(op, a, b) => {
                Expr::bin_op(*op, a.replace(replacements), b.replace(replacements))
            }
            Expr::BlackBox { id, args, meta } => Expr::BlackBox {
                id: id.clone(),
                args: args.iter().map(|a| a.replace(replacements)).collect(),
                meta: *meta,
            },
        }
    }

    fn is_opaque(&self) -> bool {
        matches!(self, Expr::BlackBox { .. })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(n) => write!(f, "{n}"),
            Expr::Input(i) => write!(f, "x.{i}"),
            Expr::BinOp(op, a, b) => write!(f, "({a}) {op} ({b})"),
            Expr::BlackBox { id, args, .. } => {
                write!(f, "BlackBox({id}, [")?;
                for (i, a) in args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, "])")
            }
        }
    }
}

/// A symbolic function with a `domain_dim`-tuple domain and a single
/// output, computed by `exp` over the inputs `x.0 … x.(domain_dim-1)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Func {
    domain_dim: usize,
    codomain_dim: usize,
    exp: Expr,
}

impl Func {
    pub fn identity() -> Func {
        Func::from_expr(Expr::Input(0), 1)
    }

    pub fn constant(val: i64) -> Func {
        Func::from_expr(Expr::Const(val), 0)
    }

    pub fn from_expr(exp: Expr, domain_dim: usize) -> Func {
        Func {
            domain_dim,
            codomain_dim: 1,
            exp,
        }
    }

    /// An opaque `domain_dim`-ary function applied to its raw inputs.
    pub fn black_box(id: impl Into<String>, domain_dim: usize, meta: Option<Attribute>) -> Func {
        let inputs: Vec<usize> = (0..domain_dim).collect();
        Func::from_expr(Expr::black_box(id, &inputs, meta), domain_dim)
    }

    /// An opaque function whose `i`th argument is `transforms[i]` when
    /// provided and the raw input `x.i` otherwise, declared over
    /// `domain_dim` inputs.
    pub fn nested_black_box(
        id: impl Into<String>,
        domain_dim: usize,
        inner_dim: usize,
        transforms: &HashMap<usize, Expr>,
        meta: Option<Attribute>,
    ) -> Func {
        let args: Vec<Expr> = (0..inner_dim)
            .map(|i| transforms.get(&i).cloned().unwrap_or(Expr::Input(i)))
            .collect();
        Func::from_expr(
            Expr::BlackBox {
                id: id.into(),
                args,
                meta,
            },
            domain_dim,
        )
    }

    pub fn domain_dim(&self) -> usize {
        self.domain_dim
    }

    pub fn exp(&self) -> &Expr {
        &self.exp
    }

    pub fn eval(&self, x: &[i64]) -> i64 {
        self.exp.eval(x)
    }

    /// Collapses the listed domain slots into the smallest of them. Later
    /// inputs keep their numbers; only the collapsed slots are rewritten.
    pub fn merge_domain(&mut self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        self.domain_dim -= indices.len() - 1;

        let mut indices = indices.to_vec();
        indices.sort_unstable();
        let min = indices[0];

        let mut replacements = HashMap::new();
        for &i in &indices[1..] {
            replacements.insert(i, Expr::Input(min));
        }
        self.exp = self.exp.replace(&replacements);
    }

    pub fn add_to_domain(&mut self, n: usize) {
        self.domain_dim += n;
    }

    /// Renumbers inputs according to `moved` (old index to new index).
    pub(crate) fn permute_inputs(&mut self, moved: &HashMap<usize, usize>) {
        let replacements: HashMap<usize, Expr> = moved
            .iter()
            .map(|(&old, &new)| (old, Expr::Input(new)))
            .collect();
        self.exp = self.exp.replace(&replacements);
    }

    /// Replaces the input slot `subst_index` with the function `g`, wiring
    /// `g`'s inputs to the slots listed in `dom_indices` and renumbering the
    /// inputs above the removed slot.
    pub fn substitute(&mut self, subst_index: usize, dom_indices: &[usize], g: &Func) {
        // Re-express g over the receiver's (post-removal) input numbering.
        let mut g_replacements = HashMap::new();
        for (i, &index) in dom_indices.iter().enumerate() {
            if index == subst_index {
                panic!("the input being substituted cannot also feed the replacement function");
            }
            let index = if index > subst_index { index - 1 } else { index };
            g_replacements.insert(i, Expr::Input(index));
        }

        let mut replacements = HashMap::new();
        for i in subst_index + 1..self.domain_dim {
            replacements.insert(i, Expr::Input(i - 1));
        }
        replacements.insert(subst_index, g.exp.replace(&g_replacements));
        self.exp = self.exp.replace(&replacements);

        self.domain_dim -= 1;
    }

    /// Whether two functions agree. Opaque nodes compare structurally by
    /// name and arguments; everything else is probed at a fixed set of
    /// sample tuples. Comparing an opaque node against a non-opaque one is a
    /// bug and aborts.
    pub fn equivalent(&self, other: &Func) -> bool {
        if self.domain_dim != other.domain_dim || self.codomain_dim != other.codomain_dim {
            return false;
        }
        expr_equal(&self.exp, &other.exp, self.domain_dim)
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ Dom: {}, Codom: {}, Exp: {} }}",
            self.domain_dim, self.codomain_dim, self.exp
        )
    }
}

fn expr_equal(a: &Expr, b: &Expr, domain_dim: usize) -> bool {
    match (a, b) {
        (
            Expr::BlackBox { id: id_a, args: args_a, .. },
            Expr::BlackBox { id: id_b, args: args_b, .. },
        ) => {
            id_a == id_b
                && args_a.len() == args_b.len()
                && args_a
                    .iter()
                    .zip(args_b)
                    .all(|(x, y)| expr_equal(x, y, domain_dim))
        }
        _ if a.is_opaque() || b.is_opaque() => {
            panic!("cannot compare an opaque expression against a non-opaque one")
        }
        // A sampling heuristic: probe both sides at a handful of fixed
        // tuples, offsetting each slot by its index.
        _ => {
            let values: [i64; 4] = [0, 1, 31, 100];
            for v in values {
                let mut input: Vec<i64> = (0..domain_dim).map(|i| v + i as i64).collect();
                if a.eval(&input) != b.eval(&input) {
                    return false;
                }
                for x in input.iter_mut() {
                    *x = -*x;
                }
                if a.eval(&input) != b.eval(&input) {
                    return false;
                }
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_identity_and_add() {
        let id = Func::identity();
        assert_eq!(id.eval(&[1]), 1);
        assert_eq!(id.eval(&[0]), 0);

        let f = Func::from_expr(Expr::add(Expr::Input(1), Expr::Input(3)), 5);
        assert_eq!(f.eval(&[1, 2, 3, 4, 5]), 6);
        assert_eq!(f.eval(&[0, -1, -5, -6, 10]), -7);
    }

    #[test]
    fn merge_domain_collapses_slots() {
        let mut f = Func::from_expr(Expr::add(Expr::Input(0), Expr::Input(1)), 2);
        f.merge_domain(&[0, 1]);
        assert_eq!(f.domain_dim(), 1);
        assert_eq!(f.eval(&[1]), 2);
        assert_eq!(f.eval(&[2]), 4);
    }

    #[test]
    fn merge_domain_applies_repeatedly() {
        let mut f = Func::from_expr(
            Expr::add(Expr::add(Expr::Input(0), Expr::Input(1)), Expr::Input(3)),
            5,
        );
        f.merge_domain(&[0, 1]);
        f.merge_domain(&[1, 3]);
        assert_eq!(f.domain_dim(), 3);
        assert_eq!(f.eval(&[1, 2, 3]), 4);
        assert_eq!(f.eval(&[2, 5, 6]), 9);
    }

    #[test]
    fn substitute_rewires_and_shrinks_the_domain() {
        // f(x0, x1, x2) = (x0 + x1) + x2; replace x1 with g(x0) = x0 + 3.
        let mut f = Func::from_expr(
            Expr::add(Expr::add(Expr::Input(0), Expr::Input(1)), Expr::Input(2)),
            3,
        );
        let g = Func::from_expr(Expr::add(Expr::Input(0), Expr::Const(3)), 1);
        f.substitute(1, &[0], &g);
        assert_eq!(f.domain_dim(), 2);
        // f'(a, c) = (a + (a + 3)) + c
        assert_eq!(f.eval(&[1, 10]), 15);
        assert_eq!(f.eval(&[-2, 4]), 3);
    }

    #[test]
    #[should_panic(expected = "cannot also feed")]
    fn substitute_rejects_self_referential_wiring() {
        let mut f = Func::from_expr(Expr::add(Expr::Input(0), Expr::Input(1)), 2);
        let g = Func::identity();
        f.substitute(0, &[0], &g);
    }

    #[test]
    fn equivalence_probes_arithmetic_shapes() {
        assert!(Func::identity().equivalent(&Func::identity()));

        let a = Func::from_expr(Expr::Input(1), 2);
        let b = Func::from_expr(Expr::Input(0), 0);
        assert!(!a.equivalent(&b));

        // Same function, different tree shapes.
        let a = Func::from_expr(
            Expr::add(Expr::add(Expr::Const(1), Expr::Const(2)), Expr::Input(1)),
            2,
        );
        let b = Func::from_expr(Expr::add(Expr::Input(1), Expr::Const(3)), 2);
        assert!(a.equivalent(&b));

        let a = Func::from_expr(
            Expr::add(Expr::add(Expr::Const(3), Expr::Const(2)), Expr::Input(1)),
            2,
        );
        assert!(!a.equivalent(&b));

        // Differing domains are never equivalent.
        let a = Func::from_expr(Expr::Input(0), 2);
        let b = Func::from_expr(Expr::Input(2), 3);
        assert!(!a.equivalent(&b));
    }

    #[test]
    fn opaque_nodes_compare_structurally() {
        let a = Func::black_box("f", 2, None);
        let b = Func::black_box("f", 2, None);
        let c = Func::black_box("g", 2, None);
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&c));

        // Same name, different wiring.
        let swapped = Func::from_expr(Expr::black_box("f", &[1, 0], None), 2);
        assert!(!a.equivalent(&swapped));
    }

    #[test]
    #[should_panic(expected = "cannot compare an opaque expression")]
    fn mixed_opaque_comparison_aborts() {
        let a = Func::black_box("f", 1, None);
        let b = Func::identity();
        a.equivalent(&b);
    }

    #[test]
    #[should_panic(expected = "cannot evaluate")]
    fn opaque_eval_aborts() {
        Func::black_box("f", 1, None).eval(&[1]);
    }
}
