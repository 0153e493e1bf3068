//! Program fixtures shared by the analysis test suites.

use crate::middleware::{Atom, Program, ProgramBuilder, Term};

/// A builder preloaded with the arithmetic relations and the opaque
/// relations `f` and `g`.
pub fn builder_with_edbs() -> ProgramBuilder {
    let mut b = ProgramBuilder::new();
    b.extensional("add", 3).unwrap();
    b.extensional("sub", 3).unwrap();
    b.black_box("f", 3).unwrap();
    b.black_box("g", 3).unwrap();
    b
}

pub fn vars(names: &[&str]) -> Vec<Term> {
    names.iter().map(|n| Term::var(*n)).collect()
}

/// `out(a,b,c,l,t) :- in1(a,b,c,l,t)`
pub fn identity_program() -> Program {
    let mut b = builder_with_edbs();
    b.rule(
        "out",
        &["a", "b", "c", "l", "t"],
        vec![Atom::pos("in1", vars(&["a", "b", "c", "l", "t"]))],
    )
    .unwrap();
    b.finish()
}

/// `out(a,c,l,t) :- in1(a,l,t), add(a,1,c)`
pub fn increment_program() -> Program {
    let mut b = builder_with_edbs();
    b.rule(
        "out",
        &["a", "c", "l", "t"],
        vec![
            Atom::pos("in1", vars(&["a", "l", "t"])),
            Atom::pos("add", vec![Term::var("a"), 1.into(), Term::var("c")]),
        ],
    )
    .unwrap();
    b.finish()
}

/// Two rules deriving `out` through the same opaque join:
/// `out(a,b,c,l,t) :- in1(a,b,l,t), f(a,b,c)` and likewise over `in2`.
pub fn shared_opaque_program(swap_second: bool) -> Program {
    let mut b = builder_with_edbs();
    b.rule(
        "out",
        &["a", "b", "c", "l", "t"],
        vec![
            Atom::pos("in1", vars(&["a", "b", "l", "t"])),
            Atom::pos("f", vars(&["a", "b", "c"])),
        ],
    )
    .unwrap();
    let second_f = if swap_second {
        vars(&["b", "a", "c"])
    } else {
        vars(&["a", "b", "c"])
    };
    b.rule(
        "out",
        &["a", "b", "c", "l", "t"],
        vec![Atom::pos("in2", vars(&["a", "b", "l", "t"])), Atom::pos("f", second_f)],
    )
    .unwrap();
    b.finish()
}

/// `out(a,c,l,t) :- in1(a,b,l,t), f(a,b,c), in2(c,l,t)`
pub fn opaque_join_program() -> Program {
    let mut b = builder_with_edbs();
    b.rule(
        "out",
        &["a", "c", "l", "t"],
        vec![
            Atom::pos("in1", vars(&["a", "b", "l", "t"])),
            Atom::pos("f", vars(&["a", "b", "c"])),
            Atom::pos("in2", vars(&["c", "l", "t"])),
        ],
    )
    .unwrap();
    b.finish()
}

/// `out(a,e,l,t) :- in1(a,b,d,l,t), f(a,b,c), g(c,d,e), in2(e,l,t)`
pub fn chained_opaque_program() -> Program {
    let mut b = builder_with_edbs();
    b.rule(
        "out",
        &["a", "e", "l", "t"],
        vec![
            Atom::pos("in1", vars(&["a", "b", "d", "l", "t"])),
            Atom::pos("f", vars(&["a", "b", "c"])),
            Atom::pos("g", vars(&["c", "d", "e"])),
            Atom::pos("in2", vars(&["e", "l", "t"])),
        ],
    )
    .unwrap();
    b.finish()
}

/// `out(a,c,l,t) :- in1(a,l,t), add(a,1,c), in2(c,l,t)`
pub fn increment_join_program() -> Program {
    let mut b = builder_with_edbs();
    add_chain_rule(&mut b, "out", "in1", 1, "in2");
    b.finish()
}

/// Three chained rules with additive constants 1, 2, 3 across `in1…in4`.
pub fn additive_chain_program() -> Program {
    let mut b = builder_with_edbs();
    add_chain_rule(&mut b, "out1", "in1", 1, "in2");
    add_chain_rule(&mut b, "out2", "in2", 2, "in3");
    add_chain_rule(&mut b, "out3", "in3", 3, "in4");
    b.finish()
}

/// Two rules over the same relations with conflicting additive constants.
pub fn conflicting_constants_program() -> Program {
    let mut b = builder_with_edbs();
    add_chain_rule(&mut b, "out1", "in1", 1, "in2");
    add_chain_rule(&mut b, "out2", "in1", 2, "in2");
    b.finish()
}

/// Two independent additive chains: `in1 -> in2 -> in3` and
/// `in4 -> in5 -> in6`.
pub fn two_chains_program() -> Program {
    let mut b = builder_with_edbs();
    add_chain_rule(&mut b, "out1", "in1", 1, "in2");
    add_chain_rule(&mut b, "out2", "in2", 2, "in3");
    add_chain_rule(&mut b, "out3", "in4", 3, "in5");
    add_chain_rule(&mut b, "out4", "in5", 4, "in6");
    b.finish()
}

/// `<head>(a,c,l,t) :- <src>(a,l,t), add(a,<k>,c), <dst>(c,l,t)`
fn add_chain_rule(b: &mut ProgramBuilder, head: &str, src: &str, k: i64, dst: &str) {
    b.rule(
        head,
        &["a", "c", "l", "t"],
        vec![
            Atom::pos(src, vars(&["a", "l", "t"])),
            Atom::pos("add", vec![Term::var("a"), k.into(), Term::var("c")]),
            Atom::pos(dst, vars(&["c", "l", "t"])),
        ],
    )
    .unwrap();
}
