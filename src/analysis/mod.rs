//! The analyzer: symbolic functional-dependency derivation and the
//! distribution-policy search built on top of it. Everything here is a pure
//! computation over a finished [`Program`](crate::middleware::Program);
//! structural invariant violations are bugs and abort.

pub mod copartition;
pub mod deps;
pub mod func;
pub mod partition;
pub mod set;

pub use copartition::{copartition_deps, CdKey, CdMap};
pub use deps::{dep_closure, fds, head_fds, rule_deps, Dep, Fd, FdMap, VarDep};
pub use func::{Expr, Func, Op};
pub use partition::{dist_policies, DistFunction, DistPolicy, PartitionFn};
pub use set::EqSet;
