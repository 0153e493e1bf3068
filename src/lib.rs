//! Static analysis for a temporal, location-aware Datalog dialect in which
//! every non-replicated relation carries trailing location and time
//! attributes.
//!
//! Given a program of rules, the analyzer derives two kinds of information:
//! the functional dependencies each intensional relation satisfies, as
//! symbolic functions over its attributes, and the distribution policies
//! under which every rule joins only co-partitioned tuples and can therefore
//! run without cross-shard shuffling.

pub mod analysis;
pub mod middleware;

#[cfg(test)]
pub mod examples;
