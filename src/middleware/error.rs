use thiserror::Error;

pub type ModelResult<T, E = ModelError> = core::result::Result<T, E>;

/// Errors raised while populating a [`Program`](super::Program) through the
/// builder. The analyzer itself never returns these: once a program has been
/// built successfully, analysis is a total computation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("relation {0:?} is already declared")]
    DuplicateRelation(String),

    #[error("{0:?} is a replicated read-only relation and cannot appear in the head of a rule")]
    ExtensionalHead(String),

    #[error("the number of attributes must be constant for any given relation, but {name:?} had {expected} attributes and now has {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("{0:?} is not a replicated read-only relation so it must have location and time attributes")]
    MissingLocTime(String),

    #[error("the location in all body atoms (where applicable) must be the same")]
    BodyLocationMismatch,

    #[error("the time in all body atoms (where applicable) must be the same")]
    BodyTimeMismatch,

    #[error("variable {0} of the head does not appear in the body")]
    HeadVarNotInBody(usize),

    #[error("incorrectly formatted successor atom: expected succ(<body time>, <head time>)")]
    MalformedSuccessor,

    #[error("incorrectly formatted choose atom: {0}")]
    MalformedChoose(String),

    #[error("a black-box relation must have at least one input attribute")]
    EmptyBlackBox,
}
