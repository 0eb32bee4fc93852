use thiserror::Error;

/// Errors raised while building or evaluating a stack declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("resource `{0}` is declared more than once")]
    DuplicateResource(String),

    #[error("resource `{0}` is not part of the graph")]
    UnknownResource(String),

    #[error("resource `{0}` cannot depend on itself")]
    SelfDependency(String),

    #[error("dependency cycle between resources: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("cannot resolve {0}")]
    Unresolved(String),

    #[error("invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },
}
