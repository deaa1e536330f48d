#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A dependency capture was started on a context that is already capturing.
    #[error("collision in state binding: a capture is already active on this context")]
    Collision,
    #[error("cannot write `{key}`: state is frozen")]
    Frozen { key: String },
    #[error("cannot write `{key}`: {reason}")]
    Rejected { key: String, reason: &'static str },
}
