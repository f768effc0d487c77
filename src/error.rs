use thiserror::Error;

/// The generic Error type covering all failure modes of this library.
///
/// The optimizer itself is best-effort and bails out conservatively instead
/// of failing; errors here signal contract violations (a graph in the wrong
/// state, a malformed body), which are programming errors in the caller or
/// in a pass, not recoverable optimization conditions.
#[derive(Error, Debug)]
pub enum Error {
    /// A control-flow-graph contract violation.
    ///
    /// Raised when a transformation is entered with the graph in the wrong
    /// state (not built, or already built), or when a body cannot be split
    /// into blocks (empty body, branch target that is not an instruction
    /// boundary).
    #[error("{0}")]
    Graph(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
