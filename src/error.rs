use thiserror::Error;

/// Errors surfaced by the detection engine and its loaders.
///
/// `Config` and `ModelIo` are fatal at construction time; the engine never
/// reaches `Running`. `SchemaMismatch` is scoped to a single record: the
/// record is rejected and counted, processing continues. `Lifecycle` is a
/// caller error, fatal to the call but not to the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("engine is {phase}, not accepting records")]
    Lifecycle { phase: &'static str },

    #[error("model artifact unreadable: {0}")]
    ModelIo(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Error::SchemaMismatch(msg.into())
    }
}
