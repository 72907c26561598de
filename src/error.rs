/// Errors returned while setting up a [`ContextLogger`](crate::ContextLogger).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a global logger has already been installed")]
    Install(#[from] log::SetLoggerError),

    #[error("invalid logger configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
