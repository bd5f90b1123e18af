use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("codec: {0}")]
    Codec(String),
    #[error("store: {0}")]
    Store(String),
    #[error("downstream: {0}")]
    Downstream(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
    pub fn downstream(msg: impl Into<String>) -> Self {
        Self::Downstream(msg.into())
    }
}

// Map TOML deserialization errors into the config error domain without adding a new variant
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
