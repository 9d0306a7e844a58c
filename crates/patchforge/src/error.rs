use std::fmt;

/// Broad failure classes the driver reacts to differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The registry contents are wrong: unknown ids, duplicate keys,
    /// dependency cycles. Surfaced before any tree mutation.
    Config,
    /// One or more patches failed to apply; the batch still ran to the end.
    Application,
    /// The surroundings are broken: missing working tree, missing artifact,
    /// unreadable or unparsable registry document.
    Environment,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    msg: String,
}

impl Error {
    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: Kind::Config,
            msg: msg.into(),
        }
    }

    pub fn application<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: Kind::Application,
            msg: msg.into(),
        }
    }

    pub fn environment<M: Into<String>>(msg: M) -> Self {
        Self {
            kind: Kind::Environment,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::environment(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::environment(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
