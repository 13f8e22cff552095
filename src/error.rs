use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Election namespace name is required")]
    NamespaceMissing,

    #[error("Invalid election config: {0}")]
    InvalidConfig(String),

    #[error("No lease found")]
    NoLeaseFound,

    #[error("Lease already held by {holder:?}")]
    LeaseHeldByOther { holder: Option<String> },

    #[error("Lease is owned by {owner:?}")]
    NotLeaseOwner { owner: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Store call cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl Error {
    /// Protocol signals the engine resolves into a decision rather than
    /// surfacing to the caller.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NoLeaseFound | Error::LeaseHeldByOther { .. } | Error::NotLeaseOwner { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
