use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Startup and wiring errors. Anything surfacing here stops the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] ethers::signers::WalletError),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Other: {0}")]
    Other(String),
}

/// Errors coming back from a read accessor or a relay endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ChainError {
    /// Timeouts, dropped connections and throttling are worth one more try
    /// against another backend. Everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Timeout | ChainError::Connection(_) | ChainError::RateLimited(_)
        )
    }

    /// Map a raw provider/relay message onto the taxonomy.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            ChainError::Timeout
        } else if lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("connection closed")
            || lower.contains("error sending request")
            || lower.contains("broken pipe")
        {
            ChainError::Connection(message)
        } else if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
        {
            ChainError::RateLimited(message)
        } else {
            ChainError::Rpc(message)
        }
    }
}

impl From<ethers::providers::ProviderError> for ChainError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        ChainError::classify(err.to_string())
    }
}

impl From<ethers::abi::Error> for ChainError {
    fn from(err: ethers::abi::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

/// Oracle lookups that cannot be trusted.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PriceError {
    #[error("no price for token {0:?}")]
    Missing(ethers::types::Address),

    #[error("price for token {token:?} is {age_secs}s old (limit {max_age_secs}s)")]
    Stale {
        token: ethers::types::Address,
        age_secs: u64,
        max_age_secs: u64,
    },

    #[error("non-positive price {usd} for token {token:?}")]
    NonPositive {
        token: ethers::types::Address,
        usd: f64,
    },
}

/// Failures turning an approved candidate into venue calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("route has no legs")]
    EmptyRoute,

    #[error("no quote available for pool {0:?}")]
    QuoteUnavailable(ethers::types::Address),

    #[error("vault pool {0:?} has no pool id")]
    MissingPoolId(ethers::types::Address),

    #[error("token {token:?} is not part of pool {pool:?}")]
    TokenNotInPool {
        token: ethers::types::Address,
        pool: ethers::types::Address,
    },
}
