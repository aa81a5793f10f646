//! Crate-level error type
//!
//! Each module carries its own error enum; this wrapper is what the
//! processing service surface returns, so callers match on one type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] crate::validator::ValidationError),

    #[error(transparent)]
    Ledger(#[from] crate::ledger::LedgerError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Quality(#[from] crate::quality::QualityError),

    #[error(transparent)]
    Settlement(#[from] crate::settlement::SettlementError),

    #[error(transparent)]
    Oracle(#[from] crate::oracle::OracleError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Issuance sink failure: {0}")]
    Issuance(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
