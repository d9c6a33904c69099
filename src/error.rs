//! Error taxonomy for the Kagan back-office core.
//!
//! Every fallible operation in this crate returns [`PosResult`]. Errors are
//! raised to the caller synchronously; the core never retries or silently
//! recovers. User-visible failure presentation (dialogs, toasts) lives in
//! the UI layer, which matches on the error kind.

use thiserror::Error;

/// Crate-wide result alias.
pub type PosResult<T> = Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    /// Malformed or out-of-range input (negative price, rate outside 0-100,
    /// unparseable amount string, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong lifecycle state (double session
    /// close, pay before finalize, add item to a finalized invoice, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Referenced entity does not exist (or is deactivated where active is
    /// required).
    #[error("not found: {0}")]
    NotFound(String),

    /// Campaign exists and is active, but today is outside its validity
    /// window.
    #[error("campaign code {code} is outside its validity window")]
    CampaignExpired { code: String },

    /// Wallet payment exceeding the customer's balance.
    #[error("insufficient wallet balance: need {required:.2}, have {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    /// Finalize called on an invoice with no line items.
    #[error("invoice has no line items")]
    EmptyInvoice,

    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Filesystem failure while bootstrapping the database or log
    /// directories.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PosError {
    /// Shorthand used by the modules for argument validation failures.
    pub(crate) fn invalid_arg(msg: impl Into<String>) -> Self {
        PosError::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        PosError::InvalidState(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        PosError::NotFound(msg.into())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_amounts() {
        let err = PosError::InsufficientFunds {
            required: 42.5,
            available: 10.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("42.50"));
        assert!(msg.contains("10.00"));
    }

    #[test]
    fn test_db_error_wraps() {
        let err: PosError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, PosError::Db(_)));
    }
}
