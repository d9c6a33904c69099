//! Kagan Collection back-office core.
//!
//! Billing and ledger engine for a combined salon, cafe, and gaming-net
//! ("gamnet") store: the pricing catalog, gaming-session timing, campaign
//! discounts, employee commissions, the invoice lifecycle, and the customer
//! ledger, persisted in a local SQLite database.
//!
//! The UI layer is a collaborator, not part of this crate: it hands raw
//! string input to the [`input`] parsers, shows the `{id, label}` pick
//! lists the modules produce, and calls the typed operations. Time comes in
//! through the injectable [`clock::Clock`], so every billing computation is
//! deterministic under test.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod campaigns;
pub mod catalog;
pub mod clock;
pub mod commissions;
pub mod customers;
pub mod db;
pub mod devices;
pub mod employees;
pub mod error;
pub mod input;
pub mod invoices;
pub mod sessions;

pub use clock::{Clock, FixedClock, SystemClock};
pub use db::DbState;
pub use error::{PosError, PosResult};

/// Round a money amount to two decimals. Applied only at the point of
/// persistence; intermediate computation keeps full precision.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Initialize structured logging (console + daily rolling file).
///
/// Honors `RUST_LOG`; defaults to info with debug for this crate. Call once
/// from the host application before touching the database.
pub fn init_tracing(log_dir: &std::path::Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kagan_pos=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "kagan");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app; dropping it flushes
    // logs. The host runs until process exit, so leaking it is the intent.
    std::mem::forget(guard);

    info!("Logging initialized (v{})", env!("CARGO_PKG_VERSION"));
}

// ===========================================================================
// Tests
// ===========================================================================
