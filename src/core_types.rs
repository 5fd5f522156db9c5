//! Core types used throughout the system
//!
//! Type aliases that give the raw store values a semantic name.

/// Account ID - primary key of the `account` table.
///
/// # Constraints:
/// - **Unique**: enforced by the ledger store, not by this crate
/// - **Totally ordered**: lexicographic order of the id is the global lock order
///   used by the direct backend
pub type AccountId = String;

/// Monetary amount and balance representation.
pub type Amount = rust_decimal::Decimal;
