// models.rs - Ledger account and transfer types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{AccountId, Amount};

/// A ledger account as held by the store of record.
///
/// Balances are never cached by the engine; an `Account` value only exists
/// to seed the store at batch setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Amount,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, balance: Amount) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }
}

/// A single funds transfer. Immutable and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

impl Transaction {
    pub fn new(from: impl Into<AccountId>, to: impl Into<AccountId>, amount: Amount) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    /// The two account ids in global lock order (ascending), regardless of
    /// transfer direction.
    #[inline]
    pub fn lock_order(&self) -> (&str, &str) {
        if self.from <= self.to {
            (&self.from, &self.to)
        } else {
            (&self.to, &self.from)
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.amount)
    }
}
