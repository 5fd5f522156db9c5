//! Ledger fixture import
//!
//! Accounts file, one per line:      `<id>, <balance>`
//! Transactions file, one per line:  `<from>, <to>, <amount>`
//!
//! Fields are separated by `", "`. Amounts may use a decimal comma
//! (`12,50`), which is read as `12.50`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use crate::core_types::Amount;
use crate::models::{Account, Transaction};

const FIELD_SEPARATOR: &str = ", ";

/// Load accounts from a file
pub fn load_accounts(path: &Path) -> Result<Vec<Account>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_accounts(BufReader::new(file), &path.display().to_string())
}

/// Load transactions from a file
pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    parse_transactions(BufReader::new(file), &path.display().to_string())
}

pub fn parse_accounts<R: BufRead>(reader: R, source: &str) -> Result<Vec<Account>> {
    let mut accounts = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", source))?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(2, FIELD_SEPARATOR).collect();
        if parts.len() != 2 {
            bail!("Invalid line format at {}:{}: {}", source, line_num + 1, line);
        }
        let balance = parse_amount(parts[1])
            .with_context(|| format!("Invalid balance at {}:{}", source, line_num + 1))?;
        accounts.push(Account::new(parts[0].trim(), balance));
    }
    tracing::info!("Loaded {} accounts from {}", accounts.len(), source);
    Ok(accounts)
}

pub fn parse_transactions<R: BufRead>(reader: R, source: &str) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", source))?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(3, FIELD_SEPARATOR).collect();
        if parts.len() != 3 {
            bail!("Invalid line format at {}:{}: {}", source, line_num + 1, line);
        }
        let amount = parse_amount(parts[2])
            .with_context(|| format!("Invalid amount at {}:{}", source, line_num + 1))?;
        transactions.push(Transaction::new(parts[0].trim(), parts[1].trim(), amount));
    }
    tracing::info!("Loaded {} transactions from {}", transactions.len(), source);
    Ok(transactions)
}

/// Parse an amount, accepting a single decimal comma
fn parse_amount(raw: &str) -> Result<Amount> {
    let normalized = raw.trim().replacen(',', ".", 1);
    Amount::from_str(&normalized).with_context(|| format!("not a decimal: {:?}", raw))
}
