//! Peso amount helpers shared by the planner, the ledger rows, and user replies.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds `amount` to the nearest multiple of `unit`, midpoints to even.
pub fn round_to_unit(amount: Decimal, unit: Decimal) -> Decimal {
    if unit.is_zero() {
        return amount;
    }
    (amount / unit).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * unit
}

pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Whole pesos with comma thousands separators, e.g. `150,000`.
pub fn format_pesos(amount: Decimal) -> String {
    let whole = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    let digits = whole.abs().trunc().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole.is_sign_negative() && !whole.is_zero() {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Canonical cell encoding for amounts written to the ledger.
pub fn to_cell(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Parses a ledger cell such as `150000`, `150000.5`, or `$150,000`.
pub fn parse_amount(cell: &str) -> Option<Decimal> {
    let cleaned: String =
        cell.trim().chars().filter(|ch| !matches!(ch, '$' | ',' | ' ' | '\u{a0}')).collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}
