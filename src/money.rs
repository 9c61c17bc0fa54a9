use crate::model::Cents;

/// Parse a decimal amount (`25`, `25.5`, `25.50`, `-3.10`) into cents.
/// At most two fractional digits are accepted; nothing is rounded.
pub fn parse_cents(s: &str) -> Result<Cents, MoneyError> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(MoneyError::Invalid(s.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(MoneyError::Invalid(s.to_string()));
    }
    if frac.len() > 2 {
        return Err(MoneyError::TooPrecise(s.to_string()));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| MoneyError::Overflow(s.to_string()))?
    };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| MoneyError::Invalid(s.to_string()))? * 10,
        _ => frac.parse().map_err(|_| MoneyError::Invalid(s.to_string()))?,
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(frac))
        .ok_or_else(|| MoneyError::Overflow(s.to_string()))?;
    Ok(if negative { -cents } else { cents })
}

/// Format cents as a decimal string with exactly two fractional digits.
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[derive(Debug, PartialEq, Eq)]
pub enum MoneyError {
    Invalid(String),
    TooPrecise(String),
    Overflow(String),
}

impl std::fmt::Display for MoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoneyError::Invalid(s) => write!(f, "invalid amount: {s}"),
            MoneyError::TooPrecise(s) => write!(f, "amount has more than 2 decimals: {s}"),
            MoneyError::Overflow(s) => write!(f, "amount out of range: {s}"),
        }
    }
}

impl std::error::Error for MoneyError {}
