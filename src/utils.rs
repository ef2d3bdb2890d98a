use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Utc};

use crate::errors::ControllerError;

/// Decimal places of the payment token. All monetary amounts in the crate are
/// fixed-point integers scaled by 10^TOKEN_DECIMALS; no floating point ever
/// touches money.
pub const TOKEN_DECIMALS: u32 = 6;

/// 10^TOKEN_DECIMALS.
pub const TOKEN_SCALE: u128 = 1_000_000;

/// Get the current time in seconds since the Unix epoch
pub fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Unix timestamp `days` days from now, used for due-date validation.
pub fn epoch_days_from_now(days: i64) -> u64 {
    (Utc::now() + Duration::days(days)).timestamp().max(0) as u64
}

/// Parse a decimal token amount ("123.45") into its scaled integer form.
///
/// String-based on purpose: going through a float would silently lose
/// precision on large balances. Rejects empty input, signs, more than
/// TOKEN_DECIMALS fractional digits, and anything that overflows u128.
pub fn parse_token_amount(input: &str) -> Result<u128, ControllerError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ControllerError::InvalidAmount("empty amount".to_string()));
    }
    if input.starts_with('+') || input.starts_with('-') {
        return Err(ControllerError::InvalidAmount(format!(
            "signed amount not allowed: {}",
            input
        )));
    }

    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(ControllerError::InvalidAmount(input.to_string()));
    }
    if frac.len() > TOKEN_DECIMALS as usize {
        return Err(ControllerError::InvalidAmount(format!(
            "more than {} decimal places: {}",
            TOKEN_DECIMALS, input
        )));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(ControllerError::InvalidAmount(format!(
            "not a decimal number: {}",
            input
        )));
    }

    let whole_part: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| ControllerError::InvalidAmount(format!("amount too large: {}", input)))?
    };

    // Right-pad the fractional digits to the full scale.
    let mut frac_part: u128 = 0;
    if !frac.is_empty() {
        frac_part = frac
            .parse()
            .map_err(|_| ControllerError::InvalidAmount(format!("amount too large: {}", input)))?;
        for _ in 0..(TOKEN_DECIMALS as usize - frac.len()) {
            frac_part *= 10;
        }
    }

    whole_part
        .checked_mul(TOKEN_SCALE)
        .and_then(|scaled| scaled.checked_add(frac_part))
        .ok_or_else(|| ControllerError::InvalidAmount(format!("amount too large: {}", input)))
}

/// Format a scaled integer amount back into a decimal string, trimming
/// trailing fractional zeros ("200.500000" -> "200.5", "200000000" -> "200").
pub fn format_token_amount(amount: u128) -> String {
    let whole = amount / TOKEN_SCALE;
    let frac = amount % TOKEN_SCALE;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:06}", frac);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{}.{}", whole, trimmed)
}

/// Case-insensitive address comparison. Wallet providers are inconsistent
/// about checksum casing, so identity checks must not be byte-exact.
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
