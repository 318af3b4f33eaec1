//! Resource limit strings: memory sizes and CPU counts.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::model::Scalar;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("cpus: failed to parse {0} as a rational number")]
    InvalidCpus(String),

    #[error("cpus: value is too precise: {0}")]
    TooPrecise(String),
}

pub type ResourceResult<T> = Result<T, ResourceError>;

static RAM_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?) ?([kKmMgGtTpP])?[iI]?[bB]?$").expect("valid size regex")
});

const NANOS: i128 = 1_000_000_000;

/// Parse a memory size with binary multiples: `512m`, `1.5GiB`, `2g`, `1024`.
pub fn ram_in_bytes(value: &Scalar) -> ResourceResult<i64> {
    let text = match value {
        Scalar::Int(bytes) if *bytes >= 0 => return Ok(*bytes),
        Scalar::Text(text) => text.trim(),
        other => return Err(ResourceError::InvalidSize(other.to_string())),
    };

    let caps = RAM_SIZE
        .captures(text)
        .ok_or_else(|| ResourceError::InvalidSize(text.to_string()))?;
    let amount: f64 = caps[1]
        .parse()
        .map_err(|_| ResourceError::InvalidSize(text.to_string()))?;
    let multiplier: f64 = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.as_str() {
            "k" => 1024.0,
            "m" => 1024.0_f64.powi(2),
            "g" => 1024.0_f64.powi(3),
            "t" => 1024.0_f64.powi(4),
            _ => 1024.0_f64.powi(5),
        },
    };

    let bytes = amount * multiplier;
    if !bytes.is_finite() || bytes > i64::MAX as f64 {
        return Err(ResourceError::InvalidSize(text.to_string()));
    }
    Ok(bytes as i64)
}

/// Parse a CPU count as an exact rational and scale it to nano CPUs.
///
/// `"1.5"` gives 1500000000; `"1/3"` has no exact nano CPU value and fails.
pub fn nano_cpus(value: &Scalar) -> ResourceResult<i64> {
    let text = value.to_string();
    let (num, den) = parse_rational(text.trim())
        .ok_or_else(|| ResourceError::InvalidCpus(text.clone()))?;

    let scaled = num
        .checked_mul(NANOS)
        .ok_or_else(|| ResourceError::InvalidCpus(text.clone()))?;
    if scaled % den != 0 {
        return Err(ResourceError::TooPrecise(text));
    }
    i64::try_from(scaled / den).map_err(|_| ResourceError::InvalidCpus(text))
}

/// `a/b`, or a decimal with an optional exponent, as numerator and positive denominator.
fn parse_rational(text: &str) -> Option<(i128, i128)> {
    if let Some((num, den)) = text.split_once('/') {
        let num: i128 = num.trim().parse().ok()?;
        let den: i128 = den.trim().parse().ok()?;
        if den == 0 {
            return None;
        }
        return Some(if den < 0 { (-num, -den) } else { (num, den) });
    }

    let (mantissa, exponent) = match text.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{int_part}{frac_part}");
    let mut num: i128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
    let scale = exponent - frac_part.len() as i32;
    let mut den: i128 = 1;
    if scale >= 0 {
        num = num.checked_mul(10_i128.checked_pow(scale as u32)?)?;
    } else {
        den = 10_i128.checked_pow(scale.unsigned_abs())?;
    }
    Some((if negative { -num } else { num }, den))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Scalar {
        Scalar::Text(value.to_string())
    }

    #[test]
    fn test_ram_units() {
        assert_eq!(ram_in_bytes(&text("1024")), Ok(1024));
        assert_eq!(ram_in_bytes(&text("512m")), Ok(512 * 1024 * 1024));
        assert_eq!(ram_in_bytes(&text("2G")), Ok(2 * 1024 * 1024 * 1024));
        assert_eq!(ram_in_bytes(&text("1.5gb")), Ok(1536 * 1024 * 1024));
        assert_eq!(ram_in_bytes(&text("64KiB")), Ok(64 * 1024));
        assert_eq!(ram_in_bytes(&Scalar::Int(4096)), Ok(4096));
        assert!(ram_in_bytes(&text("lots")).is_err());
        assert!(ram_in_bytes(&text("12x")).is_err());
    }

    #[test]
    fn test_cpus_exact() {
        assert_eq!(nano_cpus(&text("1.5")), Ok(1_500_000_000));
        assert_eq!(nano_cpus(&text("2")), Ok(2_000_000_000));
        assert_eq!(nano_cpus(&Scalar::Float(0.5)), Ok(500_000_000));
        assert_eq!(nano_cpus(&Scalar::Int(3)), Ok(3_000_000_000));
        assert_eq!(nano_cpus(&text("1/4")), Ok(250_000_000));
        assert_eq!(nano_cpus(&text("25e-2")), Ok(250_000_000));
    }

    #[test]
    fn test_cpus_too_precise() {
        assert!(matches!(
            nano_cpus(&text("1/3")),
            Err(ResourceError::TooPrecise(_))
        ));
        assert!(matches!(
            nano_cpus(&text("0.0000000001")),
            Err(ResourceError::TooPrecise(_))
        ));
        assert!(matches!(
            nano_cpus(&text("two")),
            Err(ResourceError::InvalidCpus(_))
        ));
        assert!(matches!(
            nano_cpus(&text("1/0")),
            Err(ResourceError::InvalidCpus(_))
        ));
    }
}
