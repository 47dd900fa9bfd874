//! Frequency value parsing and formatting.
//!
//! Frequencies in plan files may be written as plain numbers in Hz or as
//! strings with an SI prefix, e.g. `"2.4 GHz"`, `"900M"`, `"10 kHz"`, `"1e9"`.
//! Supported prefixes are `G` (1e9), `M` (1e6) and `k` (1e3), with an optional
//! `Hz` unit (case-insensitive `h`). Whitespace between number and prefix is optional.

use crate::error::PlanError;

/// Parse a frequency string into Hz.
///
/// # Examples
///
/// ```
/// use chamber_daq::units::parse_frequency;
///
/// assert_eq!(parse_frequency("2.4 GHz").unwrap(), 2.4e9);
/// assert_eq!(parse_frequency("900M").unwrap(), 900e6);
/// assert_eq!(parse_frequency("1e9").unwrap(), 1e9);
/// ```
pub fn parse_frequency(input: &str) -> Result<f64, PlanError> {
    let trimmed = input.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return Ok(value);
    }

    let err = || PlanError::FrequencyParse(input.to_string());

    let without_unit = trimmed
        .strip_suffix("Hz")
        .or_else(|| trimmed.strip_suffix("hz"))
        .or_else(|| trimmed.strip_suffix("HZ"))
        .unwrap_or(trimmed)
        .trim_end();

    let (number, multiplier) = match without_unit.chars().last() {
        Some('G') => (&without_unit[..without_unit.len() - 1], 1e9),
        Some('M') => (&without_unit[..without_unit.len() - 1], 1e6),
        Some('k') => (&without_unit[..without_unit.len() - 1], 1e3),
        Some(_) => (without_unit, 1.0),
        None => return Err(err()),
    };

    let value: f64 = number.trim().parse().map_err(|_| err())?;
    Ok(value * multiplier)
}

/// Format a frequency in Hz with the largest fitting SI prefix.
pub fn format_frequency(hz: f64) -> String {
    let abs = hz.abs();
    if abs >= 1e9 {
        format!("{} GHz", trim_float(hz / 1e9))
    } else if abs >= 1e6 {
        format!("{} MHz", trim_float(hz / 1e6))
    } else if abs >= 1e3 {
        format!("{} kHz", trim_float(hz / 1e3))
    } else {
        format!("{} Hz", trim_float(hz))
    }
}

fn trim_float(value: f64) -> String {
    let text = format!("{:.6}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_numbers() {
        assert_eq!(parse_frequency("1000000000").unwrap(), 1e9);
        assert_eq!(parse_frequency(" 2.5e9 ").unwrap(), 2.5e9);
    }

    #[test]
    fn parses_si_prefixes() {
        assert_eq!(parse_frequency("1.5GHz").unwrap(), 1.5e9);
        assert_eq!(parse_frequency("1.5 GHz").unwrap(), 1.5e9);
        assert_eq!(parse_frequency("900 MHz").unwrap(), 900e6);
        assert_eq!(parse_frequency("900M").unwrap(), 900e6);
        assert_eq!(parse_frequency("10 kHz").unwrap(), 10e3);
        assert_eq!(parse_frequency("10k").unwrap(), 10e3);
        assert_eq!(parse_frequency("50 Hz").unwrap(), 50.0);
        assert_eq!(parse_frequency("3 Ghz").unwrap(), 3e9);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_frequency("fast"),
            Err(PlanError::FrequencyParse(s)) if s == "fast"
        ));
        assert!(parse_frequency("").is_err());
        assert!(parse_frequency("GHz").is_err());
        assert!(parse_frequency("2 THz").is_err());
    }

    #[test]
    fn formats_with_prefix() {
        assert_eq!(format_frequency(2.4e9), "2.4 GHz");
        assert_eq!(format_frequency(915e6), "915 MHz");
        assert_eq!(format_frequency(10e3), "10 kHz");
        assert_eq!(format_frequency(50.0), "50 Hz");
    }
}
