//! Share difficulty as miners report it.
//!
//! Firmware reports best difficulty either as a plain number or as a
//! string with an SI suffix ("4.29G"). Both end up as an `f64` here.

const SUFFIXES: [(char, f64); 5] = [
    ('k', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
];

/// Parse a difficulty string, with or without an SI suffix.
///
/// The suffix match is case-insensitive except for `m`, which some
/// firmware uses for mega. Returns `None` for anything non-numeric,
/// negative, or non-finite.
pub fn parse_difficulty(s: &str) -> Option<f64> {
    let s = s.trim();
    let last = s.chars().last()?;

    let (number, scale) = match SUFFIXES
        .iter()
        .find(|(suffix, _)| suffix.eq_ignore_ascii_case(&last))
    {
        Some((_, scale)) => (&s[..s.len() - last.len_utf8()], *scale),
        None => (s, 1.0),
    };

    let value = number.trim().parse::<f64>().ok()? * scale;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Abbreviate a difficulty for display ("1.23G").
pub fn format_difficulty(value: f64) -> String {
    for (suffix, scale) in SUFFIXES.iter().rev() {
        if value >= *scale {
            return format!("{:.2}{}", value / scale, suffix.to_ascii_uppercase());
        }
    }
    format!("{value:.0}")
}
