//! Display formatting for computed values.

/// Format a value for display with up to `precision` significant decimals.
///
/// Integral values print without a fractional part, very large or small
/// magnitudes switch to scientific notation and missing values print empty.
pub fn format_number(n: f64, precision: usize) -> String {
    if n.is_nan() {
        String::new()
    } else if n.is_infinite() {
        if n > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if n.fract() == 0.0 && n.abs() < 1e10 {
        format!("{:.0}", n)
    } else if n != 0.0 && (n.abs() >= 1e10 || n.abs() < 1e-4) {
        format!("{:.*e}", precision, n)
    } else {
        let s = format!("{:.*}", precision, n);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        s.to_string()
    }
}
