/// Round to `places` decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// `numerator / denominator`, or `None` when the denominator is zero
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    match denominator {
        d if d == 0.0 => None,
        d => Some(numerator / d),
    }
}
