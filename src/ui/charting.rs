use crate::kde;

/// X bounds (seconds) and Y peak (density) shared by all density curves
pub fn density_bounds<'a, I>(curves: I) -> ([f64; 2], f64)
where
    I: IntoIterator<Item = &'a [(f64, f64)]>,
{
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut peak: f64 = 0.0;
    for curve in curves {
        for &(x, _) in curve {
            min = min.min(x);
            max = max.max(x);
        }
        peak = peak.max(kde::peak(curve));
    }

    if !min.is_finite() {
        return ([0.0, 1.0], 1.0);
    }
    if max - min < 1.0 {
        max = min + 1.0;
    }
    if peak <= 0.0 {
        peak = 1.0;
    }
    ([min, max], peak)
}

/// Bar length in cells for `value` out of `max`, at least one cell for non-zero values
pub fn bar_len(value: u64, max: u64, width: u16) -> u16 {
    if value == 0 || max == 0 {
        return 0;
    }
    let scaled = (value as f64 / max as f64 * width as f64).round() as u16;
    scaled.clamp(1, width)
}

/// Format a simple numeric label consistently
pub fn format_label(val: f64) -> String {
    if (val - val.round()).abs() < f64::EPSILON {
        format!("{}", val.round())
    } else {
        format!("{val:.2}")
    }
}
