use std::time::Duration;

pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// Population standard deviation
pub fn std_dev(data: &[f64]) -> Option<f64> {
    match (mean(data), data.len()) {
        (Some(data_mean), count) if count > 0 => {
            let variance = data
                .iter()
                .map(|value| {
                    let diff = data_mean - *value;

                    diff * diff
                })
                .sum::<f64>()
                / count as f64;

            Some(variance.sqrt())
        }
        _ => None,
    }
}

/// `MM:SS:hh` for a completion time
pub fn format_time(d: Duration) -> String {
    let ms = d.as_millis();
    format!(
        "{:02}:{:02}:{:02}",
        ms / 60_000,
        (ms % 60_000) / 1000,
        (ms % 1000) / 10
    )
}

/// `00:SS:hh` countdown for the time still left
pub fn format_countdown(remaining: Duration) -> String {
    let ms = remaining.as_millis();
    format!("00:{:02}:{:02}", ms / 1000, (ms % 1000) / 10)
}

/// Seconds rounded to three decimals, as reported to analytics
pub fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}
