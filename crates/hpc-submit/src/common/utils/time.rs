use std::time::Duration;

/// Format a duration as a PBS/Slurm time string, e.g. 01:05:02
pub fn format_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Normalizes a walltime to the `HH:MM:SS` form.
///
/// Accepts either an already formatted `H+:MM:SS` string or a humantime duration such as `90m`.
pub fn normalize_walltime(value: &str) -> Option<String> {
    let value = value.trim();
    if is_hms(value) {
        return Some(value.to_string());
    }
    humantime::parse_duration(value)
        .ok()
        .map(|duration| format_duration(&duration))
}

fn is_hms(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    match parts[..] {
        [hours, minutes, seconds] => {
            let digits = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
            let below_sixty = |s: &str| s.len() == 2 && digits(s) && s < "60";
            digits(hours) && below_sixty(minutes) && below_sixty(seconds)
        }
        _ => false,
    }
}
