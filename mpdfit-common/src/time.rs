//! Time formatting helpers
//!
//! MPD accepts at most three decimal places for positions, so every value
//! that goes on the wire passes through [`format_seconds`]. Reports use
//! [`format_hms`].

/// Render seconds with exactly three decimal places
///
/// Rounds to the nearest millisecond first so that values such as `12.3456`
/// become `12.346`. Negative zero is rendered as `0.000`.
///
/// # Examples
///
/// ```
/// use mpdfit_common::time::format_seconds;
///
/// assert_eq!(format_seconds(12.3456), "12.346");
/// assert_eq!(format_seconds(3.0), "3.000");
/// assert_eq!(format_seconds(-0.0001), "0.000");
/// ```
pub fn format_seconds(seconds: f64) -> String {
    let rounded = (seconds * 1000.0).round() / 1000.0;
    // Avoid "-0.000"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.3}", rounded)
}

/// Format whole seconds as `H:MM:SS`
///
/// Negative values are an error condition and are prefixed with `-`.
///
/// # Examples
///
/// ```
/// use mpdfit_common::time::format_hms;
///
/// assert_eq!(format_hms(3661), "1:01:01");
/// assert_eq!(format_hms(59), "0:00:59");
/// ```
pub fn format_hms(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let abs_seconds = seconds.abs();
    let hours = abs_seconds / 3600;
    let mins = (abs_seconds % 3600) / 60;
    let secs = abs_seconds % 60;
    format!("{}{}:{:02}:{:02}", sign, hours, mins, secs)
}

/// Convert a whole number of minutes from the command line to seconds
pub fn minutes_to_seconds(minutes: i64) -> i64 {
    minutes.saturating_mul(60)
}
