// Copyright (c) The drover Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Formats a duration the way the totals line wants it: fractional seconds
/// under a minute, `XmYs` above.
pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let minutes = (secs / 60.0).floor() as u64;
        let rest = secs - (minutes as f64) * 60.0;
        format!("{minutes}m {rest:.0}s")
    }
}
