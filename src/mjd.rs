pub const SECONDS_PER_DAY: f64 = 86400.0;

/// An epoch split the way PSRFITS stores it: integer MJD, integer second of the day,
/// and the fractional second.
#[derive(PartialEq, Copy, Clone, Debug)]
pub struct MjdParts {
    pub day: i64,
    /// In `0..86400`
    pub sec: i64,
    /// In `0.0..1.0`
    pub frac: f64,
}

impl MjdParts {
    pub fn new(day: i64, sec: i64, frac: f64) -> MjdParts {
        debug_assert!((0..86400).contains(&sec));
        debug_assert!((0.0..1.0).contains(&frac));
        MjdParts { day, sec, frac }
    }

    pub fn from_mjd(mjd: f64) -> MjdParts {
        let day = mjd.floor();
        let secs = (mjd - day) * SECONDS_PER_DAY;
        let sec = secs.floor();
        let (mut day, mut sec, frac) = (day as i64, sec as i64, secs - sec);
        // Rounding in the multiplication can land exactly on midnight
        if sec >= 86400 {
            day += 1;
            sec -= 86400;
        }
        MjdParts { day, sec, frac }
    }

    /// Could have some rounding error for epochs that are not exactly representable.
    pub fn to_mjd(self) -> f64 {
        self.day as f64 + (self.sec as f64 + self.frac) / SECONDS_PER_DAY
    }
}

/// Sampling interval as stored on disk, where every format keeps seconds.
pub fn interval_s(sampling_interval_ms: f64) -> f64 {
    sampling_interval_ms / 1e3
}

/// Inverse of [`interval_s`] for an interval read from disk.
///
/// `seconds * 1e3` can land an ulp or two away from the value that was written. The
/// neighbours that store back to exactly `seconds` are candidates, and the one with the
/// shortest decimal form wins, so typed values such as 0.98304 ms come back unchanged.
pub fn interval_ms(seconds: f64) -> f64 {
    let ms = seconds * 1e3;
    if !(ms.is_finite() && ms > 0.0) {
        return ms;
    }
    let bits = ms.to_bits();
    [
        bits,
        bits.saturating_sub(1),
        bits + 1,
        bits.saturating_sub(2),
        bits + 2,
    ]
    .into_iter()
    .map(f64::from_bits)
    .filter(|&candidate| interval_s(candidate) == seconds)
    .min_by_key(|candidate| candidate.to_string().len())
    .unwrap_or(ms)
}

/// MJD of the sample `samples` intervals after `start_mjd`.
pub fn offset_mjd(start_mjd: f64, samples: u64, sampling_interval_ms: f64) -> f64 {
    start_mjd + samples as f64 * (interval_s(sampling_interval_ms) / SECONDS_PER_DAY)
}
