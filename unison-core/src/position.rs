use crate::events::PlaybackState;

/// Extrapolate a peer's current position from its last report. While the
/// peer was playing, the position advances with reference time at its
/// playback rate; otherwise the reported position stands.
pub fn project(
    position: f64,
    playback_rate: f64,
    playback_state: PlaybackState,
    at_ms: u64,
    now_ms: u64,
) -> f64 {
    let projected = if playback_state.is_playing() {
        let elapsed_s = now_ms.saturating_sub(at_ms) as f64 / 1000.0;
        position + elapsed_s * playback_rate
    } else {
        position
    };
    projected.max(0.0)
}

/// Median of a sample set. Even-sized sets average the two middle values.
pub fn median(mut samples: Vec<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Some(samples[mid])
    } else {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    }
}

pub fn drift_exceeded(local: f64, target: f64, max_drift: f64) -> bool {
    (local - target).abs() > max_drift
}
