//! Adaptive interrupt moderation.
//!
//! The delay is derived from the average frame size seen since the last
//! interrupt: big frames mean bulk traffic and tolerate a longer delay,
//! small frames mean latency-sensitive traffic. The result is applied on
//! the *next* interrupt, so the setting always trails traffic by one
//! interval.
//!
//! ```text
//! rate  = max(tx_bytes / tx_packets, rx_bytes / rx_packets) + overhead
//! rate  = min(rate, upper_bound)
//! delay = rate / 3   if mid_band.0 < rate < mid_band.1
//!         rate / 2   otherwise
//! delay = clamp(delay, min_delay, max_delay)
//! ```

use crate::config::ModerationConfig;
use crate::stats::TrafficSample;

fn average(bytes: u64, packets: u64) -> u64 {
    if bytes == 0 || packets == 0 {
        0
    } else {
        bytes / packets
    }
}

/// New delay for `sample`, or `None` when there was no traffic and the
/// current delay should stay.
pub fn compute_delay(sample: &TrafficSample, config: &ModerationConfig) -> Option<u32> {
    if sample.is_idle() {
        return None;
    }

    let per_frame = average(sample.tx_bytes, sample.tx_packets).max(average(sample.rx_bytes, sample.rx_packets));
    let rate = per_frame
        .saturating_add(config.frame_overhead as u64)
        .min(config.upper_bound as u64) as u32;

    let (low, high) = config.mid_band;
    let delay = if rate > low && rate < high { rate / 3 } else { rate / 2 };
    Some(delay.clamp(config.min_delay, config.max_delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tx: (u64, u64), rx: (u64, u64)) -> TrafficSample {
        TrafficSample {
            tx_bytes: tx.0,
            tx_packets: tx.1,
            rx_bytes: rx.0,
            rx_packets: rx.1,
        }
    }

    fn unclamped() -> ModerationConfig {
        ModerationConfig {
            min_delay: 0,
            max_delay: u32::MAX,
            ..ModerationConfig::new()
        }
    }

    #[test]
    fn test_idle_keeps_delay() {
        assert_eq!(compute_delay(&TrafficSample::default(), &ModerationConfig::new()), None);
    }

    #[test]
    fn test_bulk_traffic_halves() {
        // 1500 + 24 = 1524, outside the mid band.
        let d = compute_delay(&sample((15000, 10), (0, 0)), &unclamped());
        assert_eq!(d, Some(762));
    }

    #[test]
    fn test_mid_band_divides_by_three() {
        // 576 + 24 = 600.
        let d = compute_delay(&sample((0, 0), (5760, 10)), &unclamped());
        assert_eq!(d, Some(200));
    }

    #[test]
    fn test_band_edges_are_exclusive() {
        // Exactly 300 and exactly 1200 both halve.
        assert_eq!(compute_delay(&sample((276, 1), (0, 0)), &unclamped()), Some(150));
        assert_eq!(compute_delay(&sample((1176, 1), (0, 0)), &unclamped()), Some(600));
    }

    #[test]
    fn test_larger_direction_wins() {
        let d = compute_delay(&sample((640, 10), (15000, 10)), &unclamped());
        assert_eq!(d, Some(762));
    }

    #[test]
    fn test_upper_bound_caps_jumbo() {
        let d = compute_delay(&sample((90000, 10), (0, 0)), &unclamped());
        assert_eq!(d, Some(1500));
    }

    #[test]
    fn test_result_always_clamped() {
        let cfg = ModerationConfig::new();
        let inputs = [
            sample((1, 1), (0, 0)),
            sample((64, 1), (64, 1)),
            sample((u64::MAX, 1), (0, 0)),
            sample((1000, 0), (0, 0)),
            sample((0, 0), (7000, 5)),
            sample((9000, 1), (9000, 1)),
        ];
        for s in &inputs {
            let d = compute_delay(s, &cfg).unwrap();
            assert!(d >= cfg.min_delay && d <= cfg.max_delay, "{:?} -> {}", s, d);
        }
    }
}
