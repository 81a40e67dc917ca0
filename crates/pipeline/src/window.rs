//! 시간 기반 슬라이딩 윈도우
//!
//! [`SlidingWindow`]는 `(timestamp, bytes)` 엔트리를 시간순으로 보관하고,
//! 기준 시각 `T`에서 `[T - horizon, T]` 범위 밖의 엔트리를 잘라냅니다.
//! 통계 엔진의 속도 계산과 대량 송신 탐지가 함께 사용합니다.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// 윈도우 기반 속도
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowRates {
    pub packets_per_second: f64,
    pub bytes_per_second: f64,
}

/// 시간순 `(timestamp, bytes)` 윈도우
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    horizon: Duration,
    entries: VecDeque<(Instant, u64)>,
    /// 현재 엔트리들의 바이트 합 (prune/record 시 갱신)
    byte_sum: u64,
}

impl SlidingWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            entries: VecDeque::new(),
            byte_sum: 0,
        }
    }

    /// 엔트리를 추가합니다.
    ///
    /// 시간순 추가를 가정합니다. 이전 엔트리보다 이른 시각이 들어오면
    /// 순서를 유지하기 위해 마지막 엔트리 시각으로 맞춥니다.
    pub fn record(&mut self, at: Instant, bytes: u64) {
        let at = match self.entries.back() {
            Some((last, _)) if at < *last => *last,
            _ => at,
        };
        self.entries.push_back((at, bytes));
        self.byte_sum = self.byte_sum.saturating_add(bytes);
    }

    /// `now - timestamp > horizon`인 엔트리를 제거합니다.
    pub fn prune(&mut self, now: Instant) {
        while let Some((at, bytes)) = self.entries.front().copied() {
            if now.saturating_duration_since(at) > self.horizon {
                self.entries.pop_front();
                self.byte_sum = self.byte_sum.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }

    /// 남은 엔트리 수
    pub fn packet_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// 남은 엔트리 바이트 합
    pub fn byte_count(&self) -> u64 {
        self.byte_sum
    }

    /// 잘라낸 뒤 윈도우 길이로 나눈 속도를 반환합니다. 빈 윈도우는 0입니다.
    pub fn rates(&mut self, now: Instant) -> WindowRates {
        self.prune(now);
        let secs = self.horizon.as_secs_f64();
        if self.entries.is_empty() || secs <= 0.0 {
            return WindowRates::default();
        }
        WindowRates {
            packets_per_second: self.entries.len() as f64 / secs,
            bytes_per_second: self.byte_sum as f64 / secs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.byte_sum = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE: Duration = Duration::from_secs(5);

    #[test]
    fn empty_window_has_zero_rates() {
        let mut window = SlidingWindow::new(FIVE);
        let rates = window.rates(Instant::now());
        assert_eq!(rates, WindowRates::default());
        assert!(!rates.packets_per_second.is_nan());
    }

    #[test]
    fn rates_divide_by_horizon() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(FIVE);
        window.record(start, 100);
        window.record(start + Duration::from_millis(500), 400);
        let rates = window.rates(start + Duration::from_secs(1));
        assert!((rates.packets_per_second - 0.4).abs() < 1e-9);
        assert!((rates.bytes_per_second - 100.0).abs() < 1e-9);
    }

    #[test]
    fn entry_exactly_at_horizon_is_kept() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(FIVE);
        window.record(start, 10);
        window.prune(start + FIVE);
        assert_eq!(window.byte_count(), 10);
        window.prune(start + FIVE + Duration::from_millis(1));
        assert!(window.is_empty());
        assert_eq!(window.byte_count(), 0);
    }

    #[test]
    fn prune_keeps_only_recent_entries() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(FIVE);
        for i in 0..10u64 {
            window.record(start + Duration::from_secs(i), 1);
        }
        window.prune(start + Duration::from_secs(9));
        // [4s, 9s] 범위: 4,5,6,7,8,9
        assert_eq!(window.packet_count(), 6);
    }

    #[test]
    fn out_of_order_record_keeps_time_order() {
        let start = Instant::now();
        let mut window = SlidingWindow::new(FIVE);
        window.record(start + Duration::from_secs(2), 1);
        window.record(start, 1);
        window.prune(start + Duration::from_secs(7));
        assert_eq!(window.packet_count(), 2);
    }

    #[test]
    fn clear_resets_sum() {
        let mut window = SlidingWindow::new(FIVE);
        window.record(Instant::now(), 99);
        window.clear();
        assert_eq!(window.byte_count(), 0);
        assert!(window.is_empty());
    }

    // Property-based tests using proptest
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn byte_count_matches_entries_in_horizon(
                offsets in prop::collection::vec((0u64..20_000, 1u64..10_000), 1..200),
                tick_ms in 0u64..25_000,
            ) {
                let start = Instant::now();
                let mut sorted = offsets.clone();
                sorted.sort_by_key(|(ms, _)| *ms);

                let mut window = SlidingWindow::new(FIVE);
                for (ms, bytes) in &sorted {
                    window.record(start + Duration::from_millis(*ms), *bytes);
                }
                let tick = start + Duration::from_millis(tick_ms);
                window.prune(tick);

                // tick 이후 엔트리는 윈도우에 남아 있음
                let expected: u64 = sorted
                    .iter()
                    .filter(|(ms, _)| tick_ms.saturating_sub(*ms) <= 5_000)
                    .map(|(_, bytes)| bytes)
                    .sum();
                prop_assert_eq!(window.byte_count(), expected);
            }
        }
    }
}
