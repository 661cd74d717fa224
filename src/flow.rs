// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Adaptive receive-window sizing for one channel. The controller
//! watches inbound throughput and window exhaustion, estimates the
//! bandwidth-delay product, and sizes `CHANNEL_WINDOW_ADJUST` messages
//! with a slow-start / congestion-avoidance scheme so the advertised
//! window tracks roughly twice the BDP.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MEASUREMENT_INTERVAL: Duration = Duration::from_secs(2);
const METRIC_RING: usize = 10;
const EXHAUSTION_RING: usize = 10;
const EWMA_ALPHA: f64 = 0.2;
const LINEAR_GROWTH_FLOOR: u32 = 1024;

pub struct WindowController {
    /// The last advertised window target.
    target: u32,
    /// Credit left; goes momentarily negative when the peer overruns.
    current: i64,
    /// Once `current` falls to this, an adjustment goes out.
    threshold: u32,
    min: u32,
    max: u32,
    in_slow_start: bool,
    ssthresh: u32,
    rtt_est: f64,
    bw_est: f64,
    bytes_since_measure: u64,
    last_measure: Instant,
    throughput: VecDeque<f64>,
    exhaustions: VecDeque<Instant>,
    last_adjust: Option<Instant>,
    awaiting_first_data: bool,
}

impl std::fmt::Debug for WindowController {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("WindowController")
            .field("target", &self.target)
            .field("current", &self.current)
            .field("in_slow_start", &self.in_slow_start)
            .finish()
    }
}

impl WindowController {
    pub fn new(initial_window: u32) -> WindowController {
        let min = (initial_window / 16).max(4096);
        let max = initial_window.saturating_mul(4);
        WindowController {
            target: initial_window,
            current: initial_window as i64,
            threshold: initial_window / 2,
            min,
            max,
            in_slow_start: true,
            ssthresh: max,
            rtt_est: 0.0,
            bw_est: 0.0,
            bytes_since_measure: 0,
            last_measure: Instant::now(),
            throughput: VecDeque::with_capacity(METRIC_RING),
            exhaustions: VecDeque::with_capacity(EXHAUSTION_RING),
            last_adjust: None,
            awaiting_first_data: true,
        }
    }

    /// Remaining credit the peer believes it has.
    pub fn window(&self) -> i64 {
        self.current
    }

    /// Account for `len` inbound bytes. Returns the size of the window
    /// adjustment to advertise, if one is due.
    pub fn data_received(&mut self, len: u32, now: Instant) -> Option<u32> {
        self.current -= len as i64;
        self.bytes_since_measure += len as u64;

        if self.current <= 0 {
            if self.exhaustions.len() == EXHAUSTION_RING {
                self.exhaustions.pop_front();
            }
            self.exhaustions.push_back(now);
        }

        if self.awaiting_first_data {
            if let Some(adjusted_at) = self.last_adjust {
                let sample = now.duration_since(adjusted_at).as_secs_f64();
                self.rtt_est = if self.rtt_est == 0.0 {
                    sample
                } else {
                    EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * self.rtt_est
                };
            }
            self.awaiting_first_data = false;
        }

        let elapsed = now.duration_since(self.last_measure);
        if elapsed >= MEASUREMENT_INTERVAL {
            let throughput = self.bytes_since_measure as f64 / elapsed.as_secs_f64();
            if self.throughput.len() == METRIC_RING {
                self.throughput.pop_front();
            }
            self.throughput.push_back(throughput);
            self.bw_est = if self.bw_est == 0.0 {
                throughput
            } else {
                EWMA_ALPHA * throughput + (1.0 - EWMA_ALPHA) * self.bw_est
            };
            self.bytes_since_measure = 0;
            self.last_measure = now;
        }

        if self.current <= self.threshold as i64 {
            let congested = self.detect_congestion(now);
            let target = self.next_target(congested);
            self.target = target;
            self.threshold = target / 2;
            let adjust = target as i64 - self.current;
            self.current += adjust;
            self.last_adjust = Some(now);
            self.awaiting_first_data = true;
            debug!("window adjust: target {:?}, adjust {:?}", target, adjust);
            Some(adjust as u32)
        } else {
            None
        }
    }

    fn detect_congestion(&self, now: Instant) -> bool {
        // Throughput decay: the recent half of the history dropped well
        // below the older half.
        if self.throughput.len() >= 4 {
            let k = self.throughput.len() / 2;
            let older: f64 = self.throughput.iter().take(self.throughput.len() - k).sum::<f64>()
                / (self.throughput.len() - k) as f64;
            let recent: f64 =
                self.throughput.iter().skip(self.throughput.len() - k).sum::<f64>() / k as f64;
            if older > 0.0 && recent / older < 0.7 {
                return true;
            }
        }
        // Accelerating exhaustion: the last three window exhaustions
        // arrive closer and closer together, the newest just now.
        if self.exhaustions.len() >= 3 {
            let n = self.exhaustions.len();
            let t1 = self.exhaustions[n - 3];
            let t2 = self.exhaustions[n - 2];
            let t3 = self.exhaustions[n - 1];
            if t3.duration_since(t2) < t2.duration_since(t1)
                && now.duration_since(t3) < Duration::from_secs(1)
            {
                return true;
            }
        }
        false
    }

    fn next_target(&mut self, congested: bool) -> u32 {
        if congested {
            // Congestion wins over any growth decision.
            self.ssthresh = (self.target / 2).max(self.min);
            self.in_slow_start = false;
            ((self.target as f64 * 0.75) as u32).max(self.min)
        } else if self.in_slow_start {
            let doubled = self.target.saturating_mul(2).min(self.max);
            if doubled >= self.ssthresh {
                self.in_slow_start = false;
            }
            doubled
        } else {
            let grown = self
                .target
                .saturating_add((self.target / 10).max(LINEAR_GROWTH_FLOOR));
            let mut capped = grown.min(self.max);
            let bdp = self.bw_est * self.rtt_est;
            if bdp > 0.0 {
                let bdp_cap = ((4.0 * bdp) as u32).max(self.min);
                capped = capped.min(bdp_cap);
            }
            capped.max(self.min)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_adjust_above_threshold() {
        let mut w = WindowController::new(1 << 20);
        let now = Instant::now();
        assert_eq!(w.data_received(1024, now), None);
        assert_eq!(w.window(), (1 << 20) - 1024);
    }

    #[test]
    fn slow_start_doubles_until_ssthresh() {
        let mut w = WindowController::new(1 << 16);
        w.ssthresh = 1 << 18;
        let now = Instant::now();
        // Drain past the threshold in one go.
        let adjust = w.data_received(1 << 16, now).expect("adjustment due");
        // New target is the doubled window; credit returns to exactly
        // the target.
        assert_eq!(w.target, 1 << 17);
        assert_eq!(w.window(), w.target as i64);
        assert_eq!(adjust as i64, w.target as i64 - 0);
        assert!(w.in_slow_start);

        let _ = w.data_received(1 << 17, now).expect("adjustment due");
        assert_eq!(w.target, 1 << 18);
        assert!(!w.in_slow_start);
    }

    #[test]
    fn accelerating_exhaustion_shrinks_window() {
        let mut w = WindowController::new(1 << 16);
        w.in_slow_start = false;
        let t0 = Instant::now();
        // Three exhaustions with shrinking gaps; the third one recent.
        w.exhaustions.push_back(t0);
        w.exhaustions.push_back(t0 + Duration::from_millis(900));
        w.exhaustions.push_back(t0 + Duration::from_millis(1400));
        let now = t0 + Duration::from_millis(1500);
        assert!(w.detect_congestion(now));
        let before = w.target;
        let _ = w.data_received(1 << 16, now).expect("adjustment due");
        assert!(w.target < before);
        assert!(w.target >= w.min);
        assert!(!w.in_slow_start);
    }

    #[test]
    fn accounting_identity_holds() {
        // consumed + window == advertised + initial, whatever happens.
        let initial = 1 << 16;
        let mut w = WindowController::new(initial);
        let mut consumed: i64 = 0;
        let mut advertised: i64 = 0;
        let mut now = Instant::now();
        for i in 0u32..1000 {
            let n = 1000 + (i % 7) * 313;
            consumed += n as i64;
            if let Some(a) = w.data_received(n, now) {
                advertised += a as i64;
            }
            now += Duration::from_millis(5);
            assert_eq!(consumed + w.window(), advertised + initial as i64);
        }
    }

    #[test]
    fn linear_growth_is_bounded() {
        let mut w = WindowController::new(1 << 16);
        w.in_slow_start = false;
        w.bw_est = 1000.0;
        w.rtt_est = 0.05;
        let now = Instant::now();
        let _ = w.data_received(1 << 16, now).expect("adjustment due");
        // 4 x BDP is only 200 bytes here, so the floor is `min`.
        assert_eq!(w.target, w.min);
    }
}
