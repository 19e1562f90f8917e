// Copyright 2026 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Outlier-rejecting spatial fusion engine (spec §4.8).
//!
//! Runs once per fusion task period (200 ms). Takes up to `MODULE_COUNT`
//! per-module fixes, finds a robust coordinate-wise median centre, rejects
//! modules whose residual from that centre exceeds an HDOP-scaled
//! threshold, maintains a per-module fault score with asymmetric
//! accrual/decay, and produces an HDOP-weighted mean of the survivors.
//!
//! This is the only place in the node that uses floating point, and only
//! for up to eight residual calculations per cycle (spec §9).

use crate::config::{
    ModuleIndex, FAULT_BANISH_THRESHOLD, FAULT_SCORE_MAX, FRESHNESS_WINDOW_MS, MODULE_COUNT,
};
use crate::state::ModuleState;

const METRES_PER_DEGREE: f64 = 111_320.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FusionStatus {
    NoFix,
    Ok,
    Degraded,
    Interference,
}

/// Latest fused estimate, published atomically to `latest` by the fusion
/// task and read under a short critical section by any other context.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FusionResult {
    pub has_fix: bool,
    pub status: FusionStatus,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_cm: i32,
    pub used_modules: u8,
    pub rejected_modules: u8,
    pub max_residual_cm: u16,
    pub avg_hdop_centi: u16,
    pub last_update_tick: u32,
}

impl FusionResult {
    pub const fn no_fix(now_ms: u32) -> Self {
        FusionResult {
            has_fix: false,
            status: FusionStatus::NoFix,
            lat_e7: 0,
            lon_e7: 0,
            alt_cm: 0,
            used_modules: 0,
            rejected_modules: 0,
            max_residual_cm: 0,
            avg_hdop_centi: 0,
            last_update_tick: now_ms,
        }
    }
}

struct Candidate {
    index: usize,
    lat_e7: i64,
    lon_e7: i64,
    alt_cm: i64,
    hdop_centi: u32,
}

/// Per-module fault score bookkeeping plus the fusion algorithm itself.
///
/// `fault_score` is written and read only by the fusion task; nothing else
/// ever touches it (spec §5).
pub struct Fusion {
    fault_score: [u16; MODULE_COUNT],
}

impl Fusion {
    pub const fn new() -> Self {
        Fusion { fault_score: [0; MODULE_COUNT] }
    }

    pub fn fault_score(&self, index: ModuleIndex) -> u16 {
        self.fault_score[index.zero_based()]
    }

    /// Run one fusion cycle over the current module snapshots.
    pub fn run(&mut self, modules: &[ModuleState; MODULE_COUNT], now_ms: u32) -> FusionResult {
        let mut candidates: heapless::Vec<Candidate, MODULE_COUNT> = heapless::Vec::new();
        let mut banished = [false; MODULE_COUNT];

        for i in 0..MODULE_COUNT {
            banished[i] = self.fault_score[i] >= FAULT_BANISH_THRESHOLD;
        }

        for (i, m) in modules.iter().enumerate() {
            if banished[i] {
                continue;
            }
            let fresh = now_ms.wrapping_sub(m.last_fix_tick) <= FRESHNESS_WINDOW_MS;
            if m.has_fix && m.fix_quality > 0 && m.hdop_centi > 0 && fresh {
                let _ = candidates.push(Candidate {
                    index: i,
                    lat_e7: m.lat_e7 as i64,
                    lon_e7: m.lon_e7 as i64,
                    alt_cm: m.alt_cm as i64,
                    hdop_centi: m.hdop_centi as u32,
                });
            }
        }

        if candidates.is_empty() {
            self.decay_or_accrue(&banished);
            return FusionResult::no_fix(now_ms);
        }

        let (median_lat_e7, median_lon_e7) = median_centre(&candidates);
        let median_lat_rad = (median_lat_e7 as f64 / 1e7) * core::f64::consts::PI / 180.0;

        struct Scored {
            index: usize,
            lat_e7: i64,
            lon_e7: i64,
            alt_cm: i64,
            hdop_centi: u32,
            residual_m: f64,
            threshold_m: f64,
            rejected: bool,
        }

        let mut scored: heapless::Vec<Scored, MODULE_COUNT> = heapless::Vec::new();
        for c in &candidates {
            let dlat_deg = (c.lat_e7 - median_lat_e7) as f64 / 1e7;
            let dlon_deg = (c.lon_e7 - median_lon_e7) as f64 / 1e7;
            let dy = dlat_deg * METRES_PER_DEGREE;
            let dx = dlon_deg * METRES_PER_DEGREE * libm::cos(median_lat_rad);
            let residual_m = libm::sqrt(dx * dx + dy * dy);

            let hdop = (c.hdop_centi as f64 / 100.0).clamp(0.5, 50.0);
            let threshold_m = (20.0 + 15.0 * hdop).clamp(25.0, 150.0);
            let rejected = residual_m > threshold_m;

            let _ = scored.push(Scored {
                index: c.index,
                lat_e7: c.lat_e7,
                lon_e7: c.lon_e7,
                alt_cm: c.alt_cm,
                hdop_centi: c.hdop_centi,
                residual_m,
                threshold_m,
                rejected,
            });
        }

        // Fault-score update. The rejected-cycle increment (+3) and the
        // used-but-over-threshold increment (+2) are mutually exclusive by
        // construction: a candidate that is rejected never enters the used
        // accounting below, so the `residual_m > threshold_m` arm in the
        // used branch is unreachable in normal flow (spec §9). It is kept
        // so the accrual policy reads the same as the spec's table.
        let mut candidate_set = [false; MODULE_COUNT];
        for s in &scored {
            candidate_set[s.index] = true;
        }
        for i in 0..MODULE_COUNT {
            if banished[i] {
                // Decay only: banished modules are excluded from the
                // candidate filter entirely, so the only path back to
                // rehabilitation is an unconditional per-cycle decay
                // (spec §9 open question, resolved in DESIGN.md).
                self.fault_score[i] = self.fault_score[i].saturating_sub(1);
            } else if !candidate_set[i] {
                self.fault_score[i] = (self.fault_score[i] + 1).min(FAULT_SCORE_MAX);
            }
        }
        for s in &scored {
            let score = &mut self.fault_score[s.index];
            if s.rejected {
                *score = (*score + 3).min(FAULT_SCORE_MAX);
            } else if s.residual_m < 0.5 * s.threshold_m {
                *score = score.saturating_sub(2);
            } else if s.residual_m <= s.threshold_m {
                *score = score.saturating_sub(1);
            } else {
                // Unreachable: see comment above.
                *score = (*score + 2).min(FAULT_SCORE_MAX);
            }
        }

        let used: heapless::Vec<&Scored, MODULE_COUNT> =
            scored.iter().filter(|s| !s.rejected).collect();
        let rejected_count = scored.len() - used.len();

        if used.is_empty() {
            return FusionResult {
                last_update_tick: now_ms,
                ..FusionResult::no_fix(now_ms)
            };
        }

        let mut weight_sum = 0.0f64;
        let mut lat_acc = 0.0f64;
        let mut lon_acc = 0.0f64;
        let mut alt_acc = 0.0f64;
        let mut hdop_sum: i64 = 0;
        let mut max_residual_m = 0.0f64;

        for s in &used {
            let hdop = (s.hdop_centi as f64 / 100.0).max(0.01);
            let w = 1.0 / (hdop * hdop);
            weight_sum += w;
            lat_acc += w * s.lat_e7 as f64;
            lon_acc += w * s.lon_e7 as f64;
            alt_acc += w * s.alt_cm as f64;
            hdop_sum += s.hdop_centi as i64;
            if s.residual_m > max_residual_m {
                max_residual_m = s.residual_m;
            }
        }

        // Truncate toward zero rather than rounding, matching the original
        // fusion engine's plain `(int32_t)` cast (`lat_w / sum_w`).
        let lat_e7 = (lat_acc / weight_sum) as i64;
        let lon_e7 = (lon_acc / weight_sum) as i64;
        let alt_cm = (alt_acc / weight_sum) as i64;
        let avg_hdop_centi = (hdop_sum / used.len() as i64) as u32;
        let max_residual_cm = (max_residual_m * 100.0).round();
        let max_residual_cm = if max_residual_cm > 65535.0 { 65535 } else { max_residual_cm as u16 };

        let used_modules = used.len() as u8;
        let rejected_modules = rejected_count as u8;

        let status = classify(used_modules, rejected_modules, max_residual_cm, avg_hdop_centi as u16);

        FusionResult {
            has_fix: true,
            status,
            lat_e7: lat_e7.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            lon_e7: lon_e7.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            alt_cm: alt_cm.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            used_modules,
            rejected_modules,
            max_residual_cm,
            avg_hdop_centi: avg_hdop_centi.min(65535) as u16,
            last_update_tick: now_ms,
        }
    }

    /// No candidates passed the filter this cycle: every non-banished module
    /// accrues (stale/no-fix), every banished module decays (spec §9).
    fn decay_or_accrue(&mut self, banished: &[bool; MODULE_COUNT]) {
        for i in 0..MODULE_COUNT {
            if banished[i] {
                self.fault_score[i] = self.fault_score[i].saturating_sub(1);
            } else {
                self.fault_score[i] = (self.fault_score[i] + 1).min(FAULT_SCORE_MAX);
            }
        }
    }
}

impl Default for Fusion {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinate-wise median centre: independently sort candidate latitudes
/// and longitudes (insertion sort, n <= MODULE_COUNT) and take the
/// upper-median element of each. Robust to up to floor(n/2) grossly wrong
/// modules while staying trivially O(n^2) at n<=8.
fn median_centre(candidates: &heapless::Vec<Candidate, MODULE_COUNT>) -> (i64, i64) {
    let n = candidates.len();
    let mut lats: heapless::Vec<i64, MODULE_COUNT> = candidates.iter().map(|c| c.lat_e7).collect();
    let mut lons: heapless::Vec<i64, MODULE_COUNT> = candidates.iter().map(|c| c.lon_e7).collect();

    insertion_sort(&mut lats);
    insertion_sort(&mut lons);

    (lats[n / 2], lons[n / 2])
}

fn insertion_sort(buf: &mut [i64]) {
    for i in 1..buf.len() {
        let key = buf[i];
        let mut j = i;
        while j > 0 && buf[j - 1] > key {
            buf[j] = buf[j - 1];
            j -= 1;
        }
        buf[j] = key;
    }
}

fn classify(used: u8, rejected: u8, max_residual_cm: u16, avg_hdop_centi: u16) -> FusionStatus {
    if used == 0 {
        return FusionStatus::NoFix;
    }
    if used >= 4 && rejected <= 1 && max_residual_cm < 3000 && avg_hdop_centi < 250 {
        FusionStatus::Ok
    } else if used >= 2 && (rejected >= 2 || max_residual_cm > 8000 || avg_hdop_centi > 500) {
        FusionStatus::Interference
    } else {
        FusionStatus::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleIndex;

    fn module_at(lat_e7: i32, lon_e7: i32, hdop_centi: u16, last_fix_tick: u32) -> ModuleState {
        ModuleState {
            has_fix: true,
            fix_quality: 1,
            satellites: 8,
            hdop_centi,
            lat_e7,
            lon_e7,
            alt_cm: 0,
            speed_centi_ms: 0,
            course_centi_deg: 0,
            last_fix_tick,
            nmea_sentences: 1,
            nmea_checksum_errors: 0,
        }
    }

    #[test]
    fn zero_candidates_publishes_no_fix() {
        let mut fusion = Fusion::new();
        let modules = [ModuleState::new(); MODULE_COUNT];
        let r = fusion.run(&modules, 1000);
        assert_eq!(r.status, FusionStatus::NoFix);
        assert!(!r.has_fix);
    }

    #[test]
    fn happy_path_eight_identical_modules() {
        let mut fusion = Fusion::new();
        let modules = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        let r = fusion.run(&modules, 1000);
        assert_eq!(r.status, FusionStatus::Ok);
        assert_eq!(r.used_modules, 8);
        assert_eq!(r.rejected_modules, 0);
        assert_eq!(r.max_residual_cm, 0);
        assert_eq!(r.lat_e7, 481_173_000);
        assert_eq!(r.lon_e7, 115_166_666);
        assert_eq!(r.avg_hdop_centi, 100);
    }

    #[test]
    fn outlier_rejection_scenario() {
        let mut fusion = Fusion::new();
        let mut modules = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        // module 8 (index 7) ~300m north: +0.0027 deg lat
        modules[7] = module_at(481_173_000 + 27_000, 115_166_666, 100, 1000);
        let r = fusion.run(&modules, 1000);
        assert_eq!(r.used_modules, 7);
        assert_eq!(r.rejected_modules, 1);
        assert_eq!(r.status, FusionStatus::Ok);

        let idx = ModuleIndex::new(8).unwrap();
        assert_eq!(fusion.fault_score(idx), 3);
    }

    #[test]
    fn banishment_after_34_consecutive_rejections() {
        let mut fusion = Fusion::new();
        let mut modules = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        modules[7] = module_at(481_173_000 + 27_000, 115_166_666, 100, 1000);

        for _ in 0..34 {
            fusion.run(&modules, 1000);
        }
        let idx = ModuleIndex::new(8).unwrap();
        assert!(fusion.fault_score(idx) >= FAULT_BANISH_THRESHOLD);

        // Banished module should vanish from the candidate set on the next cycle.
        let r = fusion.run(&modules, 1000);
        assert_eq!(r.used_modules, 7);
        assert_eq!(r.rejected_modules, 0);
    }

    #[test]
    fn banished_module_recovers_via_unconditional_decay() {
        let mut fusion = Fusion::new();
        let modules_with_outlier = {
            let mut m = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
            m[7] = module_at(481_173_000 + 27_000, 115_166_666, 100, 1000);
            m
        };
        for _ in 0..40 {
            fusion.run(&modules_with_outlier, 1000);
        }
        let idx = ModuleIndex::new(8).unwrap();
        assert!(fusion.fault_score(idx) >= FAULT_BANISH_THRESHOLD);

        // Now all eight agree; the banished module is excluded from the
        // candidate filter but still decays by 1/cycle until it's allowed
        // back in.
        let modules_agree = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        let score_before = fusion.fault_score(idx);
        fusion.run(&modules_agree, 1000);
        assert_eq!(fusion.fault_score(idx), score_before - 1);
    }

    #[test]
    fn stale_module_excluded_and_accrues_fault_score() {
        let mut fusion = Fusion::new();
        let mut modules = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        modules[0].last_fix_tick = 0; // now - 0 > 2000ms freshness window
        let r = fusion.run(&modules, 5000);
        assert_eq!(r.used_modules, 7);
        let idx = ModuleIndex::new(1).unwrap();
        assert_eq!(fusion.fault_score(idx), 1);
    }

    #[test]
    fn interference_classification() {
        let mut fusion = Fusion::new();
        let mut modules = [ModuleState::new(); MODULE_COUNT];
        // Two widely scattered modules with terrible HDOP -> used>=2, avg hdop > 500
        modules[0] = module_at(481_173_000, 115_166_666, 2000, 1000);
        modules[1] = module_at(481_173_000 + 5_000_000, 115_166_666, 2000, 1000);
        let r = fusion.run(&modules, 1000);
        assert!(matches!(r.status, FusionStatus::Interference | FusionStatus::Degraded));
    }

    #[test]
    fn used_plus_rejected_never_exceeds_candidate_count() {
        let mut fusion = Fusion::new();
        let mut modules = [module_at(481_173_000, 115_166_666, 100, 1000); MODULE_COUNT];
        modules[3] = ModuleState::new(); // not a candidate: no fix
        let r = fusion.run(&modules, 1000);
        assert!((r.used_modules + r.rejected_modules) as usize <= MODULE_COUNT);
    }

    #[test]
    fn insertion_sort_sorts_small_arrays() {
        let mut buf = [5i64, 3, 8, 1, 9, 2];
        insertion_sort(&mut buf);
        assert_eq!(buf, [1, 2, 3, 5, 8, 9]);
    }
}
