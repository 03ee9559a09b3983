//! Streaming summary statistics over confirmed conflicts.
//!
//! Each conflict is folded into the aggregates exactly once, at the
//! moment it is confirmed; there is no end-of-run recomputation pass.
//! Mean and variance use Welford's update, so the result is independent
//! of the order conflicts arrive in (up to float rounding).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::conflict::{Conflict, ConflictType, Measure};

/// Running min/max/mean/variance for one measure.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureStats {
    pub label: &'static str,
    pub count: u64,
    pub min: f32,
    pub max: f32,
    pub mean: f64,
    #[serde(skip)]
    m2: f64,
}

impl MeasureStats {
    fn new(measure: Measure) -> Self {
        MeasureStats {
            label: measure.label(),
            count: 0,
            min: f32::MAX,
            max: f32::MIN,
            mean: 0.0,
            m2: 0.0,
        }
    }

    fn record(&mut self, x: f32) {
        self.count += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);
        let x = x as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Sample variance; zero until two observations exist.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

impl Serialize for SummarySection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("SummarySection", 3)?;
        s.serialize_field("conflicts", &self.type_counts())?;
        let stats: Vec<SerializedStats> = self
            .stats
            .iter()
            .map(|m| SerializedStats {
                label: m.label,
                count: m.count,
                min: if m.count == 0 { 0.0 } else { m.min },
                max: if m.count == 0 { 0.0 } else { m.max },
                mean: m.mean,
                variance: m.variance(),
            })
            .collect();
        s.serialize_field("measures", &stats)?;
        s.serialize_field("total", &self.total)?;
        s.end()
    }
}

#[derive(Serialize)]
struct SerializedStats {
    label: &'static str,
    count: u64,
    min: f32,
    max: f32,
    mean: f64,
    variance: f64,
}

/// Aggregates for one scope (a single source file, or all sources).
#[derive(Debug, Clone)]
pub struct SummarySection {
    stats: Vec<MeasureStats>,
    counts: [u64; ConflictType::ALL.len()],
    total: u64,
}

impl SummarySection {
    fn new() -> Self {
        SummarySection {
            stats: Measure::ALL
                .iter()
                .filter(|m| m.is_summarizable())
                .map(|m| MeasureStats::new(*m))
                .collect(),
            counts: [0; ConflictType::ALL.len()],
            total: 0,
        }
    }

    fn record(&mut self, conflict: &Conflict) {
        self.total += 1;
        self.counts[conflict.conflict_type as usize] += 1;
        let measures = Measure::ALL.iter().filter(|m| m.is_summarizable());
        for (slot, m) in self.stats.iter_mut().zip(measures) {
            slot.record(conflict.measure_value(*m));
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count_of(&self, ty: ConflictType) -> u64 {
        self.counts[ty as usize]
    }

    /// Per-type counts keyed by label, plus a `"total"` slot.
    pub fn type_counts(&self) -> BTreeMap<&'static str, u64> {
        let mut out = BTreeMap::new();
        for ty in ConflictType::ALL {
            out.insert(ty.label(), self.counts[ty as usize]);
        }
        out.insert("total", self.total);
        out
    }

    pub fn stats(&self) -> &[MeasureStats] {
        &self.stats
    }

    pub fn stats_for(&self, measure: Measure) -> Option<&MeasureStats> {
        self.stats.iter().find(|s| s.label == measure.label())
    }
}

/// Summary over every analyzed source plus a combined section.
#[derive(Debug, Serialize)]
pub struct SafetySummary {
    pub all: SummarySection,
    pub per_source: BTreeMap<String, SummarySection>,
}

impl SafetySummary {
    pub fn new() -> Self {
        SafetySummary {
            all: SummarySection::new(),
            per_source: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, source: &str, conflict: &Conflict) {
        self.all.record(conflict);
        self.per_source
            .entry(source.to_owned())
            .or_insert_with(SummarySection::new)
            .record(conflict);
    }
}

impl Default for SafetySummary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn conflict(ttc: f32, ty: ConflictType) -> Conflict {
        Conflict {
            trj_file: "a.trj".into(),
            t_min_ttc: 0.0,
            x_min_pet: 0.0,
            y_min_pet: 0.0,
            z_min_pet: 0.0,
            ttc,
            pet: 2.0,
            max_s: 40.0,
            delta_s: 10.0,
            dr: -2.0,
            max_d: -4.0,
            max_delta_v: 6.0,
            conflict_angle: 0.0,
            clock_angle: "06:00".into(),
            conflict_type: ty,
            post_crash_v: 0.0,
            post_crash_heading: 0.0,
            first_vid: 1,
            first_link: 1,
            first_lane: 1,
            first_length: 14.0,
            first_width: 6.0,
            first_heading: 0.0,
            first_v_min_ttc: 30.0,
            first_delta_v: 3.0,
            x_first_csp: 0.0,
            y_first_csp: 0.0,
            x_first_cep: 0.0,
            y_first_cep: 0.0,
            second_vid: 2,
            second_link: 1,
            second_lane: 1,
            second_length: 14.0,
            second_width: 6.0,
            second_heading: 0.0,
            second_v_min_ttc: 25.0,
            second_delta_v: 3.0,
            x_second_csp: 0.0,
            y_second_csp: 0.0,
            x_second_cep: 0.0,
            y_second_cep: 0.0,
            puea: 1.0,
            m_ttc: 99.0,
            m_pet: 99.0,
        }
    }

    #[test]
    fn counts_split_by_type_with_total() {
        let mut s = SafetySummary::new();
        s.record("a.trj", &conflict(1.0, ConflictType::RearEnd));
        s.record("a.trj", &conflict(1.2, ConflictType::RearEnd));
        s.record("b.trj", &conflict(0.8, ConflictType::Crossing));
        assert_eq!(s.all.total(), 3);
        assert_eq!(s.all.count_of(ConflictType::RearEnd), 2);
        assert_eq!(s.all.count_of(ConflictType::Crossing), 1);
        assert_eq!(s.all.count_of(ConflictType::LaneChange), 0);
        assert_eq!(s.per_source["a.trj"].total(), 2);
        assert_eq!(s.per_source["b.trj"].total(), 1);
        assert_eq!(s.all.type_counts()["total"], 3);
    }

    #[test]
    fn welford_matches_closed_form() {
        let mut s = SummarySection::new();
        let values = [1.0f32, 1.5, 0.5, 1.2, 0.9];
        for v in values {
            s.record(&conflict(v, ConflictType::Unclassified));
        }
        let ttc = s.stats_for(Measure::Ttc).unwrap();
        let n = values.len() as f64;
        let mean: f64 = values.iter().map(|v| *v as f64).sum::<f64>() / n;
        let var: f64 = values
            .iter()
            .map(|v| (*v as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        assert_relative_eq!(ttc.mean, mean, epsilon = 1e-9);
        assert_relative_eq!(ttc.variance(), var, epsilon = 1e-9);
        assert_relative_eq!(ttc.min, 0.5);
        assert_relative_eq!(ttc.max, 1.5);
    }

    #[test]
    fn order_independent_aggregates() {
        let values = [0.3f32, 1.4, 0.8, 1.1, 0.6, 1.3];
        let mut fwd = SummarySection::new();
        let mut rev = SummarySection::new();
        for v in values {
            fwd.record(&conflict(v, ConflictType::Crossing));
        }
        for v in values.iter().rev() {
            rev.record(&conflict(*v, ConflictType::Crossing));
        }
        let a = fwd.stats_for(Measure::Ttc).unwrap();
        let b = rev.stats_for(Measure::Ttc).unwrap();
        assert_relative_eq!(a.mean, b.mean, epsilon = 1e-9);
        assert_relative_eq!(a.variance(), b.variance(), epsilon = 1e-9);
    }

    #[test]
    fn variance_is_zero_below_two_samples() {
        let mut s = SummarySection::new();
        s.record(&conflict(1.0, ConflictType::Unclassified));
        assert_eq!(s.stats_for(Measure::Ttc).unwrap().variance(), 0.0);
    }
}
