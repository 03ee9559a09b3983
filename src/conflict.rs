//! The confirmed-conflict record and its measure catalog.

use serde::Serialize;

/// Classification of the interaction geometry at the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Unclassified = 0,
    Crossing = 1,
    RearEnd = 2,
    LaneChange = 3,
}

impl ConflictType {
    pub fn label(self) -> &'static str {
        match self {
            ConflictType::Unclassified => "unclassified",
            ConflictType::Crossing => "crossing",
            ConflictType::RearEnd => "rear end",
            ConflictType::LaneChange => "lane change",
        }
    }

    pub const ALL: [ConflictType; 4] = [
        ConflictType::Unclassified,
        ConflictType::Crossing,
        ConflictType::RearEnd,
        ConflictType::LaneChange,
    ];
}

/// Column identities of the 44 recorded measures, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Measure {
    TrjFile = 0,
    TMinTtc,
    XMinPet,
    YMinPet,
    ZMinPet,
    Ttc,
    Pet,
    MaxS,
    DeltaS,
    Dr,
    MaxD,
    MaxDeltaV,
    ConflictAngle,
    ClockAngle,
    ConflictType,
    PostCrashV,
    PostCrashHeading,
    FirstVid,
    FirstLink,
    FirstLane,
    FirstLength,
    FirstWidth,
    FirstHeading,
    FirstVMinTtc,
    FirstDeltaV,
    XFirstCsp,
    YFirstCsp,
    XFirstCep,
    YFirstCep,
    SecondVid,
    SecondLink,
    SecondLane,
    SecondLength,
    SecondWidth,
    SecondHeading,
    SecondVMinTtc,
    SecondDeltaV,
    XSecondCsp,
    YSecondCsp,
    XSecondCep,
    YSecondCep,
    Puea,
    MTtc,
    MPet,
}

pub const NUM_MEASURES: usize = 44;

pub const MEASURE_LABELS: [&str; NUM_MEASURES] = [
    "trjFile",
    "tMinTTC",
    "xMinPET",
    "yMinPET",
    "zMinPET",
    "TTC",
    "PET",
    "MaxS",
    "DeltaS",
    "DR",
    "MaxD",
    "MaxDeltaV",
    "ConflictAngle",
    "ClockAngle",
    "ConflictType",
    "PostCrashV",
    "PostCrashHeading",
    "FirstVID",
    "FirstLink",
    "FirstLane",
    "FirstLength",
    "FirstWidth",
    "FirstHeading",
    "FirstVMinTTC",
    "FirstDeltaV",
    "xFirstCSP",
    "yFirstCSP",
    "xFirstCEP",
    "yFirstCEP",
    "SecondVID",
    "SecondLink",
    "SecondLane",
    "SecondLength",
    "SecondWidth",
    "SecondHeading",
    "SecondVMinTTC",
    "SecondDeltaV",
    "xSecondCSP",
    "ySecondCSP",
    "xSecondCEP",
    "ySecondCEP",
    "P(UEA)",
    "mTTC",
    "mPET",
];

impl Measure {
    pub const ALL: [Measure; NUM_MEASURES] = [
        Measure::TrjFile,
        Measure::TMinTtc,
        Measure::XMinPet,
        Measure::YMinPet,
        Measure::ZMinPet,
        Measure::Ttc,
        Measure::Pet,
        Measure::MaxS,
        Measure::DeltaS,
        Measure::Dr,
        Measure::MaxD,
        Measure::MaxDeltaV,
        Measure::ConflictAngle,
        Measure::ClockAngle,
        Measure::ConflictType,
        Measure::PostCrashV,
        Measure::PostCrashHeading,
        Measure::FirstVid,
        Measure::FirstLink,
        Measure::FirstLane,
        Measure::FirstLength,
        Measure::FirstWidth,
        Measure::FirstHeading,
        Measure::FirstVMinTtc,
        Measure::FirstDeltaV,
        Measure::XFirstCsp,
        Measure::YFirstCsp,
        Measure::XFirstCep,
        Measure::YFirstCep,
        Measure::SecondVid,
        Measure::SecondLink,
        Measure::SecondLane,
        Measure::SecondLength,
        Measure::SecondWidth,
        Measure::SecondHeading,
        Measure::SecondVMinTtc,
        Measure::SecondDeltaV,
        Measure::XSecondCsp,
        Measure::YSecondCsp,
        Measure::XSecondCep,
        Measure::YSecondCep,
        Measure::Puea,
        Measure::MTtc,
        Measure::MPet,
    ];

    pub fn label(self) -> &'static str {
        MEASURE_LABELS[self as usize]
    }

    /// Whether the measure participates in summary statistics
    /// (mean/variance/min/max aggregation).
    pub fn is_summarizable(self) -> bool {
        matches!(
            self,
            Measure::Ttc
                | Measure::Pet
                | Measure::MaxS
                | Measure::DeltaS
                | Measure::Dr
                | Measure::MaxD
                | Measure::MaxDeltaV
                | Measure::Puea
                | Measure::MTtc
                | Measure::MPet
        )
    }

    /// Whether the measure belongs to the abbreviated (key) column set.
    pub fn is_key(self) -> bool {
        matches!(
            self,
            Measure::TrjFile
                | Measure::TMinTtc
                | Measure::XMinPet
                | Measure::YMinPet
                | Measure::ZMinPet
                | Measure::Ttc
                | Measure::Pet
                | Measure::MaxS
                | Measure::DeltaS
                | Measure::Dr
                | Measure::MaxD
                | Measure::MaxDeltaV
                | Measure::ConflictType
                | Measure::FirstVid
                | Measure::FirstLink
                | Measure::FirstLane
                | Measure::SecondVid
                | Measure::SecondLink
                | Measure::SecondLane
                | Measure::Puea
                | Measure::MTtc
                | Measure::MPet
        )
    }
}

/// One confirmed conflict with its full measure set.
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub trj_file: String,
    pub t_min_ttc: f32,
    pub x_min_pet: f32,
    pub y_min_pet: f32,
    pub z_min_pet: f32,
    pub ttc: f32,
    pub pet: f32,
    pub max_s: f32,
    pub delta_s: f32,
    pub dr: f32,
    pub max_d: f32,
    pub max_delta_v: f32,
    pub conflict_angle: f32,
    pub clock_angle: String,
    pub conflict_type: ConflictType,
    pub post_crash_v: f32,
    pub post_crash_heading: f32,
    pub first_vid: i32,
    pub first_link: i32,
    pub first_lane: i32,
    pub first_length: f32,
    pub first_width: f32,
    pub first_heading: f32,
    pub first_v_min_ttc: f32,
    pub first_delta_v: f32,
    pub x_first_csp: f32,
    pub y_first_csp: f32,
    pub x_first_cep: f32,
    pub y_first_cep: f32,
    pub second_vid: i32,
    pub second_link: i32,
    pub second_lane: i32,
    pub second_length: f32,
    pub second_width: f32,
    pub second_heading: f32,
    pub second_v_min_ttc: f32,
    pub second_delta_v: f32,
    pub x_second_csp: f32,
    pub y_second_csp: f32,
    pub x_second_cep: f32,
    pub y_second_cep: f32,
    pub puea: f32,
    pub m_ttc: f32,
    pub m_pet: f32,
}

impl Conflict {
    /// Numeric value of a measure column; non-numeric columns (file
    /// name, clock angle, conflict type) and the purely descriptive
    /// ones read zero, mirroring the tabular export convention.
    pub fn measure_value(&self, m: Measure) -> f32 {
        match m {
            Measure::TMinTtc => self.t_min_ttc,
            Measure::XMinPet => self.x_min_pet,
            Measure::YMinPet => self.y_min_pet,
            Measure::ZMinPet => self.z_min_pet,
            Measure::Ttc => self.ttc,
            Measure::Pet => self.pet,
            Measure::MaxS => self.max_s,
            Measure::DeltaS => self.delta_s,
            Measure::Dr => self.dr,
            Measure::MaxD => self.max_d,
            Measure::MaxDeltaV => self.max_delta_v,
            Measure::ConflictAngle => self.conflict_angle,
            Measure::FirstVid => self.first_vid as f32,
            Measure::XFirstCsp => self.x_first_csp,
            Measure::YFirstCsp => self.y_first_csp,
            Measure::XFirstCep => self.x_first_cep,
            Measure::YFirstCep => self.y_first_cep,
            Measure::FirstHeading => self.first_heading,
            Measure::SecondVid => self.second_vid as f32,
            Measure::XSecondCsp => self.x_second_csp,
            Measure::YSecondCsp => self.y_second_csp,
            Measure::XSecondCep => self.x_second_cep,
            Measure::YSecondCep => self.y_second_cep,
            Measure::SecondHeading => self.second_heading,
            Measure::FirstLink => self.first_link as f32,
            Measure::SecondLink => self.second_link as f32,
            Measure::Puea => self.puea,
            Measure::MTtc => self.m_ttc,
            Measure::MPet => self.m_pet,
            _ => 0.0,
        }
    }

    /// File name without any leading path component.
    pub fn stripped_trj_name(&self) -> &str {
        self.trj_file
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.trj_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_column_order() {
        assert_eq!(Measure::Ttc.label(), "TTC");
        assert_eq!(Measure::ClockAngle.label(), "ClockAngle");
        assert_eq!(Measure::Puea.label(), "P(UEA)");
        assert_eq!(Measure::MPet.label(), "mPET");
        assert_eq!(Measure::ALL.len(), NUM_MEASURES);
        for (i, m) in Measure::ALL.iter().enumerate() {
            assert_eq!(*m as usize, i);
        }
    }

    #[test]
    fn ten_measures_are_summarizable() {
        let n = Measure::ALL.iter().filter(|m| m.is_summarizable()).count();
        assert_eq!(n, 10);
        assert!(Measure::MaxDeltaV.is_summarizable());
        assert!(!Measure::ConflictAngle.is_summarizable());
    }

    #[test]
    fn conflict_type_labels() {
        assert_eq!(ConflictType::RearEnd.label(), "rear end");
        assert_eq!(ConflictType::Unclassified.label(), "unclassified");
    }

    #[test]
    fn trj_name_strips_path() {
        let mut c = sample_conflict();
        c.trj_file = "C:\\runs\\intersection.trj".into();
        assert_eq!(c.stripped_trj_name(), "intersection.trj");
        c.trj_file = "/data/runs/intersection.trj".into();
        assert_eq!(c.stripped_trj_name(), "intersection.trj");
    }

    fn sample_conflict() -> Conflict {
        Conflict {
            trj_file: "test.trj".into(),
            t_min_ttc: 10.0,
            x_min_pet: 0.0,
            y_min_pet: 0.0,
            z_min_pet: 0.0,
            ttc: 1.2,
            pet: 2.0,
            max_s: 40.0,
            delta_s: 12.0,
            dr: -3.0,
            max_d: -6.0,
            max_delta_v: 8.0,
            conflict_angle: 45.0,
            clock_angle: "04:30".into(),
            conflict_type: ConflictType::Crossing,
            post_crash_v: 20.0,
            post_crash_heading: 10.0,
            first_vid: 1,
            first_link: 1,
            first_lane: 1,
            first_length: 14.0,
            first_width: 6.0,
            first_heading: 0.0,
            first_v_min_ttc: 30.0,
            first_delta_v: 5.0,
            x_first_csp: 0.0,
            y_first_csp: 0.0,
            x_first_cep: 1.0,
            y_first_cep: 1.0,
            second_vid: 2,
            second_link: 2,
            second_lane: 1,
            second_length: 14.0,
            second_width: 6.0,
            second_heading: 90.0,
            second_v_min_ttc: 28.0,
            second_delta_v: 5.5,
            x_second_csp: 3.0,
            y_second_csp: 3.0,
            x_second_cep: 2.0,
            y_second_cep: 2.0,
            puea: 1.0,
            m_ttc: 99.0,
            m_pet: 99.0,
        }
    }

    #[test]
    fn non_numeric_measures_read_zero() {
        let c = sample_conflict();
        assert_eq!(c.measure_value(Measure::TrjFile), 0.0);
        assert_eq!(c.measure_value(Measure::ConflictType), 0.0);
        assert_eq!(c.measure_value(Measure::Ttc), 1.2);
        assert_eq!(c.measure_value(Measure::SecondVid), 2.0);
    }
}
