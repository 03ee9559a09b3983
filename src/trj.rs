//! Typed trajectory-record stream and the binary `.trj` reader.
//!
//! The analysis engine only ever sees [`TrjRecord`] values; the byte-level
//! decode loop lives here and nowhere else. A source starts with one FORMAT
//! record and one DIMENSIONS record, followed by interleaved TIMESTEP and
//! VEHICLE records.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Format versions above this carry z coordinates per vehicle record.
pub const ORIG_FORMAT_VERSION: f32 = 1.04;

/// Record-type tag bytes as they appear in the stream.
const TAG_FORMAT: u8 = 0;
const TAG_DIMENSIONS: u8 = 1;
const TAG_TIMESTEP: u8 = 2;
const TAG_VEHICLE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Byte format and file-format version of a trajectory source.
#[derive(Debug, Clone, Copy)]
pub struct InputFormat {
    pub endian: Endian,
    pub version: f32,
    /// Whether vehicle records carry front/rear z values.
    pub z_option: bool,
}

impl InputFormat {
    pub fn has_z(&self) -> bool {
        self.version > ORIG_FORMAT_VERSION && self.z_option
    }
}

/// Measurement unit system of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    /// feet, feet/sec, feet/sec^2
    English,
    /// meters, meters/sec, meters/sec^2
    Metric,
}

/// Extent of the rectangular observation area, in x-y coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Dimensions {
    pub units: Units,
    /// Distance per unit of X or Y.
    pub scale: f32,
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Dimensions {
    pub fn validate(&self) -> Result<()> {
        if self.scale <= 0.0 {
            return Err(AnalysisError::Config(
                "invalid (non-positive) scale factor specified for observation area dimensions"
                    .into(),
            ));
        }
        if self.min_x >= self.max_x {
            return Err(AnalysisError::Config(format!(
                "dimension record is invalid: min X >= max X ({} >= {})",
                self.min_x, self.max_x
            )));
        }
        if self.min_y >= self.max_y {
            return Err(AnalysisError::Config(format!(
                "dimension record is invalid: min Y >= max Y ({} >= {})",
                self.min_y, self.max_y
            )));
        }
        Ok(())
    }
}

/// One vehicle observation within the current time step.
#[derive(Debug, Clone, Copy)]
pub struct VehicleRecord {
    pub id: u32,
    pub link: i32,
    pub lane: i8,
    pub front_x: f32,
    pub front_y: f32,
    pub rear_x: f32,
    pub rear_y: f32,
    pub length: f32,
    pub width: f32,
    pub speed: f32,
    pub acceleration: f32,
    pub front_z: f32,
    pub rear_z: f32,
}

/// A typed record from a trajectory source.
#[derive(Debug, Clone)]
pub enum TrjRecord {
    Format(InputFormat),
    Dimensions(Dimensions),
    TimeStep(f32),
    Vehicle(VehicleRecord),
}

/// Streaming binary reader yielding typed records.
pub struct TrjReader<R: Read> {
    input: R,
    format: Option<InputFormat>,
    saw_dimensions: bool,
    done: bool,
}

impl<R: Read> TrjReader<R> {
    pub fn new(input: R) -> Self {
        TrjReader {
            input,
            format: None,
            saw_dimensions: false,
            done: false,
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| AnalysisError::Input("unexpected end of trajectory stream".into()))?;
        Ok(buf[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| AnalysisError::Input("unexpected end of trajectory stream".into()))?;
        Ok(match self.endian() {
            Endian::Little => i32::from_le_bytes(buf),
            Endian::Big => i32::from_be_bytes(buf),
        })
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| AnalysisError::Input("unexpected end of trajectory stream".into()))?;
        Ok(match self.endian() {
            Endian::Little => f32::from_le_bytes(buf),
            Endian::Big => f32::from_be_bytes(buf),
        })
    }

    fn endian(&self) -> Endian {
        self.format.map(|f| f.endian).unwrap_or(Endian::Little)
    }

    fn read_format(&mut self) -> Result<InputFormat> {
        let endian = match self.read_byte()? {
            b'L' => Endian::Little,
            b'B' => Endian::Big,
            other => {
                return Err(AnalysisError::Input(format!(
                    "unrecognized byte-order encoding {other:#04x} (neither big nor little endian)"
                )))
            }
        };
        let mut buf = [0u8; 4];
        self.input
            .read_exact(&mut buf)
            .map_err(|_| AnalysisError::Input("truncated format record".into()))?;
        let version = match endian {
            Endian::Little => f32::from_le_bytes(buf),
            Endian::Big => f32::from_be_bytes(buf),
        };
        let z_option = if version > ORIG_FORMAT_VERSION {
            self.read_byte()? != 0
        } else {
            false
        };
        Ok(InputFormat {
            endian,
            version,
            z_option,
        })
    }

    fn read_dimensions(&mut self) -> Result<Dimensions> {
        let units = match self.read_byte()? {
            0 => Units::English,
            1 => Units::Metric,
            other => {
                return Err(AnalysisError::Input(format!(
                    "invalid units {other} specified for observation area dimensions"
                )))
            }
        };
        let scale = self.read_f32()?;
        let min_x = self.read_i32()?;
        let min_y = self.read_i32()?;
        let max_x = self.read_i32()?;
        let max_y = self.read_i32()?;
        let dims = Dimensions {
            units,
            scale,
            min_x,
            min_y,
            max_x,
            max_y,
        };
        dims.validate()?;
        Ok(dims)
    }

    fn read_vehicle(&mut self) -> Result<VehicleRecord> {
        let id = self.read_i32()?;
        if id < 0 {
            return Err(AnalysisError::Input(format!("negative vehicle id {id}")));
        }
        let link = self.read_i32()?;
        let lane = self.read_byte()? as i8;
        let front_x = self.read_f32()?;
        let front_y = self.read_f32()?;
        let rear_x = self.read_f32()?;
        let rear_y = self.read_f32()?;
        let length = self.read_f32()?;
        let width = self.read_f32()?;
        let speed = self.read_f32()?;
        let acceleration = self.read_f32()?;
        // z floats are present for any post-1.04 version; the z-option
        // flag only says whether they hold real elevations
        let versioned_z = self
            .format
            .map(|f| f.version > ORIG_FORMAT_VERSION)
            .unwrap_or(false);
        let (front_z, rear_z) = if versioned_z {
            (self.read_f32()?, self.read_f32()?)
        } else {
            (0.0, 0.0)
        };
        Ok(VehicleRecord {
            id: id as u32,
            link,
            lane,
            front_x,
            front_y,
            rear_x,
            rear_y,
            length,
            width,
            speed,
            acceleration,
            front_z,
            rear_z,
        })
    }

    fn next_record(&mut self) -> Result<Option<TrjRecord>> {
        let mut tag = [0u8; 1];
        match self.input.read(&mut tag) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(AnalysisError::Input(format!("read failure: {e}"))),
        }

        match tag[0] {
            TAG_FORMAT => {
                let format = self.read_format()?;
                self.format = Some(format);
                Ok(Some(TrjRecord::Format(format)))
            }
            TAG_DIMENSIONS => {
                if self.format.is_none() {
                    return Err(AnalysisError::Input(
                        "expected FORMAT record before DIMENSIONS".into(),
                    ));
                }
                let dims = self.read_dimensions()?;
                self.saw_dimensions = true;
                Ok(Some(TrjRecord::Dimensions(dims)))
            }
            TAG_TIMESTEP => {
                if !self.saw_dimensions {
                    return Err(AnalysisError::Input(
                        "expected DIMENSIONS record before time-step data".into(),
                    ));
                }
                Ok(Some(TrjRecord::TimeStep(self.read_f32()?)))
            }
            TAG_VEHICLE => {
                if !self.saw_dimensions {
                    return Err(AnalysisError::Input(
                        "expected DIMENSIONS record before vehicle data".into(),
                    ));
                }
                Ok(Some(TrjRecord::Vehicle(self.read_vehicle()?)))
            }
            other => Err(AnalysisError::Input(format!(
                "invalid trajectory record type {other}"
            ))),
        }
    }
}

impl<R: Read> Iterator for TrjReader<R> {
    type Item = Result<TrjRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(TAG_FORMAT);
        buf.push(b'L');
        buf.extend_from_slice(&1.04f32.to_le_bytes());
        buf.push(TAG_DIMENSIONS);
        buf.push(0); // English
        buf.extend_from_slice(&1.0f32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&1000i32.to_le_bytes());
        buf.extend_from_slice(&1000i32.to_le_bytes());
        buf
    }

    fn vehicle_bytes(id: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(TAG_VEHICLE);
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&1i32.to_le_bytes()); // link
        buf.push(1); // lane
        for f in [10.0f32, 5.0, 0.0, 5.0, 10.0, 6.0, 30.0, 0.0] {
            buf.extend_from_slice(&f.to_le_bytes());
        }
        buf
    }

    #[test]
    fn reads_header_and_step() {
        let mut buf = header_bytes();
        buf.push(TAG_TIMESTEP);
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        buf.extend(vehicle_bytes(7));

        let records: Vec<_> = TrjReader::new(Cursor::new(buf))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 4);
        assert!(matches!(records[0], TrjRecord::Format(_)));
        assert!(matches!(records[1], TrjRecord::Dimensions(_)));
        assert!(matches!(records[2], TrjRecord::TimeStep(t) if t == 1.5));
        match &records[3] {
            TrjRecord::Vehicle(v) => {
                assert_eq!(v.id, 7);
                assert_eq!(v.length, 10.0);
                assert_eq!(v.speed, 30.0);
            }
            other => panic!("expected vehicle record, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_is_input_error() {
        let mut buf = header_bytes();
        buf.push(TAG_TIMESTEP);
        buf.extend_from_slice(&1.5f32.to_le_bytes()[..2]); // cut short

        let result: Result<Vec<_>> = TrjReader::new(Cursor::new(buf)).collect();
        assert!(matches!(result, Err(AnalysisError::Input(_))));
    }

    #[test]
    fn degenerate_dimensions_are_config_errors() {
        let mut buf = Vec::new();
        buf.push(TAG_FORMAT);
        buf.push(b'L');
        buf.extend_from_slice(&1.04f32.to_le_bytes());
        buf.push(TAG_DIMENSIONS);
        buf.push(0);
        buf.extend_from_slice(&1.0f32.to_le_bytes());
        buf.extend_from_slice(&500i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&100i32.to_le_bytes()); // max_x < min_x
        buf.extend_from_slice(&1000i32.to_le_bytes());

        let result: Result<Vec<_>> = TrjReader::new(Cursor::new(buf)).collect();
        assert!(matches!(result, Err(AnalysisError::Config(_))));
    }

    #[test]
    fn data_before_header_rejected() {
        let mut buf = Vec::new();
        buf.push(TAG_TIMESTEP);
        buf.extend_from_slice(&0.0f32.to_le_bytes());
        let result: Result<Vec<_>> = TrjReader::new(Cursor::new(buf)).collect();
        assert!(matches!(result, Err(AnalysisError::Input(_))));
    }
}
