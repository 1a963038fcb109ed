//! Time-ordered sensor events for driving the filter
//!
//! The filter itself is a synchronous library: the caller decides the order in which IMU samples
//! and measurements are applied. [`Event`] packages each kind of input so that a recorded or
//! simulated session can be stored as a single ordered stream and replayed through
//! [`PseudorangeInsFilter::process`].
//!
//! ## Examples
//!
//! ```
//! use gnssins::messages::Event;
//! use gnssins::PseudorangeInsFilter;
//! use nalgebra::Vector3;
//!
//! let mut filter = PseudorangeInsFilter::new();
//! let imu = Event::Imu {
//!     dt_s: 0.01,
//!     gyro: Vector3::zeros(),
//!     accel: Vector3::zeros(),
//!     elapsed_s: 0.01,
//! };
//! filter.process(&imu).unwrap();
//!
//! // an epoch with no satellites in view changes nothing
//! let epoch = Event::Pseudoranges { observations: vec![], elapsed_s: 0.02 };
//! filter.process(&epoch).unwrap();
//! ```
use std::fs::File;
use std::io;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kalman::PseudorangeInsFilter;
use crate::measurements::{InertialAccumulator, PositionClockAccumulator};

/// One satellite's pseudorange within an epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PseudorangeObservation {
    /// Satellite ECEF position at transmission time (m)
    pub satellite_position: Vector3<f64>,
    /// Measured pseudorange (m)
    pub pseudorange: f64,
    /// Measurement variance (m²)
    pub variance: f32,
}

/// One satellite's delta-range within an epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltarangeObservation {
    /// Satellite ECEF velocity (m/s)
    pub satellite_velocity: Vector3<f64>,
    /// Measured relative speed (m/s)
    pub deltarange: f64,
    /// Measurement variance ((m/s)²)
    pub variance: f32,
}

/// A single input to the filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// IMU prediction step.
    ///
    /// - `dt_s`: Time since the previous IMU sample (seconds).
    /// - `gyro`: Body-frame angular rate (rad/s).
    /// - `accel`: Body-frame specific force (m/s²).
    Imu {
        dt_s: f32,
        gyro: Vector3<f32>,
        accel: Vector3<f32>,
        elapsed_s: f64,
    },
    /// Sighting of a known ECEF direction in the body frame
    Vector {
        reference: Vector3<f32>,
        observed: Vector3<f32>,
        variance: f32,
        elapsed_s: f64,
    },
    /// All pseudoranges of one receiver epoch, applied to the mean together
    Pseudoranges {
        observations: Vec<PseudorangeObservation>,
        elapsed_s: f64,
    },
    /// All delta-ranges of one receiver epoch, applied to the mean together
    Deltaranges {
        observations: Vec<DeltarangeObservation>,
        elapsed_s: f64,
    },
    /// Receiver position/velocity solution with per-axis variances
    PvReport {
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        position_variance: Vector3<f32>,
        velocity_variance: Vector3<f32>,
        elapsed_s: f64,
    },
}

impl Event {
    /// Session time of the event in seconds
    pub fn elapsed_s(&self) -> f64 {
        match self {
            Event::Imu { elapsed_s, .. }
            | Event::Vector { elapsed_s, .. }
            | Event::Pseudoranges { elapsed_s, .. }
            | Event::Deltaranges { elapsed_s, .. }
            | Event::PvReport { elapsed_s, .. } => *elapsed_s,
        }
    }
}

/// An ordered sequence of events, e.g. a recorded session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStream {
    pub events: Vec<Event>,
}

impl EventStream {
    /// Write the stream to a JSON file.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(file, self).map_err(io::Error::other)
    }

    /// Read a stream from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    /// True if no event precedes the one before it
    pub fn is_time_ordered(&self) -> bool {
        self.events
            .windows(2)
            .all(|pair| pair[0].elapsed_s() <= pair[1].elapsed_s())
    }

    /// Feed every event to `filter` in order, stopping at the first rejected one
    ///
    /// Returns the number of events processed.
    pub fn replay(&self, filter: &mut PseudorangeInsFilter) -> Result<usize> {
        for event in &self.events {
            filter.process(event)?;
        }
        Ok(self.events.len())
    }
}

impl PseudorangeInsFilter {
    /// Apply a single event
    ///
    /// Pseudorange and delta-range epochs are processed satellite by satellite into one
    /// accumulator which is then applied once. The whole epoch is atomic: if any satellite is
    /// rejected, none of the epoch's covariance updates are kept.
    pub fn process(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::Imu {
                dt_s, gyro, accel, ..
            } => self.predict(gyro, accel, *dt_s),
            Event::Vector {
                reference,
                observed,
                variance,
                ..
            } => self.obs_vector(reference, observed, *variance),
            Event::Pseudoranges { observations, .. } => {
                if observations.is_empty() {
                    return Ok(());
                }
                self.transaction("pseudorange epoch", |filter| {
                    let mut accumulator = PositionClockAccumulator::default();
                    for obs in observations {
                        filter.obs_gps_pseudorange(
                            &mut accumulator,
                            &obs.satellite_position,
                            obs.pseudorange,
                            obs.variance,
                        )?;
                    }
                    filter.apply_pseudorange_batch(accumulator)
                })
            }
            Event::Deltaranges { observations, .. } => {
                if observations.is_empty() {
                    return Ok(());
                }
                self.transaction("delta-range epoch", |filter| {
                    let mut accumulator = InertialAccumulator::default();
                    for obs in observations {
                        filter.obs_gps_deltarange(
                            &mut accumulator,
                            &obs.satellite_velocity,
                            obs.deltarange,
                            obs.variance,
                        )?;
                    }
                    filter.apply_deltarange_batch(accumulator).map(|_| ())
                })
            }
            Event::PvReport {
                position,
                velocity,
                position_variance,
                velocity_variance,
                ..
            } => self.obs_gps_pv_report(position, velocity, position_variance, velocity_variance),
        }
    }
}
