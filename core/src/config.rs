//! Filter configuration: initial uncertainty, process noise, and the gravity model
//!
//! A [`FilterConfig`] fully describes the tuning of a
//! [`PseudorangeInsFilter`](crate::kalman::PseudorangeInsFilter). The defaults correspond to a
//! consumer-grade MEMS IMU paired with a GNSS receiver whose clock has not yet been solved for:
//!
//! | quantity            | default              |
//! |---------------------|----------------------|
//! | gyro bias RMS       | 3 deg/s              |
//! | attitude variance   | $\pi^2 / 2$ rad²     |
//! | velocity variance   | 100 m²/s²            |
//! | accel bias RMS      | 0.3 m/s²             |
//! | clock bias RMS      | 300 m (~1 µs · c)    |
//! | position RMS        | 100 km               |
//!
//! Configurations can be written to and read from JSON, YAML, or TOML. Every field carries a
//! serde default, so a file only needs to name the values it overrides.
//!
//! ```toml
//! gravity = 9.80665
//!
//! [initial]
//! position_rms = 50.0
//!
//! [process_noise]
//! gyro_white = [2.5e-5, 2.5e-5, 2.5e-5]
//! clock_stability = 25.0
//! ```
use std::f32::consts::PI;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::earth::STANDARD_GRAVITY;
use crate::error::{FilterError, Result};

/// Initial (and re-initialization) uncertainty of the error state.
///
/// RMS values are standard deviations; the filter squares them when building the covariance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialUncertainty {
    /// Gyro bias standard deviation, rad/s
    pub gyro_bias_rms: f32,
    /// Attitude error variance per axis, rad²
    pub attitude_variance: f32,
    /// Velocity error variance per axis, m²/s²
    pub velocity_variance: f32,
    /// Accelerometer bias standard deviation, m/s²
    pub accel_bias_rms: f32,
    /// Receiver clock bias standard deviation expressed as a range, m
    pub clock_bias_rms: f32,
    /// Position standard deviation per axis, m
    pub position_rms: f32,
}

impl Default for InitialUncertainty {
    fn default() -> Self {
        InitialUncertainty {
            gyro_bias_rms: 3.0 * PI / 180.0,
            attitude_variance: PI * PI * 0.5,
            velocity_variance: 100.0,
            accel_bias_rms: 0.3,
            clock_bias_rms: 300.0,
            position_rms: 100e3,
        }
    }
}

/// Process noise spectral densities, added to the covariance diagonal scaled by `dt`
/// (or `0.5 dt²` for the position block).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessNoise {
    /// Gyro bias random walk, (rad/s)²/s
    pub gyro_stability: Vector3<f32>,
    /// Gyro angle random walk, rad²/s
    pub gyro_white: Vector3<f32>,
    /// Accelerometer velocity random walk, (m/s)²/s
    pub accel_white: Vector3<f32>,
    /// Accelerometer bias random walk, (m/s²)²/s
    pub accel_stability: Vector3<f32>,
    /// Receiver clock random walk, m²/s
    pub clock_stability: f32,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        ProcessNoise {
            gyro_stability: Vector3::repeat(1e-10),
            gyro_white: Vector3::repeat(2.5e-5),
            accel_white: Vector3::repeat(2.5e-3),
            accel_stability: Vector3::repeat(1e-8),
            clock_stability: 10.0,
        }
    }
}

/// Complete filter tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Magnitude of the spherical-Earth gravity model, m/s²
    pub gravity: f32,
    /// Uncertainty used at construction and by the re-initialization entry points
    pub initial: InitialUncertainty,
    /// Process noise added on every prediction step
    pub process_noise: ProcessNoise,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            initial: InitialUncertainty::default(),
            process_noise: ProcessNoise::default(),
            gravity: STANDARD_GRAVITY,
        }
    }
}

fn check_non_negative(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!(
            "config value `{name}` must be finite and non-negative, got {value}"
        )))
    }
}

fn check_non_negative_vector(name: &str, value: &Vector3<f32>) -> Result<()> {
    value
        .iter()
        .try_for_each(|component| check_non_negative(name, *component))
}

impl FilterConfig {
    /// Check that every configured quantity is finite and non-negative and that gravity is
    /// strictly positive.
    pub fn validate(&self) -> Result<()> {
        let initial = &self.initial;
        check_non_negative("initial.gyro_bias_rms", initial.gyro_bias_rms)?;
        check_non_negative("initial.attitude_variance", initial.attitude_variance)?;
        check_non_negative("initial.velocity_variance", initial.velocity_variance)?;
        check_non_negative("initial.accel_bias_rms", initial.accel_bias_rms)?;
        check_non_negative("initial.clock_bias_rms", initial.clock_bias_rms)?;
        check_non_negative("initial.position_rms", initial.position_rms)?;

        let noise = &self.process_noise;
        check_non_negative_vector("process_noise.gyro_stability", &noise.gyro_stability)?;
        check_non_negative_vector("process_noise.gyro_white", &noise.gyro_white)?;
        check_non_negative_vector("process_noise.accel_white", &noise.accel_white)?;
        check_non_negative_vector("process_noise.accel_stability", &noise.accel_stability)?;
        check_non_negative("process_noise.clock_stability", noise.clock_stability)?;

        if !(self.gravity.is_finite() && self.gravity > 0.0) {
            return Err(FilterError::InvalidArgument(format!(
                "config value `gravity` must be finite and positive, got {}",
                self.gravity
            )));
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
