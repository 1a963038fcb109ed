//! End-to-end scenarios for the pseudorange-aided INS filter
//!
//! These tests drive the public API only, the same way an application would: construct a filter,
//! seed it with a rough position, run IMU predictions, and apply GNSS and vector observations.
//! Truth positions come from geodetic coordinates converted with `nav-types` so that the scenarios
//! sit at realistic ECEF locations rather than on a coordinate axis.
//!
//! The Monte Carlo test checks filter consistency: with measurement noise drawn from the
//! variances the filter is told about, the squared Mahalanobis distance between estimate and
//! truth should on average match the number of observable error states.
use gnssins::earth::{EQUATORIAL_RADIUS, SPEED_OF_LIGHT, STANDARD_GRAVITY, gravity_ecef};
use gnssins::messages::{Event, EventStream, PseudorangeObservation};
use gnssins::quaternion::{angular_distance, exp_map};
use gnssins::{FilterConfig, NavState, PositionClockAccumulator, PseudorangeInsFilter};

use nalgebra::{Quaternion, Vector3};
use nav_types::{ECEF, WGS84};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tempfile::NamedTempFile;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn geodetic_to_ecef(latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
    let wgs84: WGS84<f64> = WGS84::from_degrees_and_meters(latitude, longitude, altitude);
    let ecef: ECEF<f64> = ECEF::from(wgs84);
    Vector3::new(ecef.x(), ecef.y(), ecef.z())
}

/// Satellites roughly 20,000 km away, spread across the sky above `receiver`
fn constellation(receiver: &Vector3<f64>) -> Vec<Vector3<f64>> {
    let up = receiver.normalize();
    let east = Vector3::z().cross(&up).normalize();
    let north = up.cross(&east);
    [
        up,
        up + east * 0.8,
        up + north * 0.8,
        up - (east + north) * 0.6,
        up + east * 0.5 - north * 0.7,
    ]
    .iter()
    .map(|direction| receiver + direction.normalize() * 2.0e7)
    .collect()
}

/// Specific force measured by a stationary IMU whose body axes are aligned with ECEF
fn stationary_accel(position: &Vector3<f64>) -> Vector3<f32> {
    gravity_ecef(position, STANDARD_GRAVITY)
}

#[test]
fn zero_motion_hold() {
    init_logger();
    let truth = geodetic_to_ecef(39.95, -75.16, 20.0);
    let mut filter = PseudorangeInsFilter::new();
    filter.init_position(truth, &Vector3::repeat(25.0)).unwrap();
    filter
        .init_velocity(Vector3::zeros(), &Vector3::repeat(0.01))
        .unwrap();

    let accel = stationary_accel(&truth);
    let mut inertial_trace = filter.cov().trace();
    let mut position_trace = filter.pt_cov().trace();
    for _ in 0..1000 {
        filter.predict(&Vector3::zeros(), &accel, 0.01).unwrap();
        // rounding may shave an ulp off an otherwise unchanged trace
        assert!(filter.cov().trace() >= inertial_trace * (1.0 - 1e-6));
        assert!(filter.pt_cov().trace() >= position_trace);
        inertial_trace = filter.cov().trace();
        position_trace = filter.pt_cov().trace();
    }

    assert!(filter.state().velocity.norm() < 1e-2);
    assert!((filter.state().position - truth).norm() < 0.1);
    assert!(filter.invariants_met());
}

#[test]
fn single_vector_fix_from_large_error() {
    init_logger();
    let truth = Quaternion::identity();
    let reference = Vector3::new(0.0, 0.0, 1.0f32);
    let mut filter = PseudorangeInsFilter::new();
    let start = exp_map(&Vector3::new(std::f64::consts::FRAC_PI_2, 0.0, 0.0));
    filter.init_attitude(start, &nalgebra::Matrix3::identity()).unwrap();

    let before = angular_distance(&filter.state().orientation, &truth);
    filter.obs_vector(&reference, &reference, 1e-4).unwrap();
    let after = angular_distance(&filter.state().orientation, &truth);
    assert!(after < 0.5 * before, "before {before}, after {after}");
    assert!(filter.invariants_met());
}

#[test]
fn four_satellite_pseudorange_batch() {
    init_logger();
    let truth = Vector3::new(EQUATORIAL_RADIUS + 30.0, -20.0, 10.0);
    let clock_bias = 0.5e-6 * SPEED_OF_LIGHT;
    let mut filter = PseudorangeInsFilter::new();
    filter
        .init_position(Vector3::new(EQUATORIAL_RADIUS, 0.0, 0.0), &Vector3::repeat(1.0e4))
        .unwrap();
    let prior = *filter.pt_cov();

    let satellites = constellation(&Vector3::new(EQUATORIAL_RADIUS, 0.0, 0.0));
    let mut accumulator = PositionClockAccumulator::default();
    for satellite in satellites.iter().take(4) {
        let pseudorange = (satellite - truth).norm() + clock_bias;
        filter
            .obs_gps_pseudorange(&mut accumulator, satellite, pseudorange, 1.0)
            .unwrap();
    }
    assert_eq!(accumulator.count, 4);
    filter.apply_pseudorange_batch(accumulator).unwrap();

    let error = (filter.state().position - truth).norm();
    assert!(error <= 5.0, "position error {error} m");
    for k in 0..4 {
        assert!(filter.pt_cov()[(k, k)] < prior[(k, k)]);
    }
}

#[test]
fn pseudorange_consistency_monte_carlo() {
    init_logger();
    let truth_position = geodetic_to_ecef(47.6, -122.3, 150.0);
    let satellites = constellation(&truth_position);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let position_sigma = 100.0;
    let range_sigma = 3.0;
    let position_noise = Normal::new(0.0, position_sigma).unwrap();
    let range_noise = Normal::new(0.0, range_sigma).unwrap();
    let clock_noise = Normal::new(0.0, FilterConfig::default().initial.clock_bias_rms as f64).unwrap();

    let runs = 50;
    let mut total = 0.0;
    for _ in 0..runs {
        let truth = NavState {
            position: truth_position,
            clock_bias: clock_noise.sample(&mut rng),
            ..NavState::default()
        };
        let guess = truth_position
            + Vector3::from_fn(|_, _| position_noise.sample(&mut rng));
        let mut filter = PseudorangeInsFilter::new();
        filter
            .init_position(guess, &Vector3::repeat((position_sigma * position_sigma) as f32))
            .unwrap();

        let observations = satellites
            .iter()
            .map(|satellite| PseudorangeObservation {
                satellite_position: *satellite,
                pseudorange: (satellite - truth.position).norm()
                    + truth.clock_bias
                    + range_noise.sample(&mut rng),
                variance: (range_sigma * range_sigma) as f32,
            })
            .collect();
        filter
            .process(&Event::Pseudoranges {
                observations,
                elapsed_s: 0.0,
            })
            .unwrap();

        let distance = filter.mahalanobis_distance(&truth).unwrap();
        total += (distance * distance) as f64;
    }

    // only position and clock carry an error, so d² is chi-squared with 4 degrees of freedom
    let mean = total / runs as f64;
    assert!(mean > 2.0 && mean < 6.5, "mean squared distance {mean}");
}

#[test]
fn configured_filter_replays_recorded_session() {
    init_logger();
    let mut config = FilterConfig::default();
    config.initial.clock_bias_rms = 1000.0;
    config.process_noise.clock_stability = 4.0;
    let config_file = NamedTempFile::with_suffix(".toml").unwrap();
    config.to_file(config_file.path()).unwrap();
    let loaded = FilterConfig::from_file(config_file.path()).unwrap();
    assert_eq!(loaded, config);

    let truth = geodetic_to_ecef(-33.9, 18.4, 10.0);
    let satellites = constellation(&truth);
    let accel = stationary_accel(&truth);
    let mut events = Vec::new();
    for step in 1..=100 {
        let elapsed_s = step as f64 * 0.01;
        events.push(Event::Imu {
            dt_s: 0.01,
            gyro: Vector3::zeros(),
            accel,
            elapsed_s,
        });
        if step % 50 == 0 {
            events.push(Event::Pseudoranges {
                observations: satellites
                    .iter()
                    .map(|satellite| PseudorangeObservation {
                        satellite_position: *satellite,
                        pseudorange: (satellite - truth).norm() + 250.0,
                        variance: 4.0,
                    })
                    .collect(),
                elapsed_s,
            });
        }
    }
    let stream = EventStream { events };
    let stream_file = NamedTempFile::with_suffix(".json").unwrap();
    stream.to_json(stream_file.path()).unwrap();
    let recorded = EventStream::from_json(stream_file.path()).unwrap();
    assert!(recorded.is_time_ordered());

    let mut filter = PseudorangeInsFilter::with_config(loaded).unwrap();
    filter
        .init_position(truth + Vector3::new(40.0, -30.0, 20.0), &Vector3::repeat(2500.0))
        .unwrap();
    assert_eq!(recorded.replay(&mut filter).unwrap(), 102);

    assert!((filter.state().position - truth).norm() < 5.0);
    assert!((filter.state().clock_bias - 250.0).abs() < 10.0);
    assert!(filter.invariants_met());
}
