//! Synthetic multi-sensor stream generator driving the fusion pipeline
//! end-to-end, for manual convergence checks outside the unit test suite.
//!
//! Grounded on `packages/uwb-simulator/src/uwb_physics.rs`'s
//! `generate_epoch`: Gaussian-noised synthetic measurements built with
//! `rand`/`rand_distr`, generated on a fixed tick and fed through the real
//! production pipeline rather than asserted against analytically.

use rand::thread_rng;
use rand_distr::{Distribution, Normal};

use quadro2::config::{FusionConfig, SensorTaskConfig};
use quadro2::sensors::{spawn, MeasurementEvent, MeasurementPayload, NullDriver, SensorDriver};
use quadro2::fusion::MeasurementKind;

/// A quadrotor climbing at a constant rate with a noisy IMU and a noisy
/// ultrasonic/GNSS-altitude pair, so Z-axis convergence can be eyeballed.
struct Truth {
    altitude: f64,
    climb_rate: f64,
    t: i64,
}

impl Truth {
    fn step(&mut self, dt_micros: i64) {
        self.t += dt_micros;
        self.altitude += self.climb_rate * (dt_micros as f64 / 1_000_000.0);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let drivers: Vec<Box<dyn SensorDriver>> = vec![Box::new(NullDriver::new("harness"))];
    let (handle, _join, errors) =
        spawn(drivers, SensorTaskConfig::default(), FusionConfig::default());
    for err in errors {
        tracing::warn!(%err, "driver init failed in harness");
    }

    let mut rng = thread_rng();
    let accel_noise = Normal::new(0.0, 0.05).unwrap();
    let ultrasonic_noise = Normal::new(0.0, 0.02).unwrap();
    let gnss_noise = Normal::new(0.0, 1.5).unwrap();

    let mut truth = Truth { altitude: 0.0, climb_rate: 0.5, t: 0 };
    let dt_micros = 10_000; // 100 Hz IMU tick

    for tick in 0..2000 {
        truth.step(dt_micros);

        handle.try_submit(MeasurementEvent {
            kind: MeasurementKind::Acceleration,
            timestamp: truth.t,
            accuracy: 1.0,
            payload: MeasurementPayload::Vector3 {
                x: 0.0,
                y: 0.0,
                z: accel_noise.sample(&mut rng),
            },
        });

        // Ultrasonic at 20 Hz, only while low enough to reflect.
        if tick % 5 == 0 && truth.altitude < 6.0 {
            handle.try_submit(MeasurementEvent {
                kind: MeasurementKind::Ultrasonic,
                timestamp: truth.t,
                accuracy: 1.0,
                payload: MeasurementPayload::Scalar(truth.altitude + ultrasonic_noise.sample(&mut rng)),
            });
        }

        // GNSS altitude fix at 5 Hz.
        if tick % 20 == 0 {
            handle.try_submit(MeasurementEvent {
                kind: MeasurementKind::Position,
                timestamp: truth.t,
                accuracy: 1.0,
                payload: MeasurementPayload::Vector3 {
                    x: 0.0,
                    y: 0.0,
                    z: truth.altitude + gnss_noise.sample(&mut rng),
                },
            });
        }

        if tick % 100 == 0 {
            tracing::info!(tick, truth_alt = truth.altitude, "harness tick");
        }
    }

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    tracing::info!("harness run complete");
}
