//! Sensor Supervisor Task (spec.md §4.3, ~15% of core).
//!
//! Single consumer of a bounded event queue, grounded on
//! `original_source/src/sensing/sensors.c`'s `sensors_task`/`sensors_init`/
//! `sensors_setHome`. The private-inbox-owned-by-one-task shape is the same
//! one `backend-rust/src/uwb_hub.rs::start_uwb_hub` uses for its UDP
//! listener: one `tokio::spawn`ed loop, one `mpsc::Receiver`, no lock on the
//! state it mutates.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::config::{FusionConfig, SensorTaskConfig};
use crate::error::DriverError;
use crate::fusion::{AxisFuser, AxisId, MeasurementKind};

/// Payload union of a `MeasurementEvent` (spec.md §3: "a 3-vector or a
/// quaternion or a scalar distance").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementPayload {
    Scalar(f64),
    Vector3 { x: f64, y: f64, z: f64 },
    Quaternion { i: f64, j: f64, k: f64, real: f64 },
}

/// Tagged measurement produced by a driver, timestamped with a monotonic
/// microsecond clock (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementEvent {
    pub kind: MeasurementKind,
    pub timestamp: i64,
    pub accuracy: f32,
    pub payload: MeasurementPayload,
}

/// Collaborator interface the supervisor calls at `init`/`set_home` time.
/// Driver internals (IMU/ultrasonic/GNSS/barometer wire protocols) are out
/// of scope (spec.md §1) — this is the seam the supervisor needs something
/// concrete on, the same shape the teacher injects `AuditLogger`/`AuthEngine`
/// collaborators into its tasks.
pub trait SensorDriver: Send {
    fn name(&self) -> &'static str;
    fn init(&mut self) -> Result<(), DriverError>;
    fn set_home(&mut self);
}

/// A driver backing the test suite and the "no hardware attached" default —
/// mirrors `uwb_hub.rs`'s non-fatal "could not bind UDP ... no hardware
/// connected — ignoring" posture for absent peripherals.
pub struct NullDriver {
    name: &'static str,
}

impl NullDriver {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl SensorDriver for NullDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_home(&mut self) {}
}

enum SensorCommand {
    Measurement(MeasurementEvent),
    SetHome(oneshot::Sender<()>),
}

/// Non-GNSS-derived sensor kinds monitored for timeout. Supplemented from
/// `original_source`'s `for (i = 0; i < SENSORS_POSITION; ++i)` loop bound,
/// which only walks the enum values preceding POSITION/GROUNDSPEED — GNSS
/// silence is not itself a timeout condition.
const NON_GNSS_KINDS: [MeasurementKind; 4] = [
    MeasurementKind::Acceleration,
    MeasurementKind::Orientation,
    MeasurementKind::Altimeter,
    MeasurementKind::Ultrasonic,
];

/// Handle producers use to submit measurements and (rarely) request a home
/// reset. Cheap to clone — every clone shares the same bounded inbox.
#[derive(Clone)]
pub struct SensorSupervisorHandle {
    tx: mpsc::Sender<SensorCommand>,
}

impl SensorSupervisorHandle {
    /// Zero-timeout enqueue; drops the event on a full queue (§4.3/§7
    /// "transient producer drop" — the heartbeat/timeout diagnostics recover
    /// liveness, so a dropped reading is not escalated).
    pub fn try_submit(&self, event: MeasurementEvent) {
        if self.tx.try_send(SensorCommand::Measurement(event)).is_err() {
            trace!(?event, "sensor queue full, dropping measurement");
        }
    }

    /// Tares every driver and resets all three fusers. Does not drain the
    /// queue: events already enqueued ahead of this call still process
    /// against the old baseline, and everything behind it against the new
    /// one, exactly the ordering guarantee spec.md §4.3 describes.
    pub async fn set_home(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SensorCommand::SetHome(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Brings up every driver, builds the three axis fusers, and spawns the
/// supervisor task. Driver init failures are reported (logged, collected)
/// rather than aborting startup — §4.3 "driver initialization errors are
/// reported by return", mirroring `sensors_init`'s OR-of-failures `bool`
/// return that still installs the task regardless.
pub fn spawn(
    mut drivers: Vec<Box<dyn SensorDriver>>,
    task_cfg: SensorTaskConfig,
    fusion_cfg: FusionConfig,
) -> (SensorSupervisorHandle, tokio::task::JoinHandle<()>, Vec<DriverError>) {
    let mut errors = Vec::new();
    for driver in &mut drivers {
        if let Err(err) = driver.init() {
            error!(driver = driver.name(), %err, "driver init failed");
            errors.push(err);
        }
    }

    let (tx, rx) = mpsc::channel(task_cfg.queue_capacity);
    let handle = SensorSupervisorHandle { tx: tx.clone() };
    let join = tokio::spawn(run(rx, tx, drivers, task_cfg, fusion_cfg));
    (handle, join, errors)
}

async fn run(
    mut inbox: mpsc::Receiver<SensorCommand>,
    self_tx: mpsc::Sender<SensorCommand>,
    mut drivers: Vec<Box<dyn SensorDriver>>,
    config: SensorTaskConfig,
    fusion_cfg: FusionConfig,
) {
    let mut z = AxisFuser::new(
        AxisId::Z,
        fusion_cfg.z,
        vec![
            fusion_cfg.var_ultrasonic,
            fusion_cfg.var_barometer,
            fusion_cfg.var_gnss_altitude,
        ],
    );
    let mut y = AxisFuser::new(
        AxisId::Y,
        fusion_cfg.y,
        vec![fusion_cfg.var_gnss_lat, fusion_cfg.var_gnss_groundspeed],
    );
    let mut x = AxisFuser::new(AxisId::X, fusion_cfg.x, vec![fusion_cfg.var_gnss_lon]);
    let mut last_seen: HashMap<MeasurementKind, i64> = HashMap::new();

    loop {
        match tokio::time::timeout(config.wake_period, inbox.recv()).await {
            Ok(Some(SensorCommand::Measurement(event))) => {
                dispatch(&mut z, &mut y, &mut x, &event);
                last_seen.insert(event.kind, event.timestamp);

                if self_tx.capacity() <= 1 {
                    while inbox.try_recv().is_ok() {}
                    warn!("sensor queue reset!");
                }

                let threshold = event.timestamp - config.sensor_timeout.as_micros() as i64;
                for kind in NON_GNSS_KINDS {
                    let seen = last_seen.get(&kind).copied().unwrap_or(0);
                    if seen < threshold {
                        warn!(?kind, "timeout of sensor");
                    }
                }
            }
            Ok(Some(SensorCommand::SetHome(ack))) => {
                for driver in &mut drivers {
                    driver.set_home();
                }
                z.reset();
                y.reset();
                x.reset();
                let _ = ack.send(());
            }
            Ok(None) => break,
            Err(_) => debug!("sensors online"),
        }
    }
}

/// Routes one measurement event to the axis fusers it affects (spec.md §4.3
/// point 1). ACCELERATION and POSITION are world-frame vectors fused on all
/// three axes; GROUNDSPEED is a 2-vector fused on X/Y only; ULTRASONIC and
/// ALTIMETER are Z-only scalars; ORIENTATION is never fused (§9 open
/// question — no world-frame rotation is specified for it).
fn dispatch(z: &mut AxisFuser, y: &mut AxisFuser, x: &mut AxisFuser, event: &MeasurementEvent) {
    match (event.kind, event.payload) {
        (MeasurementKind::Acceleration, MeasurementPayload::Vector3 { x: ax, y: ay, z: az }) => {
            let _ = x.predict(ax, event.timestamp);
            let _ = y.predict(ay, event.timestamp);
            let _ = z.predict(az, event.timestamp);
        }
        (MeasurementKind::Orientation, _) => {
            trace!("orientation event received, not fused");
        }
        (MeasurementKind::Ultrasonic, MeasurementPayload::Scalar(distance)) => {
            let _ = z.correct(MeasurementKind::Ultrasonic, distance);
        }
        (MeasurementKind::Altimeter, MeasurementPayload::Scalar(distance)) => {
            let _ = z.correct(MeasurementKind::Altimeter, distance);
        }
        (MeasurementKind::Position, MeasurementPayload::Vector3 { x: px, y: py, z: pz }) => {
            let _ = x.correct(MeasurementKind::Position, px);
            let _ = y.correct(MeasurementKind::Position, py);
            let _ = z.correct(MeasurementKind::Position, pz);
        }
        (MeasurementKind::GroundSpeed, MeasurementPayload::Vector3 { x: sx, y: sy, .. }) => {
            let _ = x.correct(MeasurementKind::GroundSpeed, sx);
            let _ = y.correct(MeasurementKind::GroundSpeed, sy);
        }
        (kind, payload) => {
            trace!(?kind, ?payload, "measurement payload shape mismatch, ignoring");
        }
    }
}
