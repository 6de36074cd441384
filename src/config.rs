//! Compile-time tuning constants, overridable via environment variables.
//!
//! Mirrors the `env::var(..).ok().and_then(|v| v.parse().ok()).unwrap_or(default)`
//! idiom used for `UwbHubConfig` in the teacher's `uwb_hub.rs` — every constant
//! named in spec.md §6 gets a default plus an env override so tuning doesn't
//! require a rebuild.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Per-axis fusion tuning (process noise floor, measurement variances, velocity limit).
#[derive(Debug, Clone, Copy)]
pub struct AxisTuning {
    pub q_base: f64,
    pub vel_limit: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub z: AxisTuning,
    pub y: AxisTuning,
    pub x: AxisTuning,

    pub var_ultrasonic: f64,
    pub var_barometer: f64,
    pub var_gnss_altitude: f64,
    pub var_gnss_lat: f64,
    pub var_gnss_groundspeed: f64,
    pub var_gnss_lon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            z: AxisTuning {
                q_base: env_or("QUADRO2_Z_Q_BASE", 0.01),
                vel_limit: env_or("QUADRO2_Z_VEL_LIMIT", 5.0),
            },
            y: AxisTuning {
                q_base: env_or("QUADRO2_Y_Q_BASE", 0.05),
                vel_limit: env_or("QUADRO2_Y_VEL_LIMIT", 15.0),
            },
            x: AxisTuning {
                q_base: env_or("QUADRO2_X_Q_BASE", 0.05),
                vel_limit: env_or("QUADRO2_X_VEL_LIMIT", 15.0),
            },
            var_ultrasonic: env_or("QUADRO2_VAR_ULTRASONIC", 0.02),
            var_barometer: env_or("QUADRO2_VAR_BAROMETER", 0.5),
            var_gnss_altitude: env_or("QUADRO2_VAR_GNSS_ALT", 2.0),
            var_gnss_lat: env_or("QUADRO2_VAR_GNSS_LAT", 1.5),
            var_gnss_groundspeed: env_or("QUADRO2_VAR_GNSS_SPEED", 0.3),
            var_gnss_lon: env_or("QUADRO2_VAR_GNSS_LON", 1.5),
        }
    }
}

/// Sensor Supervisor Task configuration (§4.3, §6).
#[derive(Debug, Clone, Copy)]
pub struct SensorTaskConfig {
    pub queue_capacity: usize,
    pub wake_period: Duration,
    pub sensor_timeout: Duration,
}

impl Default for SensorTaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: env_or("QUADRO2_SENSOR_QUEUE_CAP", 16),
            wake_period: Duration::from_secs(env_or("QUADRO2_SENSOR_WAKE_SECS", 5)),
            sensor_timeout: Duration::from_millis(env_or("QUADRO2_SENSOR_TIMEOUT_MS", 2000)),
        }
    }
}

/// Remote Task configuration (§4.4, §6).
#[derive(Debug, Clone, Copy)]
pub struct RemoteTaskConfig {
    pub queue_capacity: usize,
    pub heartbeat_window: Duration,
    pub message_cap: usize,
    pub asset_chunk_size: usize,
}

impl Default for RemoteTaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: env_or("QUADRO2_REMOTE_QUEUE_CAP", 32),
            heartbeat_window: Duration::from_millis(env_or("QUADRO2_HEARTBEAT_MS", 500)),
            message_cap: env_or("QUADRO2_MESSAGE_CAP", 128),
            asset_chunk_size: env_or("QUADRO2_ASSET_CHUNK", 1024),
        }
    }
}
