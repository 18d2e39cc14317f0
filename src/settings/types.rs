use serde::{Deserialize, Serialize};

/// Pipeline configuration, read from a JSON file.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Device id passed to `CameraSession::initialize`.
    pub device_id: u32,
    /// Default `env_logger` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Interval between simulated frames when running against the mock sensor.
    pub render_interval_ms: u64,
    /// Number of frames to acquire before the demo shuts down.
    pub frames: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            device_id: 0,
            log_level: "info".to_string(),
            render_interval_ms: 33,
            frames: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.device_id, 0);
        assert_eq!(settings.log_level, "info");
        assert!(settings.frames > 0);
    }

    #[test]
    fn serialises_to_camelcase() {
        let json = serde_json::to_value(PipelineSettings::default()).unwrap();
        assert_eq!(json["deviceId"], 0);
        assert_eq!(json["renderIntervalMs"], 33);
        assert_eq!(json["logLevel"], "info");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: PipelineSettings = serde_json::from_str(r#"{"deviceId": 3}"#).unwrap();
        assert_eq!(settings.device_id, 3);
        assert_eq!(settings.frames, PipelineSettings::default().frames);
    }

    #[test]
    fn empty_object_is_default() {
        let settings: PipelineSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, PipelineSettings::default());
    }
}
