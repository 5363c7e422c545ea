use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::domain::entities::{DeviceProfile, NotificationBinding, TelemetryBinding};
use crate::domain::value_objects::{
    CommandRoute, FieldKind, FieldSpec, PayloadFormat, QualityOfDelivery,
};

/// Built-in profiles used when no instruction file is mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreset {
    /// USB camera behind an MQTT broker
    Camera,
    /// ROS mobile robot behind rosbridge
    MobileRobot,
}

impl DevicePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::MobileRobot => "mobile-robot",
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        match self {
            Self::Camera => camera(),
            Self::MobileRobot => mobile_robot(),
        }
    }
}

impl fmt::Display for DevicePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DevicePreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "camera" => Ok(Self::Camera),
            "mobile-robot" | "robot" => Ok(Self::MobileRobot),
            other => Err(format!("unknown device preset '{}'", other)),
        }
    }
}

fn telemetry(channel: &str, topic: &str, qos: QualityOfDelivery, drop: &[&str]) -> TelemetryBinding {
    TelemetryBinding {
        channel: channel.to_string(),
        topic: topic.to_string(),
        qos,
        drop_fields: drop.iter().map(|f| f.to_string()).collect(),
    }
}

fn camera() -> DeviceProfile {
    let qos = QualityOfDelivery::AtLeastOnce;
    let mut profile = DeviceProfile::default();

    profile.commands.insert(
        "start_capture".to_string(),
        CommandRoute::new("device/commands/start_capture", qos, PayloadFormat::Flat),
    );
    profile.commands.insert(
        "stop_capture".to_string(),
        CommandRoute::new("device/commands/stop_capture", qos, PayloadFormat::Flat),
    );
    profile.commands.insert(
        "adjust_resolution".to_string(),
        CommandRoute::new("device/commands/adjust_resolution", qos, PayloadFormat::Flat)
            .with_field(FieldSpec::required("width", FieldKind::Integer))
            .with_field(FieldSpec::required("height", FieldKind::Integer)),
    );
    profile.commands.insert(
        "adjust_brightness".to_string(),
        CommandRoute::new("device/commands/adjust_brightness", qos, PayloadFormat::Flat)
            .with_field(FieldSpec::required("brightness", FieldKind::Integer)),
    );
    profile.commands.insert(
        "adjust_contrast".to_string(),
        CommandRoute::new("device/commands/adjust_contrast", qos, PayloadFormat::Flat)
            .with_field(FieldSpec::required("contrast", FieldKind::Integer)),
    );

    // frames and samples are too large to hold; keep their metadata
    profile.telemetry = vec![
        telemetry("video", "device/telemetry/video_stream", qos, &["video_frame", "data"]),
        telemetry("audio", "device/telemetry/audio_stream", qos, &["audio_data", "data"]),
    ];
    profile.notifications = vec![NotificationBinding {
        event: "camera_status".to_string(),
        topic: "device/status/#".to_string(),
        qos,
    }];
    profile
}

fn mobile_robot() -> DeviceProfile {
    let qos = QualityOfDelivery::AtMostOnce;
    let mut profile = DeviceProfile::default();

    profile.commands.insert(
        "move".to_string(),
        CommandRoute::new("/cmd_vel", QualityOfDelivery::AtLeastOnce, PayloadFormat::Twist)
            .with_field(FieldSpec::required("linear", FieldKind::Number))
            .with_field(FieldSpec::required("angular", FieldKind::Number)),
    );
    profile.commands.insert(
        "nav".to_string(),
        CommandRoute::new("/nav_cmd", QualityOfDelivery::AtLeastOnce, PayloadFormat::String)
            .with_field(FieldSpec::required("points", FieldKind::Array))
            .with_field(FieldSpec::defaulted(
                "algorithm",
                FieldKind::String,
                Value::from("dijkstra"),
            )),
    );

    profile.telemetry = vec![
        telemetry("battery", "/battery", qos, &[]),
        telemetry("odom", "/odom", qos, &[]),
        telemetry("imu", "/imu", qos, &[]),
        telemetry("lidar", "/scan", qos, &["ranges", "intensities"]),
        telemetry("camera", "/camera/rgb/image_raw", qos, &["data"]),
    ];
    profile
}
