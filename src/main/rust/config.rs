use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::application::services::ManagerSettings;
use crate::domain::value_objects::BackoffPolicy;
use crate::infrastructure::control_plane::ControlPlaneSettings;
use crate::infrastructure::mqtt::{MqttSettings, DEFAULT_MQTT_PORT};
use crate::infrastructure::profile::DevicePreset;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    Mqtt,
    Rosbridge,
    /// In-memory bridge that accepts everything
    Sim,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetArg {
    Camera,
    MobileRobot,
}

impl From<PresetArg> for DevicePreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Camera => DevicePreset::Camera,
            PresetArg::MobileRobot => DevicePreset::MobileRobot,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "device-shim",
    version = "0.1.0",
    about = "Device shim with buffered bridge reconnection and phase reconciliation"
)]
pub struct Config {
    /// Bridge protocol used to reach the device
    #[arg(long, env = "BRIDGE_KIND", value_enum, default_value = "mqtt")]
    pub bridge: BridgeKind,

    /// MQTT broker as host[:port]; falls back to the EdgeDevice address
    #[arg(long, env = "MQTT_BROKER_ADDRESS")]
    pub mqtt_broker_address: Option<String>,

    #[arg(long, env = "MQTT_CLIENT_ID")]
    pub mqtt_client_id: Option<String>,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT keep-alive in seconds
    #[arg(long, env = "MQTT_KEEPALIVE", default_value = "60")]
    pub mqtt_keepalive: u64,

    /// rosbridge WebSocket URL; falls back to the EdgeDevice address
    #[arg(long, env = "ROSBRIDGE_URL")]
    pub rosbridge_url: Option<String>,

    #[arg(long, env = "EDGEDEVICE_NAME")]
    pub edgedevice_name: Option<String>,

    #[arg(long, env = "EDGEDEVICE_NAMESPACE")]
    pub edgedevice_namespace: Option<String>,

    #[arg(long, env = "KUBERNETES_SERVICE_HOST", default_value = "kubernetes.default.svc")]
    pub kubernetes_host: String,

    #[arg(long, env = "KUBERNETES_SERVICE_PORT", default_value = "443")]
    pub kubernetes_port: u16,

    #[arg(long, env = "SERVICE_ACCOUNT_TOKEN_PATH", default_value_t = format!("{}/token", SERVICE_ACCOUNT_DIR))]
    pub token_path: String,

    #[arg(long, env = "SERVICE_ACCOUNT_CA_PATH", default_value_t = format!("{}/ca.crt", SERVICE_ACCOUNT_DIR))]
    pub ca_path: String,

    /// Device profile or EdgeDevice instruction file
    #[arg(
        long,
        env = "INSTRUCTIONS_PATH",
        default_value = "/etc/edgedevice/config/instructions"
    )]
    pub instructions_path: PathBuf,

    /// Built-in profile used when the instruction file is absent
    #[arg(long, env = "DEVICE_PROFILE", value_enum, default_value = "camera")]
    pub profile: PresetArg,

    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub server_host: IpAddr,

    #[arg(long, env = "SERVER_PORT", default_value = "8080")]
    pub server_port: u16,

    /// Seconds between health reconciliation ticks
    #[arg(long, default_value = "5")]
    pub reconcile_interval: u64,

    /// Seconds allowed for one phase report
    #[arg(long, default_value = "3")]
    pub report_timeout: u64,

    /// Milliseconds to wait for a bridge acknowledgement
    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value = "5000")]
    pub publish_timeout_ms: u64,

    /// Seconds allowed for establishing a bridge session
    #[arg(long, default_value = "10")]
    pub connect_timeout: u64,

    /// Initial reconnection delay in seconds
    #[arg(long, default_value = "1")]
    pub reconnect_initial_delay: u64,

    /// Maximum reconnection delay in seconds
    #[arg(long, default_value = "30")]
    pub reconnect_max_delay: u64,

    /// Reconnection backoff multiplier
    #[arg(long, default_value = "2.0")]
    pub reconnect_multiplier: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Minimum allowed port (ports below 1024 are privileged)
const MIN_USER_PORT: u16 = 1024;

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Self::validate_port(self.server_port, "server")?;

        if let Some(url) = &self.rosbridge_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                anyhow::bail!("rosbridge URL must start with ws:// or wss://");
            }
        }

        if self.edgedevice_name.is_some() != self.edgedevice_namespace.is_some() {
            anyhow::bail!("EDGEDEVICE_NAME and EDGEDEVICE_NAMESPACE must be set together");
        }

        if self.mqtt_password.is_some() && self.mqtt_username.is_none() {
            anyhow::bail!("MQTT password given without a username");
        }

        if self.reconcile_interval == 0 {
            anyhow::bail!("Reconcile interval cannot be 0");
        }

        if self.report_timeout == 0 || self.publish_timeout_ms == 0 || self.connect_timeout == 0 {
            anyhow::bail!("Timeouts cannot be 0");
        }

        if self.reconnect_multiplier <= 1.0 {
            anyhow::bail!("Reconnect multiplier must be > 1.0");
        }

        if self.reconnect_initial_delay == 0 {
            anyhow::bail!("Initial reconnection delay cannot be 0");
        }

        if self.reconnect_max_delay < self.reconnect_initial_delay {
            anyhow::bail!(
                "Maximum reconnection delay ({}) cannot be less than initial delay ({})",
                self.reconnect_max_delay,
                self.reconnect_initial_delay
            );
        }

        Ok(())
    }

    fn validate_port(port: u16, name: &str) -> anyhow::Result<()> {
        if port == 0 {
            anyhow::bail!("Invalid {} port: port cannot be 0", name);
        }
        if port < MIN_USER_PORT {
            anyhow::bail!(
                "Invalid {} port: {} is a privileged port (< {}). Use a port >= {}",
                name,
                port,
                MIN_USER_PORT,
                MIN_USER_PORT
            );
        }
        Ok(())
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_host, self.server_port)
    }

    pub fn preset(&self) -> DevicePreset {
        self.profile.into()
    }

    pub fn to_backoff_policy(&self) -> crate::domain::errors::Result<BackoffPolicy> {
        BackoffPolicy::new(
            Duration::from_secs(self.reconnect_initial_delay),
            Duration::from_secs(self.reconnect_max_delay),
            self.reconnect_multiplier,
        )
    }

    pub fn to_manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..ManagerSettings::default()
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout)
    }

    /// None when no EdgeDevice identity is configured
    pub fn to_control_plane_settings(&self) -> Option<ControlPlaneSettings> {
        let (name, namespace) = (self.edgedevice_name.as_ref()?, self.edgedevice_namespace.as_ref()?);
        Some(ControlPlaneSettings {
            api_host: self.kubernetes_host.clone(),
            api_port: self.kubernetes_port,
            namespace: namespace.clone(),
            device_name: name.clone(),
            token_path: PathBuf::from(&self.token_path),
            ca_path: PathBuf::from(&self.ca_path),
            request_timeout: self.report_timeout(),
        })
    }

    /// MQTT settings for `address`, applying credentials and client id
    pub fn to_mqtt_settings(&self, address: &str) -> crate::domain::errors::Result<MqttSettings> {
        let mut settings = MqttSettings::from_address(address)?;
        if let Some(client_id) = &self.mqtt_client_id {
            settings.client_id = client_id.clone();
        }
        settings.username = self.mqtt_username.clone();
        settings.password = self.mqtt_password.clone();
        settings.keep_alive = Duration::from_secs(self.mqtt_keepalive);
        Ok(settings)
    }

    /// Explicitly configured bridge address for the selected bridge kind
    pub fn bridge_address(&self) -> Option<String> {
        match self.bridge {
            BridgeKind::Mqtt => self.mqtt_broker_address.clone(),
            BridgeKind::Rosbridge => self.rosbridge_url.clone(),
            BridgeKind::Sim => Some("simulated".to_string()),
        }
    }

    /// Fallback when neither an explicit address nor an EdgeDevice one exists
    pub fn default_bridge_address(&self) -> String {
        match self.bridge {
            BridgeKind::Mqtt => format!("localhost:{}", DEFAULT_MQTT_PORT),
            BridgeKind::Rosbridge => "ws://localhost:9090".to_string(),
            BridgeKind::Sim => "simulated".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["device-shim"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_validate() {
        let config = parse(&["--bridge", "sim"]);
        config.validate().unwrap();
        assert_eq!(config.server_addr().port(), 8080);
        assert_eq!(config.preset(), DevicePreset::Camera);
        assert_eq!(config.to_manager_settings().publish_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_rejects_privileged_port() {
        let config = parse(&["--bridge", "sim", "--server-port", "80"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_edgedevice_identity_needs_both_parts() {
        let config = parse(&["--bridge", "sim", "--edgedevice-name", "cam-1"]);
        assert!(config.validate().is_err());
        assert!(config.to_control_plane_settings().is_none());

        let config = parse(&[
            "--bridge",
            "sim",
            "--edgedevice-name",
            "cam-1",
            "--edgedevice-namespace",
            "devices",
        ]);
        config.validate().unwrap();
        let settings = config.to_control_plane_settings().unwrap();
        assert_eq!(settings.device_name, "cam-1");
        assert_eq!(settings.namespace, "devices");
    }

    #[test]
    fn test_rejects_non_websocket_rosbridge_url() {
        let config = parse(&["--bridge", "rosbridge", "--rosbridge-url", "http://robot:9090"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_flat_multiplier() {
        let config = parse(&["--bridge", "sim", "--reconnect-multiplier", "1.0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mqtt_settings_apply_credentials() {
        let config = parse(&[
            "--mqtt-username",
            "shim",
            "--mqtt-password",
            "secret",
            "--mqtt-client-id",
            "camera-7",
        ]);
        let settings = config.to_mqtt_settings("broker:1884").unwrap();
        assert_eq!(settings.port, 1884);
        assert_eq!(settings.client_id, "camera-7");
        assert_eq!(settings.username.as_deref(), Some("shim"));
    }
}
