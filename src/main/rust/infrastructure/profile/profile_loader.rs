use std::path::Path;

use serde_yaml::Value;
use tracing::{info, warn};

use super::presets::DevicePreset;
use crate::domain::entities::DeviceProfile;
use crate::domain::errors::{DomainError, Result};
use crate::domain::value_objects::QualityOfDelivery;

const PROFILE_KEYS: [&str; 3] = ["commands", "telemetry", "notifications"];

/// Load the device profile from `path`.
///
/// A file with `commands`/`telemetry`/`notifications` keys is a full
/// profile. Any other mapping is read as EdgeDevice instructions
/// (`<name>: { protocolPropertyList: {...} }`) layered onto `preset`.
/// A missing file yields the preset unchanged.
pub fn load_profile(path: &Path, preset: DevicePreset) -> Result<DeviceProfile> {
    let profile = match std::fs::read_to_string(path) {
        Ok(text) => parse_profile(&text, preset)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), preset = %preset, "No instruction file, using preset");
            preset.profile()
        }
        Err(e) => {
            return Err(DomainError::InvalidProfile(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    profile.validate()?;
    info!(
        commands = profile.commands.len(),
        telemetry = profile.telemetry.len(),
        notifications = profile.notifications.len(),
        "Device profile loaded"
    );
    Ok(profile)
}

pub fn parse_profile(text: &str, preset: DevicePreset) -> Result<DeviceProfile> {
    let document: Value =
        serde_yaml::from_str(text).map_err(|e| DomainError::InvalidProfile(e.to_string()))?;

    let Value::Mapping(mapping) = &document else {
        if document.is_null() {
            return Ok(preset.profile());
        }
        return Err(DomainError::InvalidProfile(
            "instruction file must be a mapping".to_string(),
        ));
    };

    let is_full_profile = mapping
        .keys()
        .filter_map(Value::as_str)
        .any(|key| PROFILE_KEYS.contains(&key));

    if is_full_profile {
        return serde_yaml::from_value(document.clone())
            .map_err(|e| DomainError::InvalidProfile(e.to_string()));
    }

    let mut profile = preset.profile();
    apply_instructions(&mut profile, &document)?;
    Ok(profile)
}

/// Apply `topic`/`qos` overrides from instruction entries. Entries are
/// matched by command name first, then by the command's current topic.
pub fn apply_instructions(profile: &mut DeviceProfile, instructions: &Value) -> Result<()> {
    let Value::Mapping(entries) = instructions else {
        return Ok(());
    };

    for (name, entry) in entries {
        let Some(name) = name.as_str() else { continue };
        let Some(properties) = entry.get("protocolPropertyList") else {
            continue;
        };

        let kind = if profile.commands.contains_key(name) {
            Some(name.to_string())
        } else {
            profile
                .commands
                .iter()
                .find(|(_, route)| route.topic == name)
                .map(|(kind, _)| kind.clone())
        };
        let Some(kind) = kind else {
            warn!(instruction = %name, "Instruction matches no command, ignoring");
            continue;
        };
        let Some(route) = profile.commands.get_mut(&kind) else {
            continue;
        };

        if let Some(topic) = property_str(properties, "topic") {
            route.topic = topic;
        }
        if let Some(level) = property_str(properties, "qos") {
            let level: u8 = level.parse().map_err(|_| {
                DomainError::InvalidProfile(format!("instruction '{}' has invalid qos", name))
            })?;
            route.qos = QualityOfDelivery::try_from(level)?;
        }
    }
    Ok(())
}

/// Instruction properties are strings in the ConfigMap but may be written
/// as bare YAML scalars
fn property_str(properties: &Value, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
