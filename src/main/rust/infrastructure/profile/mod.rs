mod presets;
mod profile_loader;

pub use presets::DevicePreset;
pub use profile_loader::{apply_instructions, load_profile, parse_profile};
