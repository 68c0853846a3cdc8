use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedValue;
use zbus::Connection;

use crate::compositor::window::WindowType;
use crate::compositor::OPAQUE;
use crate::core::error::CompositorError;

const FRAME_SHADOW_TYPES: [WindowType; 5] = [
    WindowType::Normal,
    WindowType::Dialog,
    WindowType::Utility,
    WindowType::Toolbar,
    WindowType::Splash,
];

const POPUP_SHADOW_TYPES: [WindowType; 7] = [
    WindowType::Menu,
    WindowType::DropdownMenu,
    WindowType::PopupMenu,
    WindowType::Tooltip,
    WindowType::Combo,
    WindowType::Notification,
    WindowType::Dnd,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub shadow_radius: u32,
    pub shadow_offset_x: i32,
    pub shadow_offset_y: i32,
    pub shadow_opacity: f64,
    pub fade_in_step: f64,
    pub fade_out_step: f64,
    pub fade_delta_ms: u64,
    pub configure_delay_ms: u64,
    pub shadow_types: Vec<WindowType>,
    pub fade_types: Vec<WindowType>,
    /// Default opacity of dropdown and popup menus.
    pub menu_opacity: f64,
    /// Opacity of unfocused normal windows; `None` disables dimming.
    pub inactive_opacity: Option<f64>,
    /// Opacity of window decorations; `None` paints them like the body.
    pub frame_opacity: Option<f64>,
    pub fade_opacity_changes: bool,
    pub synchronous: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shadow_radius: 12,
            shadow_offset_x: -15,
            shadow_offset_y: -15,
            shadow_opacity: 0.75,
            fade_in_step: 0.028,
            fade_out_step: 0.03,
            fade_delta_ms: 10,
            configure_delay_ms: 2,
            shadow_types: Vec::new(),
            fade_types: Vec::new(),
            menu_opacity: 1.0,
            inactive_opacity: None,
            frame_opacity: None,
            fade_opacity_changes: false,
            synchronous: false,
        }
    }
}

impl Settings {
    pub fn load_file(path: &Path) -> Result<Self, CompositorError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| CompositorError::InvalidConfig {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn shadow_enabled(&self, window_type: WindowType) -> bool {
        window_type.is_known() && self.shadow_types.contains(&window_type)
    }

    pub fn fade_enabled(&self, window_type: WindowType) -> bool {
        window_type.is_known() && self.fade_types.contains(&window_type)
    }

    /// Opacity a window of this type has when nothing else says otherwise.
    pub fn type_opacity(&self, window_type: WindowType) -> u32 {
        match window_type {
            WindowType::DropdownMenu | WindowType::PopupMenu => to_opacity(self.menu_opacity),
            _ => OPAQUE,
        }
    }

    pub fn inactive_opacity_value(&self) -> Option<u32> {
        self.inactive_opacity.map(to_opacity)
    }

    pub fn fade_interval(&self) -> Duration {
        Duration::from_millis(self.fade_delta_ms)
    }

    pub fn configure_delay(&self) -> Duration {
        Duration::from_millis(self.configure_delay_ms)
    }

    /// Replace out-of-range values with usable ones.
    pub fn sanitize(&mut self) {
        if self.fade_delta_ms < 1 {
            self.fade_delta_ms = 10;
        }
        for step in [&mut self.fade_in_step, &mut self.fade_out_step] {
            if *step <= 0.0 || step.is_nan() {
                *step = 0.01;
            }
            *step = step.min(1.0);
        }
        self.shadow_opacity = self.shadow_opacity.clamp(0.0, 1.0);
        self.menu_opacity = self.menu_opacity.clamp(0.0, 1.0);
        self.inactive_opacity = clamp_optional(self.inactive_opacity);
        self.frame_opacity = clamp_optional(self.frame_opacity);
        self.shadow_types.retain(|t| t.is_known());
        self.fade_types.retain(|t| t.is_known());
    }

    /// Overlay the xfwm4 channel from Xfconf.
    pub fn apply_xfconf(&mut self, properties: &HashMap<String, XfconfValue>) {
        let flag = |key: &str| properties.get(key).and_then(XfconfValue::as_bool);
        let percent = |key: &str| properties.get(key).and_then(XfconfValue::as_f64).map(|v| v / 100.0);

        if let Some(enabled) = flag("/general/show_frame_shadow") {
            set_types(&mut self.shadow_types, &FRAME_SHADOW_TYPES, enabled);
        }
        if let Some(enabled) = flag("/general/show_popup_shadow") {
            set_types(&mut self.shadow_types, &POPUP_SHADOW_TYPES, enabled);
        }
        if let Some(enabled) = flag("/general/show_dock_shadow") {
            set_types(&mut self.shadow_types, &[WindowType::Dock], enabled);
        }
        if let Some(value) = percent("/general/shadow_opacity") {
            self.shadow_opacity = value;
        }
        if let Some(value) = percent("/general/popup_opacity") {
            self.menu_opacity = value;
        }
        if let Some(value) = percent("/general/frame_opacity") {
            self.frame_opacity = (value < 1.0).then_some(value);
        }
        if let Some(value) = percent("/general/inactive_opacity") {
            self.inactive_opacity = (value < 1.0).then_some(value);
        }
        if let Some(dx) = properties.get("/general/shadow_delta_x").and_then(XfconfValue::as_f64) {
            self.shadow_offset_x = dx as i32;
        }
        if let Some(dy) = properties.get("/general/shadow_delta_y").and_then(XfconfValue::as_f64) {
            self.shadow_offset_y = dy as i32;
        }
    }
}

pub fn to_opacity(fraction: f64) -> u32 {
    (fraction.clamp(0.0, 1.0) * f64::from(OPAQUE)) as u32
}

fn clamp_optional(value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v > 0.0 => Some(v.clamp(0.1, 1.0)),
        _ => None,
    }
}

fn set_types(types: &mut Vec<WindowType>, group: &[WindowType], enabled: bool) {
    types.retain(|t| !group.contains(t));
    if enabled {
        types.extend_from_slice(group);
    }
}

/// Command-line overrides, applied last.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SettingsOverrides {
    /// Blur radius for shadows
    #[arg(short = 'r', long)]
    pub shadow_radius: Option<u32>,

    /// Opacity of shadows (0.0 - 1.0)
    #[arg(short = 'o', long)]
    pub shadow_opacity: Option<f64>,

    /// Left offset for shadows
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    pub shadow_offset_x: Option<i32>,

    /// Top offset for shadows
    #[arg(short = 't', long, allow_negative_numbers = true)]
    pub shadow_offset_y: Option<i32>,

    /// Opacity change between steps while fading in
    #[arg(short = 'I', long)]
    pub fade_in_step: Option<f64>,

    /// Opacity change between steps while fading out
    #[arg(short = 'O', long)]
    pub fade_out_step: Option<f64>,

    /// Time between fade steps in milliseconds
    #[arg(short = 'D', long)]
    pub fade_delta: Option<u64>,

    /// Opacity of dropdown and popup menus (0.0 - 1.0)
    #[arg(short = 'm', long)]
    pub menu_opacity: Option<f64>,

    /// Draw shadows for every window type except the desktop
    #[arg(short = 'c', long)]
    pub shadows: bool,

    /// Avoid drawing shadows on dock and panel windows
    #[arg(short = 'C', long)]
    pub no_dock_shadow: bool,

    /// Fade windows in and out when mapping, unmapping and destroying
    #[arg(short = 'f', long)]
    pub fades: bool,

    /// Fade opacity changes
    #[arg(short = 'F', long)]
    pub fade_opacity_changes: bool,

    /// Opacity of inactive windows (0.1 - 1.0)
    #[arg(short = 'i', long)]
    pub inactive_opacity: Option<f64>,

    /// Opacity of window titlebars and borders (0.1 - 1.0)
    #[arg(short = 'e', long)]
    pub frame_opacity: Option<f64>,

    /// Synchronize with the server after every event batch (debugging)
    #[arg(short = 'S', long)]
    pub synchronous: bool,
}

impl SettingsOverrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(radius) = self.shadow_radius {
            settings.shadow_radius = radius;
        }
        if let Some(opacity) = self.shadow_opacity {
            settings.shadow_opacity = opacity;
        }
        if let Some(dx) = self.shadow_offset_x {
            settings.shadow_offset_x = dx;
        }
        if let Some(dy) = self.shadow_offset_y {
            settings.shadow_offset_y = dy;
        }
        if let Some(step) = self.fade_in_step {
            settings.fade_in_step = step;
        }
        if let Some(step) = self.fade_out_step {
            settings.fade_out_step = step;
        }
        if let Some(delta) = self.fade_delta {
            settings.fade_delta_ms = delta;
        }
        if let Some(opacity) = self.menu_opacity {
            settings.menu_opacity = opacity;
        }
        if self.shadows {
            settings.shadow_types = WindowType::KNOWN
                .into_iter()
                .filter(|t| *t != WindowType::Desktop)
                .collect();
        }
        if self.no_dock_shadow {
            settings.shadow_types.retain(|t| *t != WindowType::Dock);
        }
        if self.fades {
            settings.fade_types = WindowType::KNOWN.to_vec();
        }
        if self.fade_opacity_changes {
            settings.fade_opacity_changes = true;
        }
        if self.inactive_opacity.is_some() {
            settings.inactive_opacity = self.inactive_opacity;
        }
        if self.frame_opacity.is_some() {
            settings.frame_opacity = self.frame_opacity;
        }
        if self.synchronous {
            settings.synchronous = true;
        }
    }
}

/// A property value from Xfconf, detached from the D-Bus message.
#[derive(Debug, Clone, PartialEq)]
pub enum XfconfValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl XfconfValue {
    fn from_owned(value: &OwnedValue) -> Option<Self> {
        if let Ok(b) = value.downcast_ref::<bool>() {
            return Some(XfconfValue::Bool(b));
        }
        if let Ok(i) = value.downcast_ref::<i32>() {
            return Some(XfconfValue::Integer(i64::from(i)));
        }
        if let Ok(u) = value.downcast_ref::<u32>() {
            return Some(XfconfValue::Integer(i64::from(u)));
        }
        if let Ok(f) = value.downcast_ref::<f64>() {
            return Some(XfconfValue::Float(f));
        }
        if let Ok(s) = value.downcast_ref::<&str>() {
            return Some(XfconfValue::String(s.to_string()));
        }
        None
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            XfconfValue::Bool(b) => Some(*b),
            XfconfValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            XfconfValue::Integer(i) => Some(*i as f64),
            XfconfValue::Float(f) => Some(*f),
            XfconfValue::String(s) => s.parse().ok(),
            XfconfValue::Bool(_) => None,
        }
    }
}

pub struct SettingsManager {
    pub current: Settings,
}

impl SettingsManager {
    /// Defaults, then the config file, then Xfconf, then the command line.
    pub async fn new(config: Option<&Path>, use_xfconf: bool, overrides: &SettingsOverrides) -> Result<Self> {
        let mut manager = Self {
            current: Settings::default(),
        };

        if let Some(path) = config.map(Path::to_path_buf).or_else(default_config_path) {
            if path.exists() {
                manager.current = Settings::load_file(&path)?;
                info!("Loaded settings from {}", path.display());
            } else if config.is_some() {
                warn!("Config file {} does not exist, using defaults", path.display());
            }
        }

        if use_xfconf {
            if let Err(e) = manager.load_xfconf().await {
                warn!("Failed to load Xfconf settings, using defaults: {}", e);
            }
        }

        overrides.apply(&mut manager.current);
        manager.current.sanitize();
        debug!("Effective settings: {:?}", manager.current);
        Ok(manager)
    }

    async fn load_xfconf(&mut self) -> Result<()> {
        let conn = Connection::session().await?;

        let reply: HashMap<String, OwnedValue> = conn
            .call_method(
                Some("org.xfce.Xfconf"),
                "/org/xfce/Xfconf",
                Some("org.xfce.Xfconf"),
                "GetAllProperties",
                &("xfwm4", "/"),
            )
            .await?
            .body()
            .deserialize()?;

        debug!("Loaded {} properties from Xfconf", reply.len());

        let properties: HashMap<String, XfconfValue> = reply
            .iter()
            .filter_map(|(key, value)| XfconfValue::from_owned(value).map(|v| (key.clone(), v)))
            .collect();
        self.current.apply_xfconf(&properties);
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("xfce-rs").join("compositor.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.shadow_radius, 12);
        assert_eq!(settings.shadow_offset_x, -15);
        assert_eq!(settings.fade_interval(), Duration::from_millis(10));
        assert!(!settings.shadow_enabled(WindowType::Normal));
        assert_eq!(settings.type_opacity(WindowType::PopupMenu), OPAQUE);
    }

    #[test]
    fn test_sanitize_fallbacks() {
        let mut settings = Settings {
            fade_delta_ms: 0,
            fade_in_step: -1.0,
            fade_out_step: 0.0,
            shadow_opacity: 3.0,
            inactive_opacity: Some(0.0),
            frame_opacity: Some(0.05),
            shadow_types: vec![WindowType::Unknown, WindowType::Dock],
            ..Default::default()
        };
        settings.sanitize();

        assert_eq!(settings.fade_delta_ms, 10);
        assert_eq!(settings.fade_in_step, 0.01);
        assert_eq!(settings.fade_out_step, 0.01);
        assert_eq!(settings.shadow_opacity, 1.0);
        assert_eq!(settings.inactive_opacity, None);
        assert_eq!(settings.frame_opacity, Some(0.1));
        assert_eq!(settings.shadow_types, vec![WindowType::Dock]);
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "shadow_radius = 6\nshadow_types = [\"normal\", \"dock\"]\ninactive_opacity = 0.8"
        )
        .expect("write");

        let settings = Settings::load_file(file.path()).expect("load");
        assert_eq!(settings.shadow_radius, 6);
        assert!(settings.shadow_enabled(WindowType::Dock));
        assert_eq!(settings.inactive_opacity, Some(0.8));
        // Unset keys keep their defaults.
        assert_eq!(settings.fade_out_step, 0.03);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "shadow_radius = \"wide\"").expect("write");

        let err = Settings::load_file(file.path()).unwrap_err();
        assert!(matches!(err, CompositorError::InvalidConfig { .. }));
    }

    #[test]
    fn test_xfconf_properties() {
        let mut properties = HashMap::new();
        properties.insert("/general/show_frame_shadow".to_string(), XfconfValue::Bool(true));
        properties.insert("/general/show_dock_shadow".to_string(), XfconfValue::Bool(false));
        properties.insert("/general/frame_opacity".to_string(), XfconfValue::Integer(80));
        properties.insert("/general/inactive_opacity".to_string(), XfconfValue::Integer(100));
        properties.insert("/general/shadow_delta_x".to_string(), XfconfValue::Integer(-3));

        let mut settings = Settings {
            shadow_types: vec![WindowType::Dock],
            ..Default::default()
        };
        settings.apply_xfconf(&properties);

        assert!(settings.shadow_enabled(WindowType::Normal));
        assert!(settings.shadow_enabled(WindowType::Dialog));
        assert!(!settings.shadow_enabled(WindowType::Dock));
        assert_eq!(settings.frame_opacity, Some(0.8));
        assert_eq!(settings.inactive_opacity, None);
        assert_eq!(settings.shadow_offset_x, -3);
    }

    #[test]
    fn test_command_line_overrides() {
        let overrides = SettingsOverrides {
            shadows: true,
            no_dock_shadow: true,
            fades: true,
            menu_opacity: Some(0.5),
            ..Default::default()
        };
        let mut settings = Settings::default();
        overrides.apply(&mut settings);

        assert!(settings.shadow_enabled(WindowType::Normal));
        assert!(!settings.shadow_enabled(WindowType::Desktop));
        assert!(!settings.shadow_enabled(WindowType::Dock));
        assert!(settings.fade_enabled(WindowType::Desktop));
        assert!(!settings.fade_enabled(WindowType::Unknown));
        assert_eq!(settings.type_opacity(WindowType::DropdownMenu), to_opacity(0.5));
    }
}
