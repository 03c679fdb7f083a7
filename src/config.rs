use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings that persist across runs.
///
/// Stored as `key=value` lines.  Missing files, unknown keys and unparsable
/// values all fall back to the defaults below.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Where project and coordinate records live.  `None` = OS data directory.
    pub data_dir: Option<PathBuf>,
    /// Host serving both tile images and the pixel-placement endpoint.
    pub backend_host: String,
    /// Page origin used to resolve root-relative request URLs.
    pub base_url: String,
    /// Tile image requests start with this path prefix...
    pub tile_path_prefix: String,
    /// ...and end with this extension.
    pub tile_extension: String,
    /// Opacity given to newly created overlays (0.0–1.0).
    pub default_opacity: f32,
    /// Upper bound on waiting for a composited tile reply.
    pub reply_timeout_ms: u64,
    /// Upper bound on waiting for an anchor coordinate to become available.
    pub anchor_wait_ms: u64,
}

pub const DEFAULT_OPACITY: f32 = 0.7;

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend_host: "backend.wplace.live".to_string(),
            base_url: "https://wplace.live/".to_string(),
            tile_path_prefix: "/files/".to_string(),
            tile_extension: ".png".to_string(),
            default_opacity: DEFAULT_OPACITY,
            reply_timeout_ms: 5000,
            anchor_wait_ms: 5000,
        }
    }
}

impl Settings {
    /// Default settings file.
    /// On Linux:   ~/.config/pixel-overlay/pixel-overlay.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PixelOverlay\pixel-overlay.cfg
    /// On macOS:   ~/Library/Application Support/PixelOverlay/pixel-overlay.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?
                .join("pixel-overlay");
            return Some(config_dir.join("pixel-overlay.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("PixelOverlay").join("pixel-overlay.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PixelOverlay")
                    .join("pixel-overlay.cfg"),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("pixel-overlay.cfg")))
        }
    }

    /// Resolved data directory for the record store.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| crate::logger::data_dir().join("PixelOverlay").join("store"))
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn anchor_wait(&self) -> Duration {
        Duration::from_millis(self.anchor_wait_ms)
    }

    /// Load from the default location.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path` (returns defaults if the file is missing or unreadable).
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "data_dir" => {
                    s.data_dir = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                }
                "backend_host" => {
                    if !val.is_empty() {
                        s.backend_host = val.to_ascii_lowercase();
                    }
                }
                "base_url" => {
                    if !val.is_empty() {
                        s.base_url = val.to_string();
                    }
                }
                "tile_path_prefix" => {
                    if val.starts_with('/') {
                        s.tile_path_prefix = val.to_string();
                    }
                }
                "tile_extension" => {
                    if !val.is_empty() {
                        s.tile_extension = val.to_string();
                    }
                }
                "default_opacity" => {
                    s.default_opacity = match val.parse::<f32>() {
                        Ok(v) if v.is_finite() => v.clamp(0.0, 1.0),
                        _ => DEFAULT_OPACITY,
                    };
                }
                "reply_timeout_ms" => {
                    s.reply_timeout_ms = val.parse().unwrap_or(5000);
                }
                "anchor_wait_ms" => {
                    s.anchor_wait_ms = val.parse().unwrap_or(5000);
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "data_dir={}\n\
             backend_host={}\n\
             base_url={}\n\
             tile_path_prefix={}\n\
             tile_extension={}\n\
             default_opacity={}\n\
             reply_timeout_ms={}\n\
             anchor_wait_ms={}\n",
            self.data_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            self.backend_host,
            self.base_url,
            self.tile_path_prefix,
            self.tile_extension,
            self.default_opacity,
            self.reply_timeout_ms,
            self.anchor_wait_ms,
        )
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}
