//! Profile configuration for the mode switcher.
//!
//! One JSON file describes, per mode, the graphics overrides written into the
//! game's XML settings files, the audio devices to prefer, and the tools to
//! start and stop. The file lives in the platform-specific application data
//! directory (%APPDATA%/EliteSwitch/ on Windows) and is meant to be edited by
//! hand; a missing file is replaced with built-in defaults and written back so
//! there is always something to edit.

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The two operating profiles. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    VR,
    Monitor,
}

impl Mode {
    /// The mode being left when switching into `self`.
    pub fn other(self) -> Mode {
        match self {
            Mode::VR => Mode::Monitor,
            Mode::Monitor => Mode::VR,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::VR => write!(f, "VR"),
            Mode::Monitor => write!(f, "Monitor"),
        }
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("vr") {
            Ok(Mode::VR)
        } else if s.eq_ignore_ascii_case("monitor") {
            Ok(Mode::Monitor)
        } else {
            Err(anyhow!("unknown mode: {s}"))
        }
    }
}

/// Root of the user-editable profile file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub graphics: GraphicsSettings,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// Per-mode element-name -> value overrides for the game's XML settings.
///
/// BTreeMap keeps iteration deterministic; the applied result does not depend
/// on iteration order because every key targets a distinct element name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphicsSettings {
    #[serde(default)]
    pub vr: BTreeMap<String, String>,
    #[serde(default)]
    pub monitor: BTreeMap<String, String>,
}

impl GraphicsSettings {
    pub fn for_mode(&self, mode: Mode) -> &BTreeMap<String, String> {
        match mode {
            Mode::VR => &self.vr,
            Mode::Monitor => &self.monitor,
        }
    }
}

/// Output ("audioOut") and input ("microphone") device preferences.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default, rename = "audioOut")]
    pub audio_out: AudioDeviceList,
    #[serde(default)]
    pub microphone: AudioDeviceList,
}

/// An ordered list of known devices plus the match fragment to apply per mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioDeviceList {
    #[serde(default)]
    pub devices: Vec<AudioDeviceEntry>,
    #[serde(default, rename = "default-vr", skip_serializing_if = "Option::is_none")]
    pub default_vr: Option<String>,
    #[serde(default, rename = "default-monitor", skip_serializing_if = "Option::is_none")]
    pub default_monitor: Option<String>,
}

impl AudioDeviceList {
    /// Match fragment configured for `mode`, if any.
    pub fn default_for(&self, mode: Mode) -> Option<&str> {
        match mode {
            Mode::VR => self.default_vr.as_deref(),
            Mode::Monitor => self.default_monitor.as_deref(),
        }
    }
}

/// Display name + the substring used to find the device among live endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceEntry {
    pub name: String,
    pub substring: String,
}

/// Tool sets: `common` is managed regardless of mode, `vr`/`monitor` only on
/// transitions into/out of that mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub common: ToolSet,
    #[serde(default)]
    pub vr: ToolSet,
    #[serde(default)]
    pub monitor: ToolSet,
}

impl ToolsConfig {
    pub fn for_mode(&self, mode: Mode) -> &ToolSet {
        match mode {
            Mode::VR => &self.vr,
            Mode::Monitor => &self.monitor,
        }
    }
}

/// Executables to launch and process names to terminate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolSet {
    #[serde(default, rename = "onStart")]
    pub on_start: Vec<String>,
    #[serde(default, rename = "onStop")]
    pub on_stop: Vec<String>,
}

/// Get the application's data directory
/// Returns %APPDATA%/EliteSwitch/ on Windows
/// Creates directory if it doesn't exist
pub fn data_directory() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "EliteSwitch")
        .ok_or_else(|| anyhow!("Failed to determine user data directory"))?;

    let data_dir = project_dirs.data_dir();

    fs::create_dir_all(data_dir)
        .map_err(|e| anyhow!("Failed to create data directory: {}", e))?;

    Ok(data_dir.to_path_buf())
}

/// Path of the user-editable profile file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(data_directory()?.join("profile.json"))
}

impl ProfileConfig {
    /// Parse the profile file at `path`. Parse and read errors propagate; a
    /// missing file is the caller's case to handle (see [`load_or_init`]).
    ///
    /// [`load_or_init`]: ProfileConfig::load_or_init
    pub fn load(path: &Path) -> Result<ProfileConfig> {
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse {}: {}", path.display(), e))
    }

    /// Load the profile file, falling back to built-in defaults when the file
    /// is missing or unreadable. A missing file is written back with the
    /// defaults so the user has a template to edit.
    pub fn load_or_init(path: &Path) -> ProfileConfig {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("using default profile config: {e}");
                    return Self::built_in();
                }
            }
        }

        let config = Self::built_in();
        if let Err(e) = config.save(path) {
            tracing::warn!("could not write default profile config: {e}");
        }
        config
    }

    /// Save as pretty-printed JSON, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize profile config: {}", e))?;

        fs::write(path, json)
            .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;

        Ok(())
    }

    /// The configuration shipped in the binary, used when no profile file
    /// exists yet. Values mirror the author's own setup and double as
    /// documentation of the expected shape.
    pub fn built_in() -> ProfileConfig {
        let home = home_dir();
        let pf = program_files();
        let pf_x86 = program_files_x86();

        let vr_graphics: BTreeMap<String, String> = [
            ("ScreenWidth", "3840"),
            ("ScreenHeight", "2160"),
            ("FullScreen", "0"),
            ("StereoscopicMode", "4"),
            ("GammaOffset", "0.240000"),
            ("DX11_RefreshRateNumerator", "59810"),
            ("DX11_RefreshRateDenominator", "1000"),
            ("PresetName", "VRUltra"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let monitor_graphics: BTreeMap<String, String> = [
            ("ScreenWidth", "3840"),
            ("ScreenHeight", "2160"),
            ("FullScreen", "2"),
            ("StereoscopicMode", "0"),
            ("DX11_RefreshRateNumerator", "120"),
            ("DX11_RefreshRateDenominator", "1"),
            ("PresetName", "Ultra"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        ProfileConfig {
            graphics: GraphicsSettings {
                vr: vr_graphics,
                monitor: monitor_graphics,
            },
            audio: AudioConfig {
                audio_out: AudioDeviceList {
                    devices: vec![
                        AudioDeviceEntry {
                            name: "Speakers (H5)".into(),
                            substring: "h5".into(),
                        },
                        AudioDeviceEntry {
                            name: "Desktop Speakers".into(),
                            substring: "speakers".into(),
                        },
                    ],
                    default_vr: Some("h5".into()),
                    default_monitor: Some("h5".into()),
                },
                microphone: AudioDeviceList {
                    devices: vec![
                        AudioDeviceEntry {
                            name: "Microphone (H5)".into(),
                            substring: "h5".into(),
                        },
                        AudioDeviceEntry {
                            name: "Desktop Microphone".into(),
                            substring: "microphone".into(),
                        },
                    ],
                    default_vr: Some("h5".into()),
                    default_monitor: Some("h5".into()),
                },
            },
            tools: ToolsConfig {
                common: ToolSet {
                    on_start: vec![
                        join_str(&pf_x86, &["Frontier", "EDLaunch", "EDLaunch.exe"]),
                        join_str(&home, &["dot-files", "games", "AutoHotKey Scripts", "EliteDangerous.ahk"]),
                        join_str(&pf_x86, &["Steam", "steamApps", "common", "VoiceAttack", "VoiceAttack.exe"]),
                        join_str(&pf, &["EDDiscovery", "EDDiscovery.exe"]),
                    ],
                    on_stop: vec![
                        "elitedangerous64".into(),
                        "edlaunch".into(),
                        "dropbox".into(),
                        "onedrive".into(),
                        "autohotkey".into(),
                        "steam".into(),
                        "messenger".into(),
                    ],
                },
                vr: ToolSet {
                    on_start: vec![join_str(
                        &pf,
                        &["Virtual Desktop Streamer", "VirtualDesktop.Streamer.exe"],
                    )],
                    on_stop: vec![],
                },
                monitor: ToolSet {
                    on_start: vec![join_str(&pf_x86, &["TrackIR5", "TrackIR5.exe"])],
                    on_stop: vec!["virtualdesktop.streamer".into()],
                },
            },
        }
    }
}

fn join_str(base: &Path, parts: &[&str]) -> String {
    let mut path = base.to_path_buf();
    for part in parts {
        path.push(part);
    }
    path.to_string_lossy().into_owned()
}

fn home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_default()
}

fn program_files() -> PathBuf {
    env::var_os("ProgramFiles")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"))
}

fn program_files_x86() -> PathBuf {
    env::var_os("ProgramFiles(x86)")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)"))
}
