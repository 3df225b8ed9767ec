//! The mode profile engine: applies one mode's profile across the three
//! backends (XML settings files, audio defaults, tool lifecycle).
//!
//! Every backend step is isolated. One failing step never prevents the
//! remaining steps from executing; it downgrades the aggregated outcome from
//! success to partial and is listed in the report. Detailed reasons go to the
//! tracing log, the report message is what a notification would show.
//!
//! The caller serializes invocations: at most one operation is in flight at a
//! time, and nothing here is cancellable mid-run.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::audio::{AudioControl, AudioError, DeviceKind};
use crate::config::{default_config_path, Mode, ProfileConfig};
use crate::graphics::{self, ApplyOutcome};
use crate::process::{ProcessControl, ToolManager};
use crate::settings::{default_settings_path, AppSettings};

/// Aggregated outcome of one user-triggered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Some steps failed; the rest were still applied.
    Partial,
}

/// One notification-sized summary per action, plus the steps that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub outcome: Outcome,
    pub message: String,
    pub problems: Vec<String>,
}

impl ActionReport {
    fn from_problems(ok_message: String, problems: Vec<String>) -> Self {
        if problems.is_empty() {
            ActionReport {
                outcome: Outcome::Success,
                message: ok_message,
                problems,
            }
        } else {
            ActionReport {
                outcome: Outcome::Partial,
                message: format!("{ok_message} ({} issue(s))", problems.len()),
                problems,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Where the engine's three kinds of files live. Injected so tests run
/// against temp directories.
pub struct EnginePaths {
    /// User-editable profile file (profile.json).
    pub config: PathBuf,
    /// App preference file (settings.json).
    pub settings: PathBuf,
    /// The game's XML settings files, each rewritten on a switch.
    pub graphics_targets: Vec<PathBuf>,
}

impl EnginePaths {
    /// Platform default locations.
    pub fn discover() -> anyhow::Result<EnginePaths> {
        Ok(EnginePaths {
            config: default_config_path()?,
            settings: default_settings_path()?,
            graphics_targets: graphics::default_target_files(),
        })
    }
}

pub struct ModeProfileEngine<A: AudioControl, P: ProcessControl> {
    paths: EnginePaths,
    config: ProfileConfig,
    settings: AppSettings,
    audio: A,
    tools: ToolManager<P>,
    /// The sticky audio failure is surfaced to the user exactly once.
    audio_unavailable_reported: bool,
}

impl<A: AudioControl, P: ProcessControl> ModeProfileEngine<A, P> {
    /// Load config and preferences and wire up the backends. A missing
    /// profile file is replaced with built-in defaults and written back.
    pub fn new(paths: EnginePaths, audio: A, process_control: P) -> Self {
        let config = ProfileConfig::load_or_init(&paths.config);
        let settings = AppSettings::load(&paths.settings);

        ModeProfileEngine {
            paths,
            config,
            settings,
            audio,
            tools: ToolManager::new(process_control),
            audio_unavailable_reported: false,
        }
    }

    pub fn current_mode(&self) -> Mode {
        self.settings.current_mode
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    #[cfg(test)]
    fn tools_control(&self) -> &P {
        self.tools.control()
    }

    /// Switch to `target`: persist the new mode, reload config, rewrite the
    /// graphics files, select audio defaults, and swap mode-exclusive tools.
    pub fn switch_to(&mut self, target: Mode) -> ActionReport {
        let previous = self.settings.current_mode;
        let mut problems = Vec::new();

        info!(%previous, %target, "switching mode");

        // Persist the intended mode first so a crash mid-switch still leaves
        // it on disk.
        self.settings.current_mode = target;
        if let Err(e) = self.settings.save(&self.paths.settings) {
            warn!("could not persist mode preference: {e}");
            problems.push(format!("mode preference not saved: {e}"));
        }

        // External edits to the profile file take effect now, never
        // mid-action.
        if let Some(problem) = self.refresh_config() {
            problems.push(problem);
        }

        self.apply_graphics(target, &mut problems);
        self.apply_audio(target, &mut problems);

        // Swap mode-exclusive tools only on an actual transition; the common
        // set is never touched here.
        if previous != target {
            let stop = self.tools.stop_mode_specific(&self.config.tools, previous);
            problems.extend(stop.failures());

            let start = self.tools.start_mode_specific(&self.config.tools, target);
            problems.extend(start.failures());
        }

        ActionReport::from_problems(format!("Switched to {target} mode"), problems)
    }

    /// Start the common set plus the current mode's set. Idempotent: running
    /// tools are skipped.
    pub fn start_tools(&mut self) -> ActionReport {
        let mode = self.settings.current_mode;
        let report = self.tools.start_tools(&self.config.tools, mode);

        ActionReport::from_problems(
            format!(
                "Starting tools for {mode} mode ({} launched)",
                report.started()
            ),
            report.failures(),
        )
    }

    /// Stop the common set plus the current mode's set.
    pub fn stop_tools(&mut self) -> ActionReport {
        let mode = self.settings.current_mode;
        let report = self.tools.stop_tools(&self.config.tools, mode);

        ActionReport::from_problems(
            format!("Stopping tools ({} stopped)", report.stopped()),
            report.failures(),
        )
    }

    /// Explicit reload of the profile file.
    pub fn reload_config(&mut self) -> ActionReport {
        match self.refresh_config() {
            None => ActionReport::from_problems("Profile config reloaded".to_string(), vec![]),
            Some(problem) => ActionReport::from_problems(
                "Profile config reloaded".to_string(),
                vec![problem],
            ),
        }
    }

    /// Reload the profile file, keeping the last good config when the file
    /// exists but cannot be parsed. Returns the problem to report, if any.
    fn refresh_config(&mut self) -> Option<String> {
        if !self.paths.config.exists() {
            self.config = ProfileConfig::load_or_init(&self.paths.config);
            return None;
        }

        match ProfileConfig::load(&self.paths.config) {
            Ok(config) => {
                self.config = config;
                None
            }
            Err(e) => {
                warn!("keeping previous profile config: {e}");
                Some(format!("profile config not reloaded: {e}"))
            }
        }
    }

    /// Rewrite both target files with the mode's settings map. Each file is
    /// independent; the second is attempted even when the first fails.
    fn apply_graphics(&self, target: Mode, problems: &mut Vec<String>) {
        let settings = self.config.graphics.for_mode(target);

        for path in &self.paths.graphics_targets {
            match graphics::apply_settings(path, settings) {
                Ok(ApplyOutcome::Applied { replaced }) => {
                    info!(file = %path.display(), replaced, "graphics settings applied");
                }
                Ok(ApplyOutcome::SkippedMissing) => {
                    debug!(file = %path.display(), "target file missing, skipped");
                    problems.push(format!("{}: file missing, skipped", path.display()));
                }
                Err(e) => {
                    warn!(file = %path.display(), "graphics apply failed: {e}");
                    problems.push(format!("{}: {e}", path.display()));
                }
            }
        }
    }

    /// Select the mode's default output, then input device. A fragment with
    /// no matching live device is skipped silently; the user may have left
    /// that device unplugged on purpose.
    fn apply_audio(&mut self, target: Mode, problems: &mut Vec<String>) {
        let selections = [
            (DeviceKind::Output, self.config.audio.audio_out.default_for(target)),
            (DeviceKind::Input, self.config.audio.microphone.default_for(target)),
        ];

        for (kind, fragment) in selections {
            let Some(fragment) = fragment else { continue };
            if fragment.is_empty() {
                continue;
            }

            match self.audio.set_default(kind, fragment) {
                Ok(name) => info!(%kind, device = %name, "default device selected"),
                Err(AudioError::NotFound { .. }) => {
                    debug!(%kind, %fragment, "no matching device, skipped");
                }
                Err(AudioError::Unavailable) => {
                    if !self.audio_unavailable_reported {
                        self.audio_unavailable_reported = true;
                        problems.push(
                            "audio subsystem unavailable; device selection disabled".to_string(),
                        );
                    }
                    // Further audio calls would short-circuit the same way.
                    break;
                }
                Err(e) => problems.push(format!("{kind} device: {e}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Endpoint;
    use crate::config::{AudioDeviceList, GraphicsSettings, ToolSet, ToolsConfig};
    use crate::process::{StopOutcome, STOP_TIMEOUT};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;

    // STOP_TIMEOUT is part of the public stop contract; keep it visible here
    // so a change shows up in review.
    #[test]
    fn test_stop_timeout_is_five_seconds() {
        assert_eq!(STOP_TIMEOUT.as_secs(), 5);
    }

    /// Audio mock: a fixed endpoint list, or a permanently broken subsystem.
    struct MockAudio {
        endpoints: Vec<Endpoint>,
        unavailable: bool,
        selected: RefCell<Vec<(DeviceKind, String)>>,
    }

    impl MockAudio {
        fn with_devices(names: &[&str]) -> Self {
            MockAudio {
                endpoints: names
                    .iter()
                    .map(|n| Endpoint {
                        id: format!("id-{n}"),
                        full_name: n.to_string(),
                        short_name: String::new(),
                    })
                    .collect(),
                unavailable: false,
                selected: RefCell::new(Vec::new()),
            }
        }

        fn broken() -> Self {
            MockAudio {
                endpoints: Vec::new(),
                unavailable: true,
                selected: RefCell::new(Vec::new()),
            }
        }
    }

    impl AudioControl for MockAudio {
        fn set_default(&self, kind: DeviceKind, fragment: &str) -> Result<String, AudioError> {
            if self.unavailable {
                return Err(AudioError::Unavailable);
            }
            match crate::audio::first_match(&self.endpoints, fragment) {
                Some(endpoint) => {
                    self.selected
                        .borrow_mut()
                        .push((kind, endpoint.full_name.clone()));
                    Ok(endpoint.full_name.clone())
                }
                None => Err(AudioError::NotFound {
                    kind,
                    fragment: fragment.to_string(),
                }),
            }
        }

        fn device_names(&self, _kind: DeviceKind) -> Result<Vec<String>, AudioError> {
            if self.unavailable {
                return Err(AudioError::Unavailable);
            }
            Ok(self.endpoints.iter().map(|e| e.full_name.clone()).collect())
        }

        fn current_default(&self, _kind: DeviceKind) -> Result<String, AudioError> {
            Err(AudioError::Unavailable)
        }
    }

    /// Process mock recording starts and stops.
    #[derive(Default)]
    struct RecordingProcesses {
        running: Vec<String>,
        spawned: Vec<String>,
        stopped: Vec<String>,
    }

    impl ProcessControl for RecordingProcesses {
        fn is_running(&mut self, name: &str) -> bool {
            self.running
                .iter()
                .any(|r| crate::process::process_name_matches(r, name))
        }

        fn spawn_detached(&mut self, path: &Path) -> Result<(), String> {
            self.spawned.push(
                Path::new(path)
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
            );
            Ok(())
        }

        fn stop_by_name(&mut self, name: &str) -> StopOutcome {
            self.stopped.push(name.to_string());
            StopOutcome::Stopped
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: EnginePaths,
        settings_file: PathBuf,
        xml_a: PathBuf,
        xml_b: PathBuf,
    }

    fn fixture(config: &ProfileConfig, initial_mode: Mode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("profile.json");
        let settings_path = dir.path().join("settings.json");
        let xml_a = dir.path().join("Settings.xml");
        let xml_b = dir.path().join("DisplaySettings.xml");

        config.save(&config_path).unwrap();
        fs::write(&xml_a, "<Root><FullScreen>2</FullScreen></Root>").unwrap();
        fs::write(&xml_b, "<Root><FullScreen>2</FullScreen></Root>").unwrap();
        AppSettings {
            current_mode: initial_mode,
            auto_start_tools: false,
        }
        .save(&settings_path)
        .unwrap();

        let paths = EnginePaths {
            config: config_path,
            settings: settings_path.clone(),
            graphics_targets: vec![xml_a.clone(), xml_b.clone()],
        };

        Fixture {
            _dir: dir,
            paths,
            settings_file: settings_path,
            xml_a,
            xml_b,
        }
    }

    fn graphics_only_config() -> ProfileConfig {
        let mut vr = BTreeMap::new();
        vr.insert("StereoscopicMode".to_string(), "4".to_string());
        vr.insert("FullScreen".to_string(), "0".to_string());
        let mut monitor = BTreeMap::new();
        monitor.insert("StereoscopicMode".to_string(), "0".to_string());
        monitor.insert("FullScreen".to_string(), "2".to_string());

        ProfileConfig {
            graphics: GraphicsSettings { vr, monitor },
            ..ProfileConfig::default()
        }
    }

    fn tool_config(dir: &Path) -> (ProfileConfig, String, String) {
        let common_exe = dir.join("EDLaunch.exe");
        let vr_exe = dir.join("VirtualDesktop.Streamer.exe");
        fs::write(&common_exe, b"").unwrap();
        fs::write(&vr_exe, b"").unwrap();

        let config = ProfileConfig {
            tools: ToolsConfig {
                common: ToolSet {
                    on_start: vec![common_exe.to_string_lossy().into_owned()],
                    on_stop: vec!["steam".into()],
                },
                vr: ToolSet {
                    on_start: vec![vr_exe.to_string_lossy().into_owned()],
                    on_stop: vec![],
                },
                monitor: ToolSet {
                    on_start: vec![],
                    on_stop: vec!["trackir5".into()],
                },
            },
            ..ProfileConfig::default()
        };

        (
            config,
            common_exe.to_string_lossy().into_owned(),
            vr_exe.to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn test_switch_applies_graphics_and_persists_mode() {
        let fx = fixture(&graphics_only_config(), Mode::Monitor);
        fs::write(
            &fx.xml_a,
            "<Root><StereoscopicMode>0</StereoscopicMode><FullScreen>2</FullScreen></Root>",
        )
        .unwrap();
        fs::write(&fx.xml_b, "<Root><FullScreen>2</FullScreen></Root>").unwrap();

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        let report = engine.switch_to(Mode::VR);
        assert!(report.is_success(), "problems: {:?}", report.problems);
        assert_eq!(report.message, "Switched to VR mode");
        assert_eq!(engine.current_mode(), Mode::VR);

        let a = fs::read_to_string(&fx.xml_a).unwrap();
        assert!(a.contains("<StereoscopicMode>4</StereoscopicMode>"));
        assert!(a.contains("<FullScreen>0</FullScreen>"));
        let b = fs::read_to_string(&fx.xml_b).unwrap();
        assert!(b.contains("<FullScreen>0</FullScreen>"));

        // Preference hit disk before the backends ran.
        let persisted = AppSettings::load(&fx.settings_file);
        assert_eq!(persisted.current_mode, Mode::VR);
    }

    #[test]
    fn test_transition_swaps_exclusive_tools_only() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _common_exe, _vr_exe) = tool_config(dir.path());
        let fx = fixture(&config, Mode::Monitor);

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        let report = engine.switch_to(Mode::VR);
        assert!(report.outcome == Outcome::Partial || report.is_success());

        // Monitor's exclusive stop set ran, VR's exclusive start set ran,
        // and the common set was not touched.
        let control = &engine.tools_control().stopped;
        assert_eq!(control, &vec!["trackir5".to_string()]);
        assert_eq!(
            engine.tools_control().spawned,
            vec!["VirtualDesktop.Streamer.exe".to_string()]
        );
    }

    #[test]
    fn test_same_mode_switch_touches_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _, _) = tool_config(dir.path());
        let fx = fixture(&config, Mode::VR);

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        engine.switch_to(Mode::VR);
        assert!(engine.tools_control().spawned.is_empty());
        assert!(engine.tools_control().stopped.is_empty());
    }

    #[test]
    fn test_missing_target_file_degrades_to_partial() {
        let fx = fixture(&graphics_only_config(), Mode::Monitor);
        // Only the first target exists.
        fs::remove_file(&fx.xml_b).unwrap();
        let missing = fx.xml_b.display().to_string();

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        let report = engine.switch_to(Mode::VR);
        assert_eq!(report.outcome, Outcome::Partial);
        assert!(
            report.problems.iter().any(|p| p.contains(&missing)),
            "problems should name the missing file: {:?}",
            report.problems
        );

        // The existing file was still rewritten.
        let a = fs::read_to_string(&fx.xml_a).unwrap();
        assert!(a.contains("<FullScreen>0</FullScreen>"));
    }

    #[test]
    fn test_audio_selection_prefers_fragment_match() {
        let mut config = ProfileConfig::default();
        config.audio.audio_out = AudioDeviceList {
            devices: vec![],
            default_vr: Some("h5".into()),
            default_monitor: None,
        };
        let fx = fixture(&config, Mode::Monitor);

        let audio = MockAudio::with_devices(&["Realtek Speakers", "Speakers (H5) 2.0"]);
        let mut engine = ModeProfileEngine::new(fx.paths, audio, RecordingProcesses::default());

        engine.switch_to(Mode::VR);

        let selected = engine.audio().selected.borrow();
        assert_eq!(
            *selected,
            vec![(DeviceKind::Output, "Speakers (H5) 2.0".to_string())]
        );
    }

    #[test]
    fn test_unmatched_audio_device_is_silent() {
        let mut config = ProfileConfig::default();
        config.audio.microphone = AudioDeviceList {
            devices: vec![],
            default_vr: Some("vr-mic".into()),
            default_monitor: None,
        };
        let fx = fixture(&config, Mode::Monitor);

        let audio = MockAudio::with_devices(&["Desktop Microphone"]);
        let mut engine = ModeProfileEngine::new(fx.paths, audio, RecordingProcesses::default());

        let report = engine.switch_to(Mode::VR);
        assert!(report.is_success(), "problems: {:?}", report.problems);
        assert!(engine.audio().selected.borrow().is_empty());
    }

    #[test]
    fn test_unavailable_audio_reported_once() {
        let mut config = ProfileConfig::default();
        config.audio.audio_out.default_vr = Some("h5".into());
        config.audio.microphone.default_vr = Some("h5".into());
        config.audio.audio_out.default_monitor = Some("h5".into());
        config.audio.microphone.default_monitor = Some("h5".into());
        let fx = fixture(&config, Mode::Monitor);

        let mut engine =
            ModeProfileEngine::new(fx.paths, MockAudio::broken(), RecordingProcesses::default());

        let first = engine.switch_to(Mode::VR);
        let audio_notes = first
            .problems
            .iter()
            .filter(|p| p.contains("audio subsystem unavailable"))
            .count();
        assert_eq!(audio_notes, 1);

        // Later actions do not repeat the warning.
        let second = engine.switch_to(Mode::Monitor);
        assert!(second
            .problems
            .iter()
            .all(|p| !p.contains("audio subsystem unavailable")));
    }

    #[test]
    fn test_config_edits_take_effect_on_next_switch() {
        let fx = fixture(&graphics_only_config(), Mode::Monitor);
        fs::write(&fx.xml_a, "<Root><FullScreen>2</FullScreen></Root>").unwrap();
        fs::write(&fx.xml_b, "<Root><FullScreen>2</FullScreen></Root>").unwrap();
        let config_path = fx.paths.config.clone();

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        // External edit between actions.
        let mut edited = graphics_only_config();
        edited
            .graphics
            .vr
            .insert("FullScreen".to_string(), "1".to_string());
        edited.save(&config_path).unwrap();

        engine.switch_to(Mode::VR);
        let a = fs::read_to_string(&fx.xml_a).unwrap();
        assert!(a.contains("<FullScreen>1</FullScreen>"));
    }

    #[test]
    fn test_start_tools_uses_common_plus_current_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (config, _, _) = tool_config(dir.path());
        let fx = fixture(&config, Mode::VR);

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        let report = engine.start_tools();
        assert!(report.is_success(), "problems: {:?}", report.problems);
        assert_eq!(
            engine.tools_control().spawned,
            vec![
                "EDLaunch.exe".to_string(),
                "VirtualDesktop.Streamer.exe".to_string()
            ]
        );

        let report = engine.stop_tools();
        assert!(report.message.starts_with("Stopping tools"));
        assert_eq!(engine.tools_control().stopped, vec!["steam".to_string()]);
    }

    #[test]
    fn test_reload_config_reports_parse_failure() {
        let fx = fixture(&graphics_only_config(), Mode::Monitor);
        let config_path = fx.paths.config.clone();

        let mut engine = ModeProfileEngine::new(
            fx.paths,
            MockAudio::with_devices(&[]),
            RecordingProcesses::default(),
        );

        fs::write(&config_path, "{not json").unwrap();
        let report = engine.reload_config();
        assert_eq!(report.outcome, Outcome::Partial);

        // Last good config is retained.
        assert_eq!(
            engine.config().graphics.vr.get("StereoscopicMode").unwrap(),
            "4"
        );
    }
}
