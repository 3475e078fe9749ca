//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Input and output folder roots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root of the folder tree scanned for jobs
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,
    /// Root under which per-job destination folders are created
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

fn default_input_root() -> PathBuf {
    PathBuf::from("input")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_root: default_input_root(),
            output_root: default_output_root(),
        }
    }
}

/// Logo overlay assets, one per resolution tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetsConfig {
    /// Directory holding the overlay images
    #[serde(default = "default_assets_dir")]
    pub dir: PathBuf,
    /// File name of the overlay used below 1080 lines
    #[serde(default = "default_logo_720")]
    pub logo_720: String,
    /// File name of the overlay used at 1080 lines and above
    #[serde(default = "default_logo_1080")]
    pub logo_1080: String,
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_logo_720() -> String {
    "720 overlay.png".to_string()
}

fn default_logo_1080() -> String {
    "1080 overlay.png".to_string()
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
            logo_720: default_logo_720(),
            logo_1080: default_logo_1080(),
        }
    }
}

/// External engine binaries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Transcoding engine executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Probing executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Number of trailing diagnostic lines kept for error reports
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_stderr_tail_lines() -> usize {
    20
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            stderr_tail_lines: default_stderr_tail_lines(),
        }
    }
}

/// Fixed video encoding parameters applied to both stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodingConfig {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Constant rate factor
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_tune")]
    pub tune: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Move the moov atom to the front of the file
    #[serde(default = "default_faststart")]
    pub faststart: bool,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    26
}

fn default_tune() -> String {
    "film".to_string()
}

fn default_profile() -> String {
    "high".to_string()
}

fn default_faststart() -> bool {
    true
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            tune: default_tune(),
            profile: default_profile(),
            faststart: default_faststart(),
        }
    }
}

/// Recognized file extensions (without dot, matched case-insensitively)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanConfig {
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default = "default_subtitle_extensions")]
    pub subtitle_extensions: Vec<String>,
}

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mkv", "avi", "mov", "m4v", "ts"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_subtitle_extensions() -> Vec<String> {
    ["srt", "ass", "ssa", "vtt", "sub"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
            subtitle_extensions: default_subtitle_extensions(),
        }
    }
}

/// Pipeline scheduling and artifact policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Maximum concurrent jobs (0 = auto-derive)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// Keep the stage 1 output when stage 2 fails so stage 2 can be retried alone
    #[serde(default = "default_keep_intermediate_on_failure")]
    pub keep_intermediate_on_failure: bool,
    /// Appended to the video stem to name the final output
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
}

fn default_max_concurrent_jobs() -> u32 {
    1
}

fn default_keep_intermediate_on_failure() -> bool {
    true
}

fn default_output_suffix() -> String {
    "_burned".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            keep_intermediate_on_failure: default_keep_intermediate_on_failure(),
            output_suffix: default_output_suffix(),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and fills missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SUBBURN_INPUT_ROOT -> paths.input_root
    /// - SUBBURN_OUTPUT_ROOT -> paths.output_root
    /// - SUBBURN_ASSETS_DIR -> assets.dir
    /// - SUBBURN_FFMPEG_PATH -> engine.ffmpeg_path
    /// - SUBBURN_FFPROBE_PATH -> engine.ffprobe_path
    /// - SUBBURN_MAX_CONCURRENT_JOBS -> pipeline.max_concurrent_jobs
    /// - SUBBURN_KEEP_INTERMEDIATE -> pipeline.keep_intermediate_on_failure
    /// - SUBBURN_LOG_LEVEL -> logging.level
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = non_empty_var("SUBBURN_INPUT_ROOT") {
            self.paths.input_root = PathBuf::from(path);
        }

        if let Some(path) = non_empty_var("SUBBURN_OUTPUT_ROOT") {
            self.paths.output_root = PathBuf::from(path);
        }

        if let Some(path) = non_empty_var("SUBBURN_ASSETS_DIR") {
            self.assets.dir = PathBuf::from(path);
        }

        if let Some(path) = non_empty_var("SUBBURN_FFMPEG_PATH") {
            self.engine.ffmpeg_path = PathBuf::from(path);
        }

        if let Some(path) = non_empty_var("SUBBURN_FFPROBE_PATH") {
            self.engine.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(val) = env::var("SUBBURN_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.pipeline.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("SUBBURN_KEEP_INTERMEDIATE") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.pipeline.keep_intermediate_on_failure = true,
                "false" | "0" | "no" => self.pipeline.keep_intermediate_on_failure = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Some(level) = non_empty_var("SUBBURN_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests must not interleave
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for key in [
            "SUBBURN_INPUT_ROOT",
            "SUBBURN_OUTPUT_ROOT",
            "SUBBURN_ASSETS_DIR",
            "SUBBURN_FFMPEG_PATH",
            "SUBBURN_FFPROBE_PATH",
            "SUBBURN_MAX_CONCURRENT_JOBS",
            "SUBBURN_KEEP_INTERMEDIATE",
            "SUBBURN_LOG_LEVEL",
        ] {
            env::remove_var(key);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            crf in 0u8..=51,
            max_jobs in 0u32..16,
            keep in proptest::bool::ANY,
            faststart in proptest::bool::ANY,
            preset in prop::sample::select(vec!["ultrafast", "fast", "medium", "slow", "veryslow"]),
            tail in 1usize..200,
        ) {
            let toml_str = format!(
                r#"
[paths]
input_root = "/media/in"
output_root = "/media/out"

[assets]
dir = "/opt/logos"

[engine]
ffmpeg_path = "/usr/local/bin/ffmpeg"
stderr_tail_lines = {}

[encoding]
preset = "{}"
crf = {}
faststart = {}

[scan]
video_extensions = ["mkv"]

[pipeline]
max_concurrent_jobs = {}
keep_intermediate_on_failure = {}
"#,
                tail, preset, crf, faststart, max_jobs, keep
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(&config.paths.input_root, &PathBuf::from("/media/in"));
            prop_assert_eq!(&config.paths.output_root, &PathBuf::from("/media/out"));
            prop_assert_eq!(&config.assets.dir, &PathBuf::from("/opt/logos"));
            prop_assert_eq!(&config.assets.logo_1080, "1080 overlay.png");
            prop_assert_eq!(&config.engine.ffmpeg_path, &PathBuf::from("/usr/local/bin/ffmpeg"));
            prop_assert_eq!(&config.engine.ffprobe_path, &PathBuf::from("ffprobe"));
            prop_assert_eq!(config.engine.stderr_tail_lines, tail);
            prop_assert_eq!(&config.encoding.preset, preset);
            prop_assert_eq!(config.encoding.crf, crf);
            prop_assert_eq!(config.encoding.faststart, faststart);
            prop_assert_eq!(&config.encoding.video_codec, "libx264");
            prop_assert_eq!(config.scan.video_extensions.clone(), vec!["mkv".to_string()]);
            prop_assert_eq!(config.scan.subtitle_extensions.clone(), default_subtitle_extensions());
            prop_assert_eq!(config.pipeline.max_concurrent_jobs, max_jobs);
            prop_assert_eq!(config.pipeline.keep_intermediate_on_failure, keep);
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[pipeline]
max_concurrent_jobs = {}
"#,
                initial_jobs
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SUBBURN_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.pipeline.max_concurrent_jobs, override_jobs);
        }

        #[test]
        fn prop_env_overrides_keep_intermediate(
            initial in proptest::bool::ANY,
            override_value in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[pipeline]
keep_intermediate_on_failure = {}
"#,
                initial
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("SUBBURN_KEEP_INTERMEDIATE", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.pipeline.keep_intermediate_on_failure, override_value);
        }
    }

    #[test]
    fn test_env_overrides_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SUBBURN_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");
        env::set_var("SUBBURN_ASSETS_DIR", "/srv/logos");
        env::set_var("SUBBURN_INPUT_ROOT", "   ");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.engine.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.assets.dir, PathBuf::from("/srv/logos"));
        // Blank values are ignored
        assert_eq!(config.paths.input_root, PathBuf::from("input"));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("SUBBURN_MAX_CONCURRENT_JOBS", "many");
        env::set_var("SUBBURN_KEEP_INTERMEDIATE", "perhaps");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.pipeline.max_concurrent_jobs, 1);
        assert!(config.pipeline.keep_intermediate_on_failure);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config, Config::default());
        assert_eq!(config.assets.logo_720, "720 overlay.png");
        assert_eq!(config.encoding.crf, 26);
        assert_eq!(config.encoding.tune, "film");
        assert_eq!(config.encoding.profile, "high");
        assert!(config.encoding.faststart);
        assert_eq!(config.pipeline.max_concurrent_jobs, 1);
        assert!(config.pipeline.keep_intermediate_on_failure);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[encoding]
crf = 20
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.encoding.crf, 20);
        assert_eq!(config.encoding.preset, "medium"); // default
        assert_eq!(config.engine.stderr_tail_lines, 20); // default
        assert_eq!(config.scan.video_extensions, default_video_extensions());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = Config::parse_toml("[encoding\ncrf = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/subburn.toml").expect("defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/subburn.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
