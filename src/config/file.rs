//! TOML configuration file loading
//!
//! Supports `~/.config/voxrelay/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxrelayConfigFile {
    /// Audio stream configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Voice activity detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Client-side network settings
    #[serde(default)]
    pub network: NetworkFileConfig,

    /// Assistant server settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Interactive client settings
    #[serde(default)]
    pub client: ClientFileConfig,
}

/// Audio stream configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Frames per read quantum
    pub block_frames: Option<usize>,
    /// Input device name (default device when unset)
    pub input_device: Option<String>,
}

/// VAD configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// "vad", "gated" or "fixed"
    pub mode: Option<String>,
    pub pre_silence_ms: Option<u32>,
    pub fixed_duration_ms: Option<u32>,
    pub min_threshold: Option<f32>,
    /// "desktop" or "mobile"
    pub device_class: Option<String>,
    pub absolute_floor: Option<f32>,
    pub hysteresis: Option<f32>,
    pub calibration_ms: Option<u32>,
    pub min_talk_ms: Option<u32>,
    pub silence_tail_ms: Option<u32>,
    pub tail_keep_ms: Option<u32>,
    pub onset_wait_ms: Option<u32>,
    pub max_utterance_ms: Option<u32>,
    pub max_calibration_retries: Option<u32>,
    pub silent_fallback_ms: Option<u32>,
}

/// Network configuration
#[derive(Debug, Default, Deserialize)]
pub struct NetworkFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub chunk_size: Option<usize>,
    pub connect_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub receive_timeout_secs: Option<u64>,
    pub max_frame_bytes: Option<u64>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Listen address, e.g. "0.0.0.0:5000"
    pub bind: Option<String>,
    pub receive_timeout_secs: Option<u64>,
    pub send_timeout_secs: Option<u64>,
    pub stt_url: Option<String>,
    pub stt_model: Option<String>,
    pub stt_language: Option<String>,
    pub llm_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_timeout_secs: Option<u64>,
    pub system_prompt: Option<String>,
    pub friends_file: Option<String>,
    /// Ordered TTS command backends
    pub tts: Option<Vec<TtsCommandFileConfig>>,
}

/// One external TTS program
#[derive(Debug, Clone, Deserialize)]
pub struct TtsCommandFileConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Client configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClientFileConfig {
    pub response_path: Option<String>,
    pub recording_path: Option<String>,
    /// Ordered playback backends ("cpal", "aplay", ...)
    pub players: Option<Vec<String>>,
    pub anti_echo_ms: Option<u64>,
}

/// Load the TOML config file from an explicit path or the standard one
///
/// Returns `VoxrelayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> VoxrelayConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return VoxrelayConfigFile::default();
    };

    if !path.exists() {
        return VoxrelayConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxrelayConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxrelayConfigFile::default()
        }
    }
}

/// Return the config file path: `$VOXRELAY_CONFIG` or `~/.config/voxrelay/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("VOXRELAY_CONFIG") {
        return Some(PathBuf::from(p));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxrelay").join("config.toml"))
}
