//! Configuration management for voxrelay
//!
//! Every value resolves with the precedence env > TOML file > default.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Hysteresis factor applied to the activation threshold to get the release threshold
pub const DEFAULT_HYSTERESIS: f32 = 0.7;

/// voxrelay configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio stream configuration
    pub audio: AudioConfig,

    /// Voice activity detection configuration
    pub vad: VadConfig,

    /// Client-side network configuration
    pub network: NetworkConfig,

    /// Assistant server configuration
    pub server: ServerConfig,

    /// Interactive client configuration
    pub client: ClientConfig,
}

/// Audio input stream configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Frames per read quantum
    pub block_frames: usize,

    /// Input device name; default device when `None`
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            block_frames: 1024,
            input_device: None,
        }
    }
}

/// How an utterance is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Calibrate, wait for onset, end on silence tail
    Vad,
    /// Like `Vad`, but onset is only allowed after a run of pre-silence
    PreSilenceGated { pre_silence_ms: u32 },
    /// Record a fixed duration without any detection
    Fixed { duration_ms: u32 },
}

/// Input device class, selects the absolute threshold floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Minimum activation threshold for this class of input
    #[must_use]
    pub const fn absolute_floor(self) -> f32 {
        match self {
            Self::Desktop => 0.01,
            Self::Mobile => 0.05,
        }
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "desktop" | "pc" => Ok(Self::Desktop),
            "mobile" | "phone" | "termux" => Ok(Self::Mobile),
            other => Err(Error::Config(format!("unknown device class: {other}"))),
        }
    }
}

/// Voice activity detection configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Segmentation mode
    pub mode: CaptureMode,

    /// Configured minimum activation threshold
    pub min_threshold: f32,

    /// Absolute floor for the activation threshold
    pub absolute_floor: f32,

    /// Release threshold = activation × hysteresis
    pub hysteresis: f32,

    /// Ambient noise sampling window
    pub calibration_ms: u32,

    /// Minimum talk time for an utterance to count
    pub min_talk_ms: u32,

    /// Silence needed after speech to end the utterance
    pub silence_tail_ms: u32,

    /// Trailing silence kept at the end of an utterance
    pub tail_keep_ms: u32,

    /// How long to wait for an onset before giving up
    pub onset_wait_ms: u32,

    /// Hard ceiling on voiced duration
    pub max_utterance_ms: u32,

    /// Recalibration attempts after "no speech" before giving up
    pub max_calibration_retries: u32,

    /// Length of a silent utterance returned when retries are exhausted; off when `None`
    pub silent_fallback_ms: Option<u32>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Vad,
            min_threshold: 0.015,
            absolute_floor: DeviceClass::Desktop.absolute_floor(),
            hysteresis: DEFAULT_HYSTERESIS,
            calibration_ms: 700,
            min_talk_ms: 300,
            silence_tail_ms: 600,
            tail_keep_ms: 300,
            onset_wait_ms: 5_000,
            max_utterance_ms: 20_000,
            max_calibration_retries: 3,
            silent_fallback_ms: None,
        }
    }
}

/// Client network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Socket read/write chunk size
    pub chunk_size: usize,

    /// Connect timeout
    pub connect_timeout: Duration,

    /// Send timeout
    pub send_timeout: Duration,

    /// Receive timeout (large: the peer may be loading models)
    pub receive_timeout: Duration,

    /// Largest frame payload accepted
    pub max_frame_len: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            chunk_size: 4096,
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(120),
            receive_timeout: Duration::from_secs(300),
            max_frame_len: 256 * 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    /// `host:port` of the server
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One external TTS program; `{text}` and `{out}` in `args` are substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtsCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Assistant server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Timeout for receiving the request frame
    pub receive_timeout: Duration,

    /// Timeout for sending the reply frame
    pub send_timeout: Duration,

    /// OpenAI-compatible transcription endpoint base URL
    pub stt_url: String,

    /// Transcription model name
    pub stt_model: String,

    /// Spoken language hint; autodetect when `None`
    pub stt_language: Option<String>,

    /// Bearer key for the transcription endpoint
    pub stt_api_key: Option<String>,

    /// Ollama base URL
    pub llm_url: String,

    /// Ollama model
    pub llm_model: String,

    /// LLM HTTP timeout
    pub llm_timeout: Duration,

    /// System prompt for the conversation
    pub system_prompt: String,

    /// File with one friend name per line
    pub friends_file: Option<PathBuf>,

    /// Ordered TTS backends
    pub tts: Vec<TtsCommand>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            receive_timeout: Duration::from_secs(120),
            send_timeout: Duration::from_secs(120),
            stt_url: "http://127.0.0.1:8000".to_string(),
            stt_model: "Systran/faster-whisper-small".to_string(),
            stt_language: None,
            stt_api_key: None,
            llm_url: "http://127.0.0.1:11434".to_string(),
            llm_model: "llama3.2:latest".to_string(),
            llm_timeout: Duration::from_secs(60),
            system_prompt: "You are a voice assistant. Answer briefly and clearly. \
                            You may be a little playful with jokes, but stay respectful."
                .to_string(),
            friends_file: None,
            tts: default_tts_commands(),
        }
    }
}

fn default_tts_commands() -> Vec<TtsCommand> {
    let template = || vec!["-w".to_string(), "{out}".to_string(), "{text}".to_string()];
    vec![
        TtsCommand {
            program: "espeak-ng".to_string(),
            args: template(),
        },
        TtsCommand {
            program: "pico2wave".to_string(),
            args: template(),
        },
    ]
}

/// Interactive client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the reply WAV is persisted
    pub response_path: PathBuf,

    /// Where the captured utterance is saved for inspection; skipped when `None`
    pub recording_path: Option<PathBuf>,

    /// Ordered playback backends
    pub players: Vec<String>,

    /// Pause after playback so the reply's echo is not captured
    pub anti_echo: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_path: PathBuf::from("response.wav"),
            recording_path: None,
            players: ["cpal", "termux-media-player", "aplay", "paplay"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            anti_echo: Duration::from_millis(600),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|s| match s.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %s, "ignoring unparsable environment value");
            None
        }
    })
}

fn parse_mode(
    name: Option<&str>,
    pre_silence_ms: Option<u32>,
    fixed_duration_ms: Option<u32>,
) -> Result<CaptureMode> {
    match name.map(|n| n.trim().to_lowercase()).as_deref() {
        None | Some("vad") => Ok(CaptureMode::Vad),
        Some("gated" | "pre-silence" | "pre_silence") => Ok(CaptureMode::PreSilenceGated {
            pre_silence_ms: pre_silence_ms.unwrap_or(350),
        }),
        Some("fixed" | "push-to-talk" | "push_to_talk") => Ok(CaptureMode::Fixed {
            duration_ms: fixed_duration_ms.unwrap_or(20_000),
        }),
        Some(other) => Err(Error::Config(format!("unknown capture mode: {other}"))),
    }
}

impl Config {
    /// Load configuration from the default file location and the environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an explicit file path
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        let defaults = Self::default();

        let audio = AudioConfig {
            sample_rate: env_parse("VOXRELAY_SAMPLE_RATE")
                .or(fc.audio.sample_rate)
                .unwrap_or(defaults.audio.sample_rate),
            channels: fc.audio.channels.unwrap_or(defaults.audio.channels),
            block_frames: env_parse("VOXRELAY_BLOCK_FRAMES")
                .or(fc.audio.block_frames)
                .unwrap_or(defaults.audio.block_frames),
            input_device: env_string("VOXRELAY_INPUT_DEVICE").or(fc.audio.input_device),
        };

        // Device class picks the floor unless an explicit floor is given
        let device_class = match env_string("VOXRELAY_DEVICE_CLASS").or(fc.vad.device_class) {
            Some(s) => s.parse()?,
            None => DeviceClass::default(),
        };
        let mode_name = env_string("VOXRELAY_CAPTURE_MODE").or(fc.vad.mode);
        let dv = &defaults.vad;
        let vad = VadConfig {
            mode: parse_mode(
                mode_name.as_deref(),
                fc.vad.pre_silence_ms,
                fc.vad.fixed_duration_ms,
            )?,
            min_threshold: env_parse("VOXRELAY_VAD_MIN_THRESHOLD")
                .or(fc.vad.min_threshold)
                .unwrap_or(dv.min_threshold),
            absolute_floor: fc
                .vad
                .absolute_floor
                .unwrap_or_else(|| device_class.absolute_floor()),
            hysteresis: fc.vad.hysteresis.unwrap_or(dv.hysteresis),
            calibration_ms: fc.vad.calibration_ms.unwrap_or(dv.calibration_ms),
            min_talk_ms: fc.vad.min_talk_ms.unwrap_or(dv.min_talk_ms),
            silence_tail_ms: fc.vad.silence_tail_ms.unwrap_or(dv.silence_tail_ms),
            tail_keep_ms: fc.vad.tail_keep_ms.unwrap_or(dv.tail_keep_ms),
            onset_wait_ms: fc.vad.onset_wait_ms.unwrap_or(dv.onset_wait_ms),
            max_utterance_ms: fc.vad.max_utterance_ms.unwrap_or(dv.max_utterance_ms),
            max_calibration_retries: fc
                .vad
                .max_calibration_retries
                .unwrap_or(dv.max_calibration_retries),
            silent_fallback_ms: fc.vad.silent_fallback_ms.or(dv.silent_fallback_ms),
        };

        let dn = &defaults.network;
        let network = NetworkConfig {
            host: env_string("VOXRELAY_HOST")
                .or(fc.network.host)
                .unwrap_or_else(|| dn.host.clone()),
            port: env_parse("VOXRELAY_PORT")
                .or(fc.network.port)
                .unwrap_or(dn.port),
            chunk_size: fc.network.chunk_size.unwrap_or(dn.chunk_size),
            connect_timeout: fc
                .network
                .connect_timeout_secs
                .map_or(dn.connect_timeout, Duration::from_secs),
            send_timeout: fc
                .network
                .send_timeout_secs
                .map_or(dn.send_timeout, Duration::from_secs),
            receive_timeout: fc
                .network
                .receive_timeout_secs
                .map_or(dn.receive_timeout, Duration::from_secs),
            max_frame_len: fc.network.max_frame_bytes.unwrap_or(dn.max_frame_len),
        };

        let ds = defaults.server;
        let server = ServerConfig {
            bind: env_string("VOXRELAY_BIND")
                .or(fc.server.bind)
                .unwrap_or(ds.bind),
            receive_timeout: fc
                .server
                .receive_timeout_secs
                .map_or(ds.receive_timeout, Duration::from_secs),
            send_timeout: fc
                .server
                .send_timeout_secs
                .map_or(ds.send_timeout, Duration::from_secs),
            stt_url: env_string("VOXRELAY_STT_URL")
                .or(fc.server.stt_url)
                .unwrap_or(ds.stt_url),
            stt_model: env_string("VOXRELAY_STT_MODEL")
                .or(fc.server.stt_model)
                .unwrap_or(ds.stt_model),
            stt_language: env_string("VOXRELAY_STT_LANGUAGE").or(fc.server.stt_language),
            stt_api_key: env_string("OPENAI_API_KEY"),
            llm_url: env_string("VOXRELAY_LLM_URL")
                .or(fc.server.llm_url)
                .unwrap_or(ds.llm_url),
            llm_model: env_string("VOXRELAY_LLM_MODEL")
                .or(fc.server.llm_model)
                .unwrap_or(ds.llm_model),
            llm_timeout: fc
                .server
                .llm_timeout_secs
                .map_or(ds.llm_timeout, Duration::from_secs),
            system_prompt: fc.server.system_prompt.unwrap_or(ds.system_prompt),
            friends_file: env_string("VOXRELAY_FRIENDS_FILE")
                .or(fc.server.friends_file)
                .map(PathBuf::from),
            tts: fc.server.tts.map_or(ds.tts, |cmds| {
                cmds.into_iter()
                    .map(|c| TtsCommand {
                        program: c.program,
                        args: c.args,
                    })
                    .collect()
            }),
        };

        let dc = defaults.client;
        let client = ClientConfig {
            response_path: fc
                .client
                .response_path
                .map_or(dc.response_path, PathBuf::from),
            recording_path: fc.client.recording_path.map(PathBuf::from),
            players: fc.client.players.unwrap_or(dc.players),
            anti_echo: fc
                .client
                .anti_echo_ms
                .map_or(dc.anti_echo, Duration::from_millis),
        };

        let config = Self {
            audio,
            vad,
            network,
            server,
            client,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the audio and transport layers rely on
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending value
    pub fn validate(&self) -> Result<()> {
        let vad = &self.vad;
        if !(vad.hysteresis > 0.0 && vad.hysteresis < 1.0) {
            return Err(Error::Config(format!(
                "hysteresis must be in (0, 1), got {}",
                vad.hysteresis
            )));
        }
        if !(vad.absolute_floor > 0.0 && vad.absolute_floor <= 1.0) {
            return Err(Error::Config(format!(
                "absolute threshold floor must be in (0, 1], got {}",
                vad.absolute_floor
            )));
        }
        if !(0.0..=1.0).contains(&vad.min_threshold) {
            return Err(Error::Config(format!(
                "minimum threshold must be in [0, 1], got {}",
                vad.min_threshold
            )));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 || self.audio.block_frames == 0
        {
            return Err(Error::Config(
                "sample rate, channels and block size must be non-zero".to_string(),
            ));
        }
        if self.network.chunk_size == 0 {
            return Err(Error::Config("chunk size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.block_frames, 1024);
        assert_eq!(config.vad.min_talk_ms, 300);
        assert_eq!(config.vad.silence_tail_ms, 600);
        assert_eq!(config.network.chunk_size, 4096);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.network.receive_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_hysteresis_outside_unit_interval() {
        let mut config = Config::default();
        config.vad.hysteresis = 1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.vad.hysteresis = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_floor() {
        let mut config = Config::default();
        config.vad.absolute_floor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn device_class_parsing() {
        assert_eq!("Mobile".parse::<DeviceClass>().unwrap(), DeviceClass::Mobile);
        assert_eq!("desktop".parse::<DeviceClass>().unwrap(), DeviceClass::Desktop);
        assert!("toaster".parse::<DeviceClass>().is_err());
        assert!(DeviceClass::Mobile.absolute_floor() > DeviceClass::Desktop.absolute_floor());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(parse_mode(None, None, None).unwrap(), CaptureMode::Vad);
        assert_eq!(
            parse_mode(Some("gated"), None, None).unwrap(),
            CaptureMode::PreSilenceGated { pre_silence_ms: 350 }
        );
        assert_eq!(
            parse_mode(Some("fixed"), None, Some(3000)).unwrap(),
            CaptureMode::Fixed { duration_ms: 3000 }
        );
        assert!(parse_mode(Some("psychic"), None, None).is_err());
    }

    #[test]
    fn file_values_overlay_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[vad]\nmode = \"gated\"\nabsolute_floor = 0.05\n\n[client]\nanti_echo_ms = 900\n",
        )
        .unwrap();
        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(
            config.vad.mode,
            CaptureMode::PreSilenceGated { pre_silence_ms: 350 }
        );
        assert!((config.vad.absolute_floor - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.client.anti_echo, Duration::from_millis(900));
        assert_eq!(config.vad.min_talk_ms, 300);
    }
}
