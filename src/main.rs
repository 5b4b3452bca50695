use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voxrelay::assistant::Assistant;
use voxrelay::transport::{Exchange, Framing, Server};
use voxrelay::voice::{
    BlockReader, Calibrator, CancelToken, CpalPlayer, Microphone, Utterance, level,
};
use voxrelay::{Config, Session};

/// Voxrelay - voice assistant client and server over a framed TCP link
#[derive(Parser)]
#[command(name = "voxrelay", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: ~/.config/voxrelay/config.toml)
    #[arg(long, global = true, env = "VOXRELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the assistant server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<String>,
    },
    /// Interactive client: ENTER toggles listening
    Talk {
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send a WAV file and save the reply
    Send {
        /// WAV file to send
        wav: PathBuf,
        /// Where to write the reply
        #[arg(short, long, default_value = "response.wav")]
        out: PathBuf,
        /// Server host
        #[arg(long)]
        host: Option<String>,
        /// Server port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` when set and valid, otherwise the `-v` level
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    let fallback = match verbose {
        0 => "info,voxrelay=info",
        1 => "info,voxrelay=debug",
        2 => "debug",
        _ => "trace",
    };

    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_from(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await
        }
        Command::Talk { host, port } => {
            apply_server_addr(&mut config, host, port);
            talk(config).await
        }
        Command::Send {
            wav,
            out,
            host,
            port,
        } => {
            apply_server_addr(&mut config, host, port);
            send(&config, &wav, &out).await
        }
        Command::TestMic { duration } => test_mic(config, duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

fn apply_server_addr(config: &mut Config, host: Option<String>, port: Option<u16>) {
    if let Some(host) = host {
        config.network.host = host;
    }
    if let Some(port) = port {
        config.network.port = port;
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let assistant = Assistant::from_config(&config.server)?;
    let server = Server::bind(&config.server, Framing::from(&config.network), assistant).await?;

    tracing::info!(
        stt = %config.server.stt_url,
        llm = %config.server.llm_url,
        model = %config.server.llm_model,
        "assistant ready (Ctrl+C to stop)"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
            }
        })
        .await?;
    Ok(())
}

async fn talk(config: Config) -> anyhow::Result<()> {
    println!("Server: {}", config.network.addr());
    Session::new(config).run().await?;
    Ok(())
}

async fn send(config: &Config, wav: &Path, out: &Path) -> anyhow::Result<()> {
    let audio = tokio::fs::read(wav).await?;
    let exchange = Exchange::new(&config.network);

    let started = Instant::now();
    let bytes = exchange.run_to_file(&audio, out).await?;
    println!(
        "Sent {} bytes, got {bytes} bytes back in {:.1}s -> {}",
        audio.len(),
        started.elapsed().as_secs_f32(),
        out.display()
    );
    Ok(())
}

/// Level meter plus calibration readout
async fn test_mic(config: Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Stay quiet for the first second, then speak.\n");

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut mic = Microphone::open(&config.audio)?;
        let format = mic.format();
        println!(
            "Format: {} Hz, {} channel(s), {} frames per block",
            format.sample_rate, format.channels, format.block_frames
        );

        let calibration = Calibrator::from_config(&config.vad)
            .calibrate(&mut mic, config.vad.calibration_ms, &CancelToken::new())?
            .context("calibration was cancelled")?;
        println!(
            "Noise: {:.4} | Activation: {:.4} | Release: {:.4}",
            calibration.noise_floor(),
            calibration.activation_threshold(),
            calibration.release_threshold()
        );
        println!("---");

        let deadline = Instant::now() + Duration::from_secs(duration);
        let mut second = 0;
        while Instant::now() < deadline {
            let window = Instant::now() + Duration::from_secs(1);
            let mut peak = 0.0_f32;
            while Instant::now() < window {
                peak = peak.max(level(mic.read_block()?.samples()));
            }
            second += 1;

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (peak * 200.0).min(50.0) as usize;
            let meter = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);
            let marker = if peak > calibration.activation_threshold() {
                "speech"
            } else {
                ""
            };
            println!("[{second:2}s] level: {peak:.4} | [{meter}] {marker}");
        }
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Set audio.input_device in the config file");

    Ok(())
}

/// Play a 440 Hz tone
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 16_000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();
    let tone = Utterance::new(samples, sample_rate, 1);

    tokio::task::spawn_blocking(move || CpalPlayer::new().play_audio(&tone)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
