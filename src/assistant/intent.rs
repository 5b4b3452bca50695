//! Keyword intents answered without the LLM

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Timer length when the request names none
pub const DEFAULT_TIMER: Duration = Duration::from_secs(300);

/// Longest timer accepted; longer requests get [`DEFAULT_TIMER`]
pub const MAX_TIMER: Duration = Duration::from_secs(24 * 3600);

const SILENCE_KEYWORDS: &[&str] = &["shut up", "be quiet", "silence", "stop", "callate", "silencio"];

const TIMER_KEYWORDS: &[&str] = &[
    "timer",
    "alarm",
    "countdown",
    "remind me in",
    "temporizador",
    "alarma",
    "cuenta atras",
    "avisame en",
];

const FRIENDS_KEYWORDS: &[&str] = &[
    "list friends",
    "list my friends",
    "friends list",
    "listar amigos",
    "lista de amigos",
];

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s*:\s*(\d+)(?:\s*:\s*(\d+))?\b").expect("valid regex")
});

static AMOUNT_WITH_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+(?:\.\d+)?)\s*(hours?|hrs?|horas?|h|minutes?|minutos?|mins?|m|seconds?|segundos?|secs?|segs?|s)\b",
    )
    .expect("valid regex")
});

static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+(?:\.\d+)?)\b").expect("valid regex"));

/// A request the server answers itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Stop talking
    Silence,
    /// Start a timer
    Timer(Duration),
    /// Read the friends list
    ListFriends,
}

/// Lowercase, fold accents, and collapse everything but letters and digits to single spaces
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text.chars().flat_map(char::to_lowercase).map(fold_accent).collect();
    let mut out = String::with_capacity(folded.len());
    for word in folded
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}

/// Whether any keyword appears in `normalized` as whole words
fn contains_any(normalized: &str, keywords: &[&str]) -> bool {
    let padded = format!(" {normalized} ");
    keywords
        .iter()
        .any(|k| padded.contains(&format!(" {} ", normalize(k))))
}

/// Recognise an intent in a transcript
#[must_use]
pub fn detect(text: &str) -> Option<Intent> {
    let normalized = normalize(text);
    if contains_any(&normalized, SILENCE_KEYWORDS) {
        return Some(Intent::Silence);
    }
    if contains_any(&normalized, TIMER_KEYWORDS) {
        return Some(Intent::Timer(parse_duration(text)));
    }
    if contains_any(&normalized, FRIENDS_KEYWORDS) {
        return Some(Intent::ListFriends);
    }
    None
}

/// Parse a spoken duration
///
/// Accepts `h:m:s`, `m:s`, number plus unit (summed), or a bare number meaning
/// minutes. Anything else, or anything longer than [`MAX_TIMER`], is
/// [`DEFAULT_TIMER`].
#[must_use]
pub fn parse_duration(text: &str) -> Duration {
    let text: String = text.chars().flat_map(char::to_lowercase).map(fold_accent).collect();

    if let Some(caps) = CLOCK.captures(&text) {
        let field = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u64>().ok())
        };
        match (field(1), field(2), field(3)) {
            (Some(h), Some(m), Some(s)) => {
                let total = h
                    .checked_mul(3600)
                    .zip(m.checked_mul(60))
                    .and_then(|(h, m)| h.checked_add(m))
                    .and_then(|hm| hm.checked_add(s));
                return bounded(total.unwrap_or(u64::MAX));
            }
            (Some(m), Some(s), None) if m <= 59 && s <= 59 => {
                return bounded(m * 60 + s);
            }
            _ => {}
        }
    }

    let mut seconds = 0.0_f64;
    for caps in AMOUNT_WITH_UNIT.captures_iter(&text) {
        let Ok(value) = caps[1].parse::<f64>() else {
            continue;
        };
        let unit = &caps[2];
        seconds += if unit.starts_with('h') {
            value * 3600.0
        } else if unit.starts_with('m') {
            value * 60.0
        } else {
            value
        };
    }

    if seconds <= 0.0 {
        if let Some(value) = BARE_NUMBER
            .captures(&text)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            seconds = value * 60.0;
        }
    }

    if seconds <= 0.0 {
        return DEFAULT_TIMER;
    }
    #[allow(clippy::cast_precision_loss)]
    let max_seconds = MAX_TIMER.as_secs() as f64;
    if !seconds.is_finite() || seconds > max_seconds {
        return DEFAULT_TIMER;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = seconds.round() as u64;
    bounded(whole)
}

/// At least one second, and never past [`MAX_TIMER`]
fn bounded(seconds: u64) -> Duration {
    if seconds > MAX_TIMER.as_secs() {
        tracing::debug!(seconds, "timer too long, using default");
        return DEFAULT_TIMER;
    }
    Duration::from_secs(seconds.max(1))
}

/// Answers intents with canned replies
#[derive(Debug, Clone, Default)]
pub struct IntentRouter {
    friends_file: Option<PathBuf>,
}

impl IntentRouter {
    #[must_use]
    pub const fn new(friends_file: Option<PathBuf>) -> Self {
        Self { friends_file }
    }

    /// Reply for `text` if it is an intent
    #[must_use]
    pub fn handle(&self, text: &str) -> Option<String> {
        let intent = detect(text)?;
        tracing::debug!(?intent, "intent matched");
        Some(self.reply(&intent))
    }

    #[must_use]
    pub fn reply(&self, intent: &Intent) -> String {
        match intent {
            Intent::Silence => "Okay, I'll be quiet.".to_string(),
            Intent::Timer(duration) => {
                let secs = duration.as_secs();
                format!(
                    "Timer set for {} minutes and {} seconds.",
                    secs / 60,
                    secs % 60
                )
            }
            Intent::ListFriends => match self.friends_file.as_deref() {
                Some(path) => list_friends(path),
                None => "I couldn't find the friends list.".to_string(),
            },
        }
    }
}

fn list_friends(path: &Path) -> String {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return "I couldn't find the friends list.".to_string();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read friends list");
            return "I couldn't read the friends list.".to_string();
        }
    };

    let names: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if names.is_empty() {
        return "The friends list is empty.".to_string();
    }
    format!("Your friends: {}.", names.join(", "))
}
