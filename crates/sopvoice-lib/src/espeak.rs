//! Local speech synthesis through the `espeak` command-line engine.
//!
//! The catalog comes from `espeak --voices`, loaded in the background after
//! [`EspeakEngine::spawn`]; until it finishes `voices()` is empty. Each
//! utterance is one `espeak` process speaking straight to the sound card, and
//! stopping it kills the process.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use sopvoice_core::types::LocalVoice;

use crate::device::{PlaybackHandle, PlaybackSource, SpeechCatalog, SpeechPlayer, Utterance};
use crate::error::DeviceError;

/// eSpeak's default speaking rate, words per minute.
pub const BASE_WPM: f32 = 175.0;

/// How long a fresh process gets to fail before it counts as speaking.
const STARTUP_GRACE: Duration = Duration::from_millis(40);

pub struct EspeakEngine {
    program: String,
    catalog: watch::Sender<Option<Vec<LocalVoice>>>,
}

impl EspeakEngine {
    /// Create the engine and start loading its voice catalog.
    pub fn spawn(program: &str) -> Arc<Self> {
        let (catalog, _) = watch::channel(None);
        let engine = Arc::new(Self {
            program: program.to_string(),
            catalog,
        });
        let loader = engine.clone();
        tokio::spawn(async move {
            let voices = loader.query_voices().await;
            info!(voices = voices.len(), "espeak: catalog loaded");
            loader.catalog.send_replace(Some(voices));
        });
        engine
    }

    async fn query_voices(&self) -> Vec<LocalVoice> {
        let output = Command::new(&self.program)
            .arg("--voices")
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => parse_voices(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                warn!(
                    "espeak: --voices failed ({}): {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                Vec::new()
            }
            Err(e) => {
                warn!("espeak: {} not available: {e}", self.program);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl SpeechCatalog for EspeakEngine {
    fn voices(&self) -> Vec<LocalVoice> {
        self.catalog.borrow().clone().unwrap_or_default()
    }

    fn is_loaded(&self) -> bool {
        self.catalog.borrow().is_some()
    }

    async fn voices_loaded(&self) {
        let mut rx = self.catalog.subscribe();
        let _ = rx.wait_for(|v| v.is_some()).await;
    }
}

#[async_trait]
impl SpeechPlayer for EspeakEngine {
    async fn speak(&self, utterance: &Utterance) -> Result<PlaybackHandle, DeviceError> {
        let wpm = words_per_minute(utterance.rate);
        debug!(
            voice = %utterance.voice.id,
            wpm,
            chars = utterance.text.len(),
            "espeak: speaking"
        );

        let mut child = Command::new(&self.program)
            .args(["-v", &utterance.voice.id, "-s", &wpm.to_string(), "--"])
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeviceError::Unavailable(format!("failed to spawn {}: {e}", self.program)))?;

        let stop = Arc::new(Notify::new());
        let (handle, done) = PlaybackHandle::new(PlaybackSource::Local, {
            let stop = stop.clone();
            move || stop.notify_one()
        });

        match tokio::time::timeout(STARTUP_GRACE, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                return Err(DeviceError::Failed(format!("espeak exited with {status}")));
            }
            Ok(Ok(_)) => {
                // Short enough to finish inside the grace period.
                done.complete();
                return Ok(handle);
            }
            Ok(Err(e)) => return Err(DeviceError::Failed(format!("espeak wait failed: {e}"))),
            Err(_) => {}
        }

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => debug!("espeak: utterance finished"),
                    Ok(s) => warn!("espeak: exited with {s}"),
                    Err(e) => warn!("espeak: wait failed: {e}"),
                },
                _ = stop.notified() => {
                    let _ = child.kill().await;
                    debug!("espeak: utterance stopped");
                }
            }
            done.complete();
        });
        Ok(handle)
    }
}

pub fn words_per_minute(rate: f32) -> u32 {
    (BASE_WPM * rate).round().max(1.0) as u32
}

/// Parse `espeak --voices` output.
///
/// ```text
/// Pty Language Age/Gender VoiceName          File          Other Languages
///  5  af             M  afrikaans            other/af
///  2  en-gb          M  english              default
/// ```
///
/// The language code is the voice id; only the first voice per language is
/// kept.
pub fn parse_voices(stdout: &str) -> Vec<LocalVoice> {
    let mut voices: Vec<LocalVoice> = Vec::new();
    for line in stdout.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let lang = parts[1].to_lowercase();
        if voices.iter().any(|v| v.id == lang) {
            continue;
        }
        voices.push(LocalVoice {
            id: lang.clone(),
            name: title_case(&parts[3].replace('_', " ")),
            lang,
        });
    }
    voices
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
