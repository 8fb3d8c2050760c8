//! TTS worker subprocess driver.
//!
//! The worker is an external executable speaking a small CLI + JSON-on-stdout
//! protocol. The child handle is owned by the call: a watchdog timeout drops
//! it (kill-on-drop) and both pipes are fully drained before the handle is
//! released. Stderr is treated as a progress log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

/// Wall-clock budget for a generation run.
pub const TTS_TIMEOUT: Duration = Duration::from_secs(300);

/// TTS scripts are capped to keep synthesis time bounded.
pub const TTS_TEXT_LIMIT: usize = 5_000;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("tts worker timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to launch tts worker: {0}")]
    Spawn(std::io::Error),

    #[error("tts worker failed: {0}")]
    Worker(String),

    #[error("unexpected tts worker output: {0}")]
    Parse(String),
}

/// Parsed worker result. The JSON may carry fields beyond these; the raw
/// value is preserved for the response payload.
#[derive(Debug, Clone, Serialize)]
pub struct TtsResult {
    pub success: bool,
    pub output_file: Option<String>,
    pub duration: Option<f64>,
    pub raw: serde_json::Value,
}

pub struct TtsWorker {
    executable: PathBuf,
    timeout: Duration,
}

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d{1,2}:\d{2}\]").expect("timestamp regex"));
static CUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:HOST|NARRATOR|SPEAKER)\s*\d*\s*:\s*").expect("cue regex"));
static STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("stage regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Prepare a script for synthesis: drop timestamps, speaker cues, and stage
/// directions, collapse whitespace, and cap the length.
pub fn normalize_for_tts(script: &str) -> String {
    let text = TIMESTAMP_RE.replace_all(script, " ");
    let text = CUE_RE.replace_all(&text, "");
    let text = STAGE_RE.replace_all(&text, " ");
    let text = WS_RE.replace_all(&text, " ");
    text.trim().chars().take(TTS_TEXT_LIMIT).collect()
}

impl TtsWorker {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: TTS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: Vec<String>) -> Result<serde_json::Value, TtsError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(worker = %self.executable.display(), "spawning tts worker");
        let child = cmd.spawn().map_err(TtsError::Spawn)?;

        // wait_with_output drains both pipes; on timeout the dropped handle
        // kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TtsError::Worker(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "tts worker exceeded its budget and was killed"
                );
                return Err(TtsError::Timeout(self.timeout));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(target: "tts_worker", "{line}");
        }

        if !output.status.success() {
            return Err(TtsError::Worker(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim())
            .map_err(|e| TtsError::Parse(format!("{e}: {}", truncate(stdout.trim(), 200))))
    }

    /// Generate audio for `text` into `<output_dir>/<output_file>`.
    pub async fn generate(
        &self,
        text: &str,
        voice: &str,
        preset: &str,
        output_file: &str,
        output_dir: &Path,
        custom_voice: Option<&Path>,
    ) -> Result<TtsResult, TtsError> {
        let mut args = vec![
            "--text".to_string(),
            text.to_string(),
            "--voice".to_string(),
            voice.to_string(),
            "--preset".to_string(),
            preset.to_string(),
            "--output".to_string(),
            output_file.to_string(),
            "--output-dir".to_string(),
            output_dir.display().to_string(),
        ];
        if let Some(path) = custom_voice {
            args.push("--custom-voice".to_string());
            args.push(path.display().to_string());
        }

        let raw = self.run(args).await?;
        Ok(TtsResult {
            success: raw.get("success").and_then(|v| v.as_bool()).unwrap_or(false),
            output_file: raw
                .get("output_file")
                .and_then(|v| v.as_str())
                .map(String::from),
            duration: raw.get("duration").and_then(|v| v.as_f64()),
            raw,
        })
    }

    pub async fn list_voices(&self) -> Result<serde_json::Value, TtsError> {
        self.run(vec!["--list-voices".to_string()]).await
    }

    pub async fn create_voice(
        &self,
        name: &str,
        description: &str,
        audio_files: &[String],
    ) -> Result<serde_json::Value, TtsError> {
        self.run(vec![
            "--create-voice".to_string(),
            name.to_string(),
            "--description".to_string(),
            description.to_string(),
            "--audio-files".to_string(),
            audio_files.join(","),
        ])
        .await
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_cues_timestamps_and_directions() {
        let script = "HOST: Welcome back. [0:15] [applause]\nNARRATOR: Today we cover [12:30] three rallies.\nSPEAKER 2: Indeed.";
        let cleaned = normalize_for_tts(script);
        assert_eq!(
            cleaned,
            "Welcome back. Today we cover three rallies. Indeed."
        );
    }

    #[test]
    fn normalization_caps_length() {
        let script = "a".repeat(TTS_TEXT_LIMIT + 500);
        assert_eq!(normalize_for_tts(&script).chars().count(), TTS_TEXT_LIMIT);
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(normalize_for_tts("one\n\n   two\tthree"), "one two three");
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        fn fake_worker(dir: &std::path::Path, body: &str) -> PathBuf {
            let path = dir.join("fake-tts");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh").unwrap();
            writeln!(file, "{body}").unwrap();
            drop(file);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn successful_run_parses_json_result() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_worker(
                dir.path(),
                r#"echo '{"success": true, "output_file": "out.wav", "duration": 12.5, "extra": "ignored"}'"#,
            );
            let worker = TtsWorker::new(bin);
            let result = worker
                .generate("hello", "narrator", "fast", "out.wav", dir.path(), None)
                .await
                .unwrap();
            assert!(result.success);
            assert_eq!(result.output_file.as_deref(), Some("out.wav"));
            assert_eq!(result.duration, Some(12.5));
            assert_eq!(result.raw["extra"], "ignored");
        }

        #[tokio::test]
        async fn nonzero_exit_surfaces_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_worker(dir.path(), r#"echo "model load failed" >&2; exit 3"#);
            let worker = TtsWorker::new(bin);
            let err = worker
                .generate("hello", "narrator", "fast", "out.wav", dir.path(), None)
                .await
                .unwrap_err();
            match err {
                TtsError::Worker(msg) => assert!(msg.contains("model load failed")),
                other => panic!("expected Worker error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn overrunning_worker_is_killed() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_worker(dir.path(), "sleep 600");
            let worker = TtsWorker::new(bin).with_timeout(Duration::from_millis(200));
            let started = std::time::Instant::now();
            let err = worker
                .generate("hello", "narrator", "fast", "out.wav", dir.path(), None)
                .await
                .unwrap_err();
            assert!(matches!(err, TtsError::Timeout(_)));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn garbage_stdout_is_a_parse_error() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_worker(dir.path(), "echo not-json");
            let worker = TtsWorker::new(bin);
            let err = worker.list_voices().await.unwrap_err();
            assert!(matches!(err, TtsError::Parse(_)));
        }
    }
}
