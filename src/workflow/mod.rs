//! Workflow engine: the draft → script → audio → finalized state machine.
//!
//! Transitions are serial per workflow and persisted through the store; a
//! failed script generation leaves the record untouched. The audio stage is
//! deliberately forgiving: a worker failure records a placeholder audio path
//! and still advances, so a user can reach `finalized` with a stub.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::llm::orchestrator::{Orchestrator, ScriptOutcome, ScriptRequest};
use crate::llm::LlmError;
use crate::store::{Speech, Store, StoreError, Workflow, WorkflowPatch, WorkflowStatus};

pub mod feed;
pub mod tts;

use feed::{render_feed, EnclosureMode, FeedInput};
use tts::{normalize_for_tts, TtsError, TtsResult, TtsWorker};

/// Upload cap, in characters.
pub const MAX_SCRIPT_CHARS: usize = 50_000;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A transition precondition failed; surfaced as a 400.
    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("bundle io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of the audio stage. `fallback` marks a worker failure that was
/// absorbed by the placeholder path.
#[derive(Debug, Clone, Serialize)]
pub struct AudioOutcome {
    pub audio_url: String,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub rss_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
}

fn ensure_transition(
    current: WorkflowStatus,
    allowed: &[WorkflowStatus],
    action: &str,
) -> Result<(), WorkflowError> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(WorkflowError::Precondition(format!(
            "cannot {action} while workflow is {current}"
        )))
    }
}

pub struct WorkflowEngine {
    store: Store,
    orchestrator: Arc<Orchestrator>,
    tts: TtsWorker,
    data_dir: PathBuf,
}

impl WorkflowEngine {
    pub fn new(
        store: Store,
        orchestrator: Arc<Orchestrator>,
        tts: TtsWorker,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            orchestrator,
            tts,
            data_dir,
        }
    }

    pub async fn create(
        &self,
        name: &str,
        speech_ids: &[String],
    ) -> Result<Workflow, WorkflowError> {
        if speech_ids.is_empty() {
            return Err(WorkflowError::Precondition(
                "speechIds must not be empty".into(),
            ));
        }
        Ok(self.store.create_workflow(name, speech_ids).await?)
    }

    pub async fn get_with_speeches(
        &self,
        id: &str,
    ) -> Result<(Workflow, Vec<Speech>), WorkflowError> {
        let workflow = self.store.get_workflow(id).await?;
        let (speeches, _missing) = self.store.resolve_speeches(&workflow.speech_ids).await?;
        Ok((workflow, speeches))
    }

    /// Generate the script via the orchestrator and advance to
    /// `script_generated`. A failed generation writes nothing.
    pub async fn generate_script(
        &self,
        id: &str,
        req: &ScriptRequest,
    ) -> Result<(Workflow, ScriptOutcome), WorkflowError> {
        let workflow = self.store.get_workflow(id).await?;
        ensure_transition(
            workflow.status,
            &[
                WorkflowStatus::Draft,
                WorkflowStatus::ScriptGenerated,
                WorkflowStatus::ScriptUploaded,
            ],
            "generate a script",
        )?;

        let (speeches, missing) = self.store.resolve_speeches(&workflow.speech_ids).await?;
        if !missing.is_empty() {
            return Err(WorkflowError::Precondition(format!(
                "unknown speech ids: {}",
                missing.join(", ")
            )));
        }
        if speeches.is_empty() {
            return Err(WorkflowError::Precondition(
                "workflow has no resolvable speeches".into(),
            ));
        }

        let outcome = self.orchestrator.generate(&speeches, req).await?;

        let updated = self
            .store
            .update_workflow(
                id,
                &WorkflowPatch {
                    script: Some(outcome.script.clone()),
                    status: Some(WorkflowStatus::ScriptGenerated),
                    ..WorkflowPatch::default()
                },
            )
            .await?;

        tracing::info!(
            workflow_id = id,
            strategy = ?outcome.strategy,
            chars = outcome.script.len(),
            "script generated"
        );
        Ok((updated, outcome))
    }

    /// Accept a caller-provided script and advance to `script_uploaded`.
    pub async fn upload_script(
        &self,
        id: &str,
        script: &str,
    ) -> Result<Workflow, WorkflowError> {
        if script.trim().is_empty() {
            return Err(WorkflowError::Precondition("script must not be empty".into()));
        }
        if script.chars().count() > MAX_SCRIPT_CHARS {
            return Err(WorkflowError::Precondition(format!(
                "script exceeds {MAX_SCRIPT_CHARS} characters"
            )));
        }

        let workflow = self.store.get_workflow(id).await?;
        ensure_transition(
            workflow.status,
            &[
                WorkflowStatus::Draft,
                WorkflowStatus::ScriptGenerated,
                WorkflowStatus::ScriptUploaded,
            ],
            "upload a script",
        )?;

        let updated = self
            .store
            .update_workflow(
                id,
                &WorkflowPatch {
                    script: Some(script.to_string()),
                    status: Some(WorkflowStatus::ScriptUploaded),
                    ..WorkflowPatch::default()
                },
            )
            .await?;
        Ok(updated)
    }

    /// Drive the TTS worker and advance to `audio_generated`. Worker failure
    /// records the placeholder path with `fallback: true` instead of failing
    /// the workflow.
    pub async fn generate_audio(
        &self,
        id: &str,
        voice: &str,
        preset: &str,
        custom_voice: Option<&std::path::Path>,
    ) -> Result<(Workflow, AudioOutcome), WorkflowError> {
        let workflow = self.store.get_workflow(id).await?;
        ensure_transition(
            workflow.status,
            &[
                WorkflowStatus::ScriptGenerated,
                WorkflowStatus::ScriptUploaded,
                WorkflowStatus::AudioGenerated,
            ],
            "generate audio",
        )?;
        let script = workflow.script.as_deref().ok_or_else(|| {
            WorkflowError::Precondition("workflow has no script yet".into())
        })?;

        let text = normalize_for_tts(script);
        let output_file = format!("{id}.wav");
        let audio_dir = self.data_dir.join("audio");
        tokio::fs::create_dir_all(&audio_dir).await?;

        let audio_url = format!("audio/{output_file}");
        let outcome = match self
            .tts
            .generate(&text, voice, preset, &output_file, &audio_dir, custom_voice)
            .await
        {
            Ok(result) if result.success => AudioOutcome {
                audio_url: audio_url.clone(),
                fallback: false,
                error: None,
                tts: Some(result),
            },
            Ok(result) => {
                tracing::warn!(workflow_id = id, "tts worker reported failure, recording fallback audio");
                AudioOutcome {
                    audio_url: audio_url.clone(),
                    fallback: true,
                    error: Some("tts worker reported failure".into()),
                    tts: Some(result),
                }
            }
            Err(e) => {
                tracing::warn!(workflow_id = id, error = %e, "tts worker failed, recording fallback audio");
                AudioOutcome {
                    audio_url: audio_url.clone(),
                    fallback: true,
                    error: Some(e.to_string()),
                    tts: None,
                }
            }
        };

        let updated = self
            .store
            .update_workflow(
                id,
                &WorkflowPatch {
                    audio_url: Some(audio_url),
                    status: Some(WorkflowStatus::AudioGenerated),
                    ..WorkflowPatch::default()
                },
            )
            .await?;

        Ok((updated, outcome))
    }

    /// Package the episode: a self-contained bundle directory or a single
    /// RSS file. Advances to `finalized`.
    pub async fn finalize(
        &self,
        id: &str,
        title: Option<&str>,
        description: Option<&str>,
        local_bundle: bool,
    ) -> Result<(Workflow, FinalizeOutcome), WorkflowError> {
        let workflow = self.store.get_workflow(id).await?;
        ensure_transition(workflow.status, &[WorkflowStatus::AudioGenerated], "finalize")?;

        let script = workflow.script.as_deref().ok_or_else(|| {
            WorkflowError::Precondition("workflow has no script yet".into())
        })?;
        let audio_url = workflow.audio_url.as_deref().ok_or_else(|| {
            WorkflowError::Precondition("workflow has no audio yet".into())
        })?;

        let title = title.unwrap_or(&workflow.name);
        let description = description.unwrap_or("");
        let now = Utc::now();

        let outcome = if local_bundle {
            let bundle_dir = self.data_dir.join("bundles").join(id);
            let bundle_audio_dir = bundle_dir.join("audio");
            tokio::fs::create_dir_all(&bundle_audio_dir).await?;

            let audio_src = self.data_dir.join(audio_url);
            let audio_file = audio_src
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{id}.wav"));
            let mut enclosure = None;
            if audio_src.is_file() {
                tokio::fs::copy(&audio_src, bundle_audio_dir.join(&audio_file)).await?;
                enclosure = Some(format!("audio/{audio_file}"));
            }

            let xml = render_feed(
                &FeedInput {
                    title,
                    description,
                    script: Some(script),
                    audio: enclosure.as_deref(),
                },
                EnclosureMode::Relative,
                now,
            );
            tokio::fs::write(bundle_dir.join("podcast.xml"), &xml).await?;

            let readme = serde_json::json!({
                "workflow_id": id,
                "title": title,
                "created_at": now.to_rfc3339(),
                "contents": {
                    "feed": "podcast.xml",
                    "audio": enclosure,
                },
            });
            tokio::fs::write(
                bundle_dir.join("README.json"),
                serde_json::to_string_pretty(&readme).unwrap_or_default(),
            )
            .await?;

            FinalizeOutcome {
                rss_url: format!("bundles/{id}/podcast.xml"),
                bundle_path: Some(format!("bundles/{id}")),
            }
        } else {
            let rss_dir = self.data_dir.join("rss");
            tokio::fs::create_dir_all(&rss_dir).await?;
            let xml = render_feed(
                &FeedInput {
                    title,
                    description,
                    script: Some(script),
                    audio: Some(&format!("/{audio_url}")),
                },
                EnclosureMode::Absolute,
                now,
            );
            tokio::fs::write(rss_dir.join(format!("{id}.xml")), &xml).await?;
            FinalizeOutcome {
                rss_url: format!("rss/{id}.xml"),
                bundle_path: None,
            }
        };

        let updated = self
            .store
            .update_workflow(
                id,
                &WorkflowPatch {
                    rss_url: Some(outcome.rss_url.clone()),
                    status: Some(WorkflowStatus::Finalized),
                    ..WorkflowPatch::default()
                },
            )
            .await?;

        tracing::info!(workflow_id = id, rss_url = %outcome.rss_url, "workflow finalized");
        Ok((updated, outcome))
    }

    /// Passthroughs to the worker's voice-management protocol.
    pub async fn list_voices(&self) -> Result<serde_json::Value, TtsError> {
        self.tts.list_voices().await
    }

    pub async fn create_voice(
        &self,
        name: &str,
        description: &str,
        audio_files: &[String],
    ) -> Result<serde_json::Value, TtsError> {
        self.tts.create_voice(name, description, audio_files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_guard_names_action_and_state() {
        let err = ensure_transition(
            WorkflowStatus::Finalized,
            &[WorkflowStatus::AudioGenerated],
            "finalize",
        )
        .unwrap_err();
        match err {
            WorkflowError::Precondition(msg) => {
                assert!(msg.contains("finalize"));
                assert!(msg.contains("finalized"));
            }
            other => panic!("expected precondition error, got {other:?}"),
        }

        assert!(ensure_transition(
            WorkflowStatus::ScriptUploaded,
            &[
                WorkflowStatus::ScriptGenerated,
                WorkflowStatus::ScriptUploaded,
                WorkflowStatus::AudioGenerated,
            ],
            "generate audio",
        )
        .is_ok());
    }
}
