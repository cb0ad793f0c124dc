//! Workflow orchestration.
//!
//! [`WorkflowOrchestrator`] owns one executor per configured agent and a
//! table of currently tracked analyses. `execute_analysis` drives a
//! single analysis through the five phases strictly in order, committing
//! state snapshots to the table at phase boundaries so concurrent lookups
//! observe progress. Phase failures never escape: any error lands in the
//! state as a `Failed` status plus one error entry, and the finished
//! state is returned to the caller for persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use crate::decode;
use crate::errors::{ExecutorError, RegistryError};
use crate::executor::{AgentExecutor, TaskRunner, DEFAULT_TASK_DEADLINE};
use crate::models::{AgentRole, AnalysisState, AnalysisStatus};
use crate::registry::AgentRegistry;
use crate::sessions::SessionProvider;

/// Whether an analysis may move from `from` to `to`.
///
/// Status only advances forward along the ladder; `Failed` is reachable
/// from any non-terminal status; nothing leaves a terminal status.
pub fn is_valid_transition(from: AnalysisStatus, to: AnalysisStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    if to == AnalysisStatus::Failed {
        return true;
    }
    match (ladder_rank(from), ladder_rank(to)) {
        (Some(f), Some(t)) => t > f,
        _ => false,
    }
}

/// Position on the progress ladder. `Failed` sits outside it.
fn ladder_rank(status: AnalysisStatus) -> Option<u8> {
    match status {
        AnalysisStatus::Queued => Some(0),
        AnalysisStatus::Processing => Some(1),
        AnalysisStatus::DocumentParsing => Some(2),
        AnalysisStatus::ClaimExtraction => Some(3),
        AnalysisStatus::Verification => Some(4),
        AnalysisStatus::ReportGeneration => Some(5),
        AnalysisStatus::QualityReview => Some(6),
        AnalysisStatus::Completed => Some(7),
        AnalysisStatus::Failed => None,
    }
}

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Wall-clock limit per agent task.
    pub task_deadline: Duration,
    /// Capacity of the tracked-analyses table. When a new analysis would
    /// exceed it, the oldest finished entries are evicted; in-flight
    /// analyses are never evicted.
    pub max_tracked_analyses: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions {
            task_deadline: DEFAULT_TASK_DEADLINE,
            max_tracked_analyses: 256,
        }
    }
}

/// A phase that gave up, with the failing agent and a rendered message.
struct PhaseFailure {
    agent: AgentRole,
    message: String,
}

impl PhaseFailure {
    fn new(agent: AgentRole, label: &str, err: &ExecutorError) -> Self {
        PhaseFailure {
            agent,
            message: format!("{label}: {err}"),
        }
    }
}

/// Drives analyses through the fixed five-phase pipeline.
pub struct WorkflowOrchestrator {
    executors: HashMap<String, AgentExecutor>,
    sessions: Arc<SessionProvider>,
    active: Mutex<HashMap<i64, AnalysisState>>,
    options: OrchestratorOptions,
}

impl WorkflowOrchestrator {
    pub fn new(
        registry: &AgentRegistry,
        sessions: Arc<SessionProvider>,
        runner: Arc<dyn TaskRunner>,
        options: OrchestratorOptions,
    ) -> Self {
        let mut executors = HashMap::new();
        for (name, definition) in registry.iter() {
            let executor = AgentExecutor::new(
                name.to_string(),
                definition.clone(),
                &sessions,
                runner.clone(),
                options.task_deadline,
            );
            tracing::info!(agent = name, "Initialized executor");
            executors.insert(name.to_string(), executor);
        }
        WorkflowOrchestrator {
            executors,
            sessions,
            active: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Load both configuration files and assemble the orchestrator.
    ///
    /// Fails fast when either file is missing or malformed.
    pub fn from_config(
        agents_path: &Path,
        servers_path: &Path,
        runner: Arc<dyn TaskRunner>,
        options: OrchestratorOptions,
    ) -> Result<Self, RegistryError> {
        let registry = AgentRegistry::load(agents_path)?;
        let sessions = Arc::new(SessionProvider::load(servers_path)?);
        Ok(Self::new(&registry, sessions, runner, options))
    }

    /// Run one analysis through every phase and return the final state.
    ///
    /// This never fails outward: a phase error marks the state `Failed`,
    /// records exactly one error entry, and the state comes back to the
    /// caller either way for persistence.
    pub async fn execute_analysis(
        &self,
        analysis_id: i64,
        document_id: i64,
        document_path: &str,
        document_content: &str,
    ) -> AnalysisState {
        let mut state = AnalysisState::new(analysis_id, document_id);
        state.add_log("orchestrator", "Analysis workflow started");
        self.commit(&state);
        tracing::info!(analysis_id, document_id, "Analysis workflow started");

        self.advance(&mut state, AnalysisStatus::Processing);
        self.commit(&state);

        match self
            .run_pipeline(&mut state, document_path, document_content)
            .await
        {
            Ok(()) => {
                state.mark_terminal(AnalysisStatus::Completed);
                state.add_log("orchestrator", "Analysis workflow completed successfully");
                tracing::info!(analysis_id, "Analysis workflow completed successfully");
            }
            Err(failure) => {
                state.add_log(failure.agent.as_str(), &failure.message);
                state.add_error(failure.message.clone());
                state.mark_terminal(AnalysisStatus::Failed);
                tracing::error!(analysis_id, error = %failure.message, "Analysis workflow failed");
            }
        }
        self.commit(&state);
        state
    }

    /// Snapshot of a tracked analysis, if still tracked.
    pub fn get_analysis_state(&self, analysis_id: i64) -> Option<AnalysisState> {
        self.active
            .lock()
            .expect("active analyses mutex poisoned")
            .get(&analysis_id)
            .cloned()
    }

    /// Tear down shared resources. Safe to call more than once.
    pub async fn close(&self) {
        self.sessions.close_all().await;
        tracing::info!("Workflow orchestrator closed");
    }

    async fn run_pipeline(
        &self,
        state: &mut AnalysisState,
        document_path: &str,
        document_content: &str,
    ) -> Result<(), PhaseFailure> {
        self.enter_phase(state, AnalysisStatus::DocumentParsing);
        self.phase_document_processing(state, document_path, document_content)
            .await
            .map_err(|e| {
                PhaseFailure::new(AgentRole::DocumentProcessor, "Document processing failed", &e)
            })?;
        self.commit(state);

        self.enter_phase(state, AnalysisStatus::ClaimExtraction);
        self.phase_claim_extraction(state, document_content)
            .await
            .map_err(|e| PhaseFailure::new(AgentRole::FactExtractor, "Fact extraction failed", &e))?;
        self.commit(state);

        self.enter_phase(state, AnalysisStatus::Verification);
        self.phase_verification(state).await.map_err(|e| {
            PhaseFailure::new(AgentRole::VerificationSpecialist, "Verification failed", &e)
        })?;
        self.commit(state);

        self.enter_phase(state, AnalysisStatus::ReportGeneration);
        self.phase_report_generation(state).await.map_err(|e| {
            PhaseFailure::new(AgentRole::ReportWriter, "Report generation failed", &e)
        })?;
        self.commit(state);

        self.enter_phase(state, AnalysisStatus::QualityReview);
        self.phase_quality_review(state).await.map_err(|e| {
            PhaseFailure::new(AgentRole::QualityReviewer, "Quality review failed", &e)
        })?;
        self.commit(state);

        Ok(())
    }

    async fn phase_document_processing(
        &self,
        state: &mut AnalysisState,
        document_path: &str,
        document_content: &str,
    ) -> Result<(), ExecutorError> {
        let role = AgentRole::DocumentProcessor;
        state.add_log(role.as_str(), "Starting document processing");
        let executor = self.executor(role)?;
        let excerpt: String = document_content.chars().take(1000).collect();
        let prompt = format!(
            "Process the document at {document_path}.\n\n\
             Document length: {} characters. Opening excerpt:\n{excerpt}\n\n\
             Extract bibliographic metadata: title, authors, publication date, \
             institution, abstract, keywords. Respond with a JSON object under \
             a \"metadata\" key.",
            document_content.chars().count()
        );
        let context = json!({
            "analysis_id": state.analysis_id,
            "document_path": document_path,
        });
        let raw = executor.run_task(&prompt, &context).await?;
        let metadata =
            decode::decode_metadata(&raw).map_err(|e| ExecutorError::ExecutionFailed(e.into()))?;
        let title = metadata
            .title
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        state.document_metadata = Some(metadata);
        state.add_log(role.as_str(), &format!("Extracted metadata: {title}"));
        Ok(())
    }

    async fn phase_claim_extraction(
        &self,
        state: &mut AnalysisState,
        document_content: &str,
    ) -> Result<(), ExecutorError> {
        let role = AgentRole::FactExtractor;
        state.add_log(role.as_str(), "Starting fact extraction");
        let executor = self.executor(role)?;
        let excerpt: String = document_content.chars().take(3000).collect();
        let prompt = format!(
            "Identify the factual claims made in the document below.\n\n\
             Document excerpt:\n{excerpt}\n\n\
             Respond with a JSON object containing a \"claims\" array; each \
             claim carries \"text\", \"type\", \"location\", \"confidence\" \
             (0-1), and \"supporting_text\"."
        );
        let context = json!({ "analysis_id": state.analysis_id });
        let raw = executor.run_task(&prompt, &context).await?;
        let claims =
            decode::decode_claims(&raw).map_err(|e| ExecutorError::ExecutionFailed(e.into()))?;
        state.add_log(role.as_str(), &format!("Extracted {} claims", claims.len()));
        state.extracted_claims = claims;
        Ok(())
    }

    async fn phase_verification(&self, state: &mut AnalysisState) -> Result<(), ExecutorError> {
        let role = AgentRole::VerificationSpecialist;
        state.add_log(role.as_str(), "Starting claim verification");
        let executor = self.executor(role)?;
        let claims = state.extracted_claims.clone();
        for claim in &claims {
            let prompt = format!(
                "Verify the following claim against available sources.\n\n\
                 Claim: {}\nType: {}\n\n\
                 Respond with a JSON object containing \"verification_status\", \
                 \"confidence\" (0-100), \"supporting_sources\", \
                 \"contradicting_sources\", and \"notes\".",
                claim.text, claim.claim_type
            );
            let context = json!({
                "analysis_id": state.analysis_id,
                "claim_id": claim.id,
            });
            let raw = executor.run_task(&prompt, &context).await?;
            let verification = decode::decode_verification(&raw, claim)
                .map_err(|e| ExecutorError::ExecutionFailed(e.into()))?;
            state.verifications.push(verification);
        }
        state.add_log(
            role.as_str(),
            &format!("Verified {} claims", state.verifications.len()),
        );
        Ok(())
    }

    async fn phase_report_generation(&self, state: &mut AnalysisState) -> Result<(), ExecutorError> {
        let role = AgentRole::ReportWriter;
        state.add_log(role.as_str(), "Starting report generation");
        let executor = self.executor(role)?;
        let title = state
            .document_metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut outcomes = String::new();
        for (claim, verification) in state.extracted_claims.iter().zip(&state.verifications) {
            outcomes.push_str(&format!(
                "- {} [{}]\n",
                claim.text, verification.verification_status
            ));
        }
        let prompt = format!(
            "Draft an analysis report for \"{title}\".\n\n\
             {} claims were extracted; {} were verified. Outcomes:\n{outcomes}\n\
             Write the full report as markdown text.",
            state.extracted_claims.len(),
            state.verifications.len()
        );
        let context = json!({ "analysis_id": state.analysis_id });
        let raw = executor.run_task(&prompt, &context).await?;
        state.report_content = Some(raw);
        state.add_log(role.as_str(), "Report generation completed");
        Ok(())
    }

    async fn phase_quality_review(&self, state: &mut AnalysisState) -> Result<(), ExecutorError> {
        let role = AgentRole::QualityReviewer;
        state.add_log(role.as_str(), "Starting quality review");
        let executor = self.executor(role)?;
        let preview: String = state
            .report_content
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(1000)
            .collect();
        let prompt = format!(
            "Review the draft analysis report below for accuracy and \
             completeness.\n\nReport preview:\n{preview}\n\n\
             {} verification results accompany the report. Respond with a JSON \
             object containing \"feedback\", \"confidence\" (0-100), and \
             \"approved_for_publication\".",
            state.verifications.len()
        );
        let context = json!({ "analysis_id": state.analysis_id });
        let raw = executor.run_task(&prompt, &context).await?;
        let review =
            decode::decode_qa(&raw).map_err(|e| ExecutorError::ExecutionFailed(e.into()))?;
        state.qa_feedback = review.feedback;
        state.add_log(
            role.as_str(),
            &format!(
                "Quality review completed, confidence: {}",
                review.confidence.unwrap_or(0.0)
            ),
        );
        Ok(())
    }

    fn executor(&self, role: AgentRole) -> Result<&AgentExecutor, ExecutorError> {
        self.executors
            .get(role.as_str())
            .ok_or_else(|| ExecutorError::NotConfigured {
                agent: role.as_str().to_string(),
            })
    }

    /// Set the next ladder status and commit a snapshot.
    fn enter_phase(&self, state: &mut AnalysisState, status: AnalysisStatus) {
        self.advance(state, status);
        self.commit(state);
    }

    fn advance(&self, state: &mut AnalysisState, next: AnalysisStatus) {
        debug_assert!(
            is_valid_transition(state.status, next),
            "invalid transition {} -> {}",
            state.status,
            next
        );
        state.status = next;
    }

    /// Write a snapshot into the tracked table, evicting the oldest
    /// finished entries when a new analysis would exceed capacity.
    fn commit(&self, state: &AnalysisState) {
        let mut active = self.active.lock().expect("active analyses mutex poisoned");
        if !active.contains_key(&state.analysis_id) {
            while active.len() >= self.options.max_tracked_analyses {
                let oldest = active
                    .iter()
                    .filter(|(_, s)| s.status.is_terminal())
                    .min_by_key(|(_, s)| s.completed_at)
                    .map(|(id, _)| *id);
                match oldest {
                    Some(id) => {
                        active.remove(&id);
                        tracing::debug!(analysis_id = id, "Evicted finished analysis");
                    }
                    None => break,
                }
            }
        }
        active.insert(state.analysis_id, state.clone());
    }
}
