//! Core data models for the analysis workflow.
//!
//! Everything that crosses a subsystem boundary lives here: the workflow
//! status ladder, agent roles, per-phase output shapes, and the mutable
//! `AnalysisState` record that one workflow run owns end to end.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow progress for one analysis.
///
/// The ladder runs `Queued` through `Completed` in declaration order;
/// `Failed` is reachable from any non-terminal status. `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Queued,
    Processing,
    DocumentParsing,
    ClaimExtraction,
    Verification,
    ReportGeneration,
    QualityReview,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::DocumentParsing => "document_parsing",
            AnalysisStatus::ClaimExtraction => "claim_extraction",
            AnalysisStatus::Verification => "verification",
            AnalysisStatus::ReportGeneration => "report_generation",
            AnalysisStatus::QualityReview => "quality_review",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(AnalysisStatus::Queued),
            "processing" => Ok(AnalysisStatus::Processing),
            "document_parsing" => Ok(AnalysisStatus::DocumentParsing),
            "claim_extraction" => Ok(AnalysisStatus::ClaimExtraction),
            "verification" => Ok(AnalysisStatus::Verification),
            "report_generation" => Ok(AnalysisStatus::ReportGeneration),
            "quality_review" => Ok(AnalysisStatus::QualityReview),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            _ => Err(format!("Invalid analysis status: {}", s)),
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six agent roles in the pipeline.
///
/// Role names double as keys into the agent registry, the tool table, and
/// the per-agent log map on `AnalysisState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Root,
    DocumentProcessor,
    FactExtractor,
    VerificationSpecialist,
    ReportWriter,
    QualityReviewer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Root => "root",
            AgentRole::DocumentProcessor => "document_processor",
            AgentRole::FactExtractor => "fact_extractor",
            AgentRole::VerificationSpecialist => "verification_specialist",
            AgentRole::ReportWriter => "report_writer",
            AgentRole::QualityReviewer => "quality_reviewer",
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(AgentRole::Root),
            "document_processor" => Ok(AgentRole::DocumentProcessor),
            "fact_extractor" => Ok(AgentRole::FactExtractor),
            "verification_specialist" => Ok(AgentRole::VerificationSpecialist),
            "report_writer" => Ok(AgentRole::ReportWriter),
            "quality_reviewer" => Ok(AgentRole::QualityReviewer),
            _ => Err(format!("Invalid agent role: {}", s)),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bibliographic metadata pulled from a document by the processing phase.
///
/// Written once by document processing and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub publication_date: Option<String>,
    pub institution: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A single factual claim pulled out of the document.
///
/// The `claim_type` tag is an open string ("quantitative", "causal", ...)
/// rather than a closed enum; extraction agents emit novel categories and
/// downstream code must not reject them. Confidence is on a 0.0..=1.0
/// scale. Immutable once appended to an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedClaim {
    /// Stable identifier assigned at extraction time, used to link
    /// verification results back to their claim.
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub claim_type: String,
    pub location: Option<String>,
    pub confidence: f64,
    pub supporting_text: Option<String>,
}

/// Outcome of verifying one claim against external sources.
///
/// `verification_status` is an open string; the usual values are
/// "supported", "contradicted", "uncertain", and "unverifiable".
/// Confidence here is on a 0..=100 scale, deliberately different from
/// claim confidence; both scales are preserved as-is. `claim_text` is
/// retained alongside the stable `claim_id` for readability in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub claim_id: String,
    pub claim_text: String,
    pub verification_status: String,
    pub confidence: f64,
    #[serde(default)]
    pub supporting_sources: Vec<String>,
    #[serde(default)]
    pub contradicting_sources: Vec<String>,
    pub notes: Option<String>,
}

/// Mutable record of one in-flight analysis.
///
/// Owned exclusively by a single workflow run while it executes; the
/// orchestrator commits snapshots of it to the active-analyses table at
/// phase boundaries so lookups can observe progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisState {
    pub analysis_id: i64,
    pub document_id: i64,
    pub status: AnalysisStatus,
    pub document_metadata: Option<DocumentMetadata>,
    pub extracted_claims: Vec<ExtractedClaim>,
    pub verifications: Vec<VerificationResult>,
    pub report_content: Option<String>,
    pub qa_feedback: Option<String>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Agent name to ordered, timestamped log lines.
    pub agent_logs: HashMap<String, Vec<String>>,
}

impl AnalysisState {
    pub fn new(analysis_id: i64, document_id: i64) -> Self {
        AnalysisState {
            analysis_id,
            document_id,
            status: AnalysisStatus::Queued,
            document_metadata: None,
            extracted_claims: Vec::new(),
            verifications: Vec::new(),
            report_content: None,
            qa_feedback: None,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            agent_logs: HashMap::new(),
        }
    }

    /// Append a timestamped log line under the given agent name.
    pub fn add_log(&mut self, agent: &str, message: &str) {
        let line = format!("[{}] {}", Utc::now().to_rfc3339(), message);
        self.agent_logs.entry(agent.to_string()).or_default().push(line);
    }

    /// Append an error string to the ordered error list.
    pub fn add_error(&mut self, message: String) {
        self.errors.push(message);
    }

    /// Move to a terminal status and stamp `completed_at`.
    ///
    /// The completion timestamp is written at most once; calling this
    /// again leaves the original stamp in place.
    pub fn mark_terminal(&mut self, status: AnalysisStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}
