//! Decoding of structured agent output into phase shapes.
//!
//! Agents return JSON text of loosely agreed shape. Decoding is lenient
//! by policy: absent or wrong-typed fields take documented defaults
//! instead of failing the phase. Only two things are fatal here: output
//! that is not JSON at all, and a present-but-wrong-shape container
//! field. The report phase bypasses this module entirely; its raw text
//! is the artifact.
//!
//! Defaults:
//! - claim `type` → `"unknown"`, claim `confidence` → 0.5 (clamped to 0..=1)
//! - verification `verification_status` → `"uncertain"`, `confidence` → 0.0
//!   (clamped to 0..=100)
//! - list fields → empty, optional strings → absent
//! - claim entries with no usable `text` are dropped

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::DecodeError;
use crate::models::{DocumentMetadata, ExtractedClaim, VerificationResult};

/// Quality reviewer output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QaReview {
    pub feedback: Option<String>,
    pub confidence: Option<f64>,
    pub approved_for_publication: Option<bool>,
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::NotObject),
    }
}

fn opt_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn number_or(obj: &Map<String, Value>, key: &str, default: f64) -> f64 {
    obj.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Decode document-processor output into metadata.
///
/// Accepts either a top-level metadata object or one nested under a
/// `metadata` key.
pub fn decode_metadata(raw: &str) -> Result<DocumentMetadata, DecodeError> {
    let top = parse_object(raw)?;
    let obj = match top.get("metadata") {
        Some(Value::Object(nested)) => nested,
        Some(_) => return Err(DecodeError::WrongShape { field: "metadata" }),
        None => &top,
    };
    Ok(DocumentMetadata {
        title: opt_string(obj, "title"),
        authors: string_list(obj, "authors"),
        publication_date: opt_string(obj, "publication_date"),
        institution: opt_string(obj, "institution"),
        abstract_text: opt_string(obj, "abstract"),
        keywords: string_list(obj, "keywords"),
    })
}

/// Decode fact-extractor output into claims.
///
/// A missing `claims` key means zero claims. Each claim is assigned a
/// fresh stable identifier at decode time; verification results link back
/// through it.
pub fn decode_claims(raw: &str) -> Result<Vec<ExtractedClaim>, DecodeError> {
    let top = parse_object(raw)?;
    let entries = match top.get("claims") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(DecodeError::WrongShape { field: "claims" }),
        None => &[],
    };
    let mut claims = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let Some(text) = opt_string(obj, "text").filter(|t| !t.is_empty()) else {
            continue;
        };
        claims.push(ExtractedClaim {
            id: Uuid::new_v4().to_string(),
            text,
            claim_type: opt_string(obj, "type").unwrap_or_else(|| "unknown".to_string()),
            location: opt_string(obj, "location"),
            confidence: number_or(obj, "confidence", 0.5).clamp(0.0, 1.0),
            supporting_text: opt_string(obj, "supporting_text"),
        });
    }
    Ok(claims)
}

/// Decode verification-specialist output for one claim.
pub fn decode_verification(
    raw: &str,
    claim: &ExtractedClaim,
) -> Result<VerificationResult, DecodeError> {
    let obj = parse_object(raw)?;
    Ok(VerificationResult {
        claim_id: claim.id.clone(),
        claim_text: claim.text.clone(),
        verification_status: opt_string(&obj, "verification_status")
            .unwrap_or_else(|| "uncertain".to_string()),
        confidence: number_or(&obj, "confidence", 0.0).clamp(0.0, 100.0),
        supporting_sources: string_list(&obj, "supporting_sources"),
        contradicting_sources: string_list(&obj, "contradicting_sources"),
        notes: opt_string(&obj, "notes"),
    })
}

/// Decode quality-reviewer output.
pub fn decode_qa(raw: &str) -> Result<QaReview, DecodeError> {
    let obj = parse_object(raw)?;
    Ok(QaReview {
        feedback: opt_string(&obj, "feedback"),
        confidence: obj.get("confidence").and_then(Value::as_f64),
        approved_for_publication: obj.get("approved_for_publication").and_then(Value::as_bool),
    })
}
