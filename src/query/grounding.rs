//! Grounding / Evidence Builder
//!
//! Attaches a verification verdict to each response. Deterministic
//! transforms of caller-supplied geometry are verified: the caller already
//! holds ground truth for their own input. Records pulled from backend
//! tables are unverified; nothing in this core can independently confirm
//! them, and the response must not claim otherwise.

use serde::Serialize;

use super::dispatch::OperationResult;
use super::operation::StructuredOperation;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Verified,
    Unverified,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    InputGeometry,
    QueriedTable,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Evidence {
    pub source_kind: SourceKind,
    pub source_id: String,
    pub verification: Verification,
}

impl Evidence {
    fn input_geometry(source_id: &str) -> Self {
        Self {
            source_kind: SourceKind::InputGeometry,
            source_id: source_id.to_string(),
            verification: Verification::Verified,
        }
    }

    fn queried_table(source_id: String) -> Self {
        Self {
            source_kind: SourceKind::QueriedTable,
            source_id,
            verification: Verification::Unverified,
        }
    }
}

/// Build the evidence list for an executed operation and fold it into the
/// overall verdict: verified only if every entry is verified.
pub fn build_evidence(
    result: &OperationResult,
    operation: &StructuredOperation,
) -> (Verification, Vec<Evidence>) {
    let evidence = match (operation, result) {
        (StructuredOperation::FindIntersections { .. }, _) => vec![
            Evidence::input_geometry("request.geometry"),
            Evidence::input_geometry("request.geometry_b"),
        ],
        (_, OperationResult::Neighbors { features, table, .. }) => {
            if features.is_empty() {
                // An empty answer is still a claim about the table's contents.
                vec![Evidence::queried_table(table.clone())]
            } else {
                features
                    .iter()
                    .map(|feature| {
                        Evidence::queried_table(format!("{table}:{}", render_id(&feature.id)))
                    })
                    .collect()
            }
        }
        _ => vec![Evidence::input_geometry("request.geometry")],
    };

    let status = if evidence
        .iter()
        .all(|entry| entry.verification == Verification::Verified)
    {
        Verification::Verified
    } else {
        Verification::Unverified
    };

    (status, evidence)
}

fn render_id(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
