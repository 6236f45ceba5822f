//! Natural-Language Extractor
//!
//! Finds the single structured-operation JSON object embedded in a free-text
//! prompt. Prose is only evidence that an object exists; no parameters are
//! ever inferred from it.

use serde_json::Value;
use thiserror::Error;

use super::operation::{StructuredOperation, ValidationError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error(
        "Could not parse a structured operation JSON object from prompt. \
         Embed exactly one JSON object with 'operation' and required fields."
    )]
    NoOperationFound,
    #[error(
        "Multiple operation JSON objects found in prompt. \
         Provide exactly one operation object."
    )]
    MultipleOperations,
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Extract and validate exactly one structured operation from `text`.
///
/// The scan walks the prompt left to right. At each `{` one JSON value is
/// decoded with a streaming deserializer that reports how many bytes it
/// consumed; decoded objects containing an `operation` key are candidates.
/// On decode failure the scan advances a single character, so objects may
/// appear anywhere in surrounding prose.
pub fn extract_structured_operation(text: &str) -> Result<StructuredOperation, ExtractError> {
    let candidates = embedded_operation_objects(text);
    match candidates.len() {
        0 => Err(ExtractError::NoOperationFound),
        1 => Ok(StructuredOperation::validate(&candidates[0])?),
        _ => Err(ExtractError::MultipleOperations),
    }
}

fn embedded_operation_objects(text: &str) -> Vec<Value> {
    let mut found = Vec::new();
    let mut index = 0;

    while index < text.len() {
        if !text[index..].starts_with('{') {
            index += next_char_len(text, index);
            continue;
        }

        let mut stream = serde_json::Deserializer::from_str(&text[index..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset().max(1);
                if value.as_object().is_some_and(|obj| obj.contains_key("operation")) {
                    found.push(value);
                }
                index += consumed;
            }
            _ => {
                index += next_char_len(text, index);
            }
        }
    }

    found
}

fn next_char_len(text: &str, index: usize) -> usize {
    text[index..].chars().next().map_or(1, |c| c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_embedded_buffer_operation() {
        let prompt = r#"{"operation":"buffer","geometry":{"type":"Point","coordinates":[0,0]},"distance":100,"units":"meters"}"#;
        let op = extract_structured_operation(prompt).unwrap();
        match op {
            StructuredOperation::Buffer {
                distance, units, ..
            } => {
                assert_eq!(distance, 100.0);
                assert_eq!(units.as_deref(), Some("meters"));
            }
            other => panic!("expected buffer, got {other:?}"),
        }
    }

    #[test]
    fn finds_an_object_surrounded_by_prose() {
        let prompt = concat!(
            "Please draw a safety zone around the well: ",
            r#"{"operation":"buffer","geometry":{"type":"Point","coordinates":[1,2]},"distance":50}"#,
            " and show it on the map."
        );
        let op = extract_structured_operation(prompt).unwrap();
        assert_eq!(op.kind(), "buffer");
    }

    #[test]
    fn zero_candidates_is_a_distinct_error() {
        let err = extract_structured_operation("how big is the lake?").unwrap_err();
        assert_eq!(err, ExtractError::NoOperationFound);

        // JSON without the operation key is not a candidate either.
        let err = extract_structured_operation(r#"{"geometry": {"type": "Point"}}"#).unwrap_err();
        assert_eq!(err, ExtractError::NoOperationFound);
    }

    #[test]
    fn multiple_candidates_are_refused() {
        let prompt = concat!(
            r#"{"operation":"calculate_area","geometry":{"type":"Polygon","coordinates":[]}}"#,
            " or maybe ",
            r#"{"operation":"buffer","geometry":{"type":"Point","coordinates":[0,0]},"distance":1}"#,
        );
        let err = extract_structured_operation(prompt).unwrap_err();
        assert_eq!(err, ExtractError::MultipleOperations);
    }

    #[test]
    fn validator_errors_propagate() {
        let prompt = r#"run {"operation":"buffer","geometry":{"type":"Point","coordinates":[0,0]}} now"#;
        match extract_structured_operation(prompt) {
            Err(ExtractError::Invalid(err)) => {
                assert!(err.message.contains("distance"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn survives_braces_that_are_not_json() {
        let prompt = concat!(
            "weird {not json at all} text ",
            r#"{"operation":"calculate_area","geometry":{"type":"Polygon","coordinates":[[[0,0],[0,1],[1,1],[0,0]]]}}"#,
        );
        let op = extract_structured_operation(prompt).unwrap();
        assert_eq!(op.kind(), "calculate_area");
    }

    #[test]
    fn handles_multibyte_text_around_objects() {
        let prompt = concat!(
            "¿cuál es el área? ",
            r#"{"operation":"calculate_area","geometry":{"type":"Polygon","coordinates":[]}}"#,
            " muchas gracias señor"
        );
        let op = extract_structured_operation(prompt).unwrap();
        assert_eq!(op.kind(), "calculate_area");
    }
}
