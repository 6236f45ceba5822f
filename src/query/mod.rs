//! Query Pipeline
//!
//! Validation, natural-language extraction, dispatch, and grounding for the
//! five whitelisted spatial operations.

pub mod dispatch;
pub mod extract;
pub mod grounding;
pub mod operation;

pub use dispatch::{dispatch, DispatchError, OperationResult};
pub use extract::{extract_structured_operation, ExtractError};
pub use grounding::{build_evidence, Evidence, SourceKind, Verification};
pub use operation::{StructuredOperation, ValidationError};
