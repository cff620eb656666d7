//! Maps raw remote failure messages onto remediation instructions.
//!
//! Classification is a pure function: checks run in a fixed order and the
//! first matching signature wins. Callers display the instruction; it never
//! changes control flow.

const FIELD_DELETION_SIGNATURE: &str = "you need to omit a field before deleting it";
const RATE_LIMIT_SIGNATURES: [&str; 2] = ["rate limit", "ratelimitexceeded"];

/// How a classified failure should be presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// The operation failed and needs user action.
    Error,
    /// The condition is transient and expected to resolve on retry.
    Warning,
}

/// Structured guidance derived from a recognised failure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorInstruction {
    /// Short headline.
    pub title: String,
    /// What happened and why.
    pub description: String,
    /// Ordered steps that resolve the condition.
    pub remediation_steps: Vec<String>,
    /// Presentation severity.
    pub severity: Severity,
}

impl ErrorInstruction {
    /// Returns `true` for transient conditions.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Classifies `raw_message`, returning `None` when no known signature
/// matches. Callers fall back to showing the raw message.
#[must_use]
pub fn classify(raw_message: &str) -> Option<ErrorInstruction> {
    let lowered = raw_message.to_lowercase();
    if lowered.contains(FIELD_DELETION_SIGNATURE) {
        return Some(field_deletion_instruction());
    }
    if RATE_LIMIT_SIGNATURES
        .iter()
        .any(|signature| lowered.contains(signature))
    {
        return Some(rate_limit_instruction());
    }
    None
}

fn field_deletion_instruction() -> ErrorInstruction {
    ErrorInstruction {
        title: String::from("A field must be omitted before it can be deleted"),
        description: String::from(concat!(
            "The target environment still uses a field that the snapshot removes. ",
            "The content model only allows deleting fields that are already omitted ",
            "from the API response."
        )),
        remediation_steps: vec![
            String::from("Open the content type in the target environment"),
            String::from("Mark the field as omitted from the API response (make it optional)"),
            String::from("Save the content type"),
            String::from("Delete the field and save again"),
            String::from("Retry the operation"),
        ],
        severity: Severity::Error,
    }
}

fn rate_limit_instruction() -> ErrorInstruction {
    ErrorInstruction {
        title: String::from("Rate limit reached"),
        description: String::from(concat!(
            "The remote API throttled the request. This is transient: the export ",
            "and import tools back off and retry on their own."
        )),
        remediation_steps: vec![
            String::from("Wait a minute for the rate limit window to reset"),
            String::from("Retry the operation if it did not finish"),
        ],
        severity: Severity::Warning,
    }
}
