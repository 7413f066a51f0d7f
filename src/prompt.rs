//! Instruction prompt format shared by training samples and questions.
//!
//! Every sample the model is adjusted on, and every question it is asked,
//! uses the same instruction layout so the generated answer can be located
//! by its section marker.

use crate::error::JobError;

/// Opens the section that holds the model's answer.
pub const RESPONSE_MARKER: &str = "### Response:";

/// End-of-sequence marker emitted after an answer.
pub const EOS_MARKER: &str = "</s>";

const PREAMBLE: &str = "Below is an instruction that describes a task paired with input that provides further context. Write a response that appropriately completes the request.";
const INSTRUCTION: &str = "Answer the following question.";

/// Format a question the way the model expects to see it at inference time.
pub fn question_prompt(question: &str) -> String {
    format!(
        "{PREAMBLE}\n\n### Instruction:\n{INSTRUCTION}\n\n### Input:\n{question}\n\n{RESPONSE_MARKER}\n"
    )
}

/// Format a question/answer pair as one training sample.
pub fn training_sample(question: &str, answer: &str) -> String {
    format!("{}{answer}{EOS_MARKER}", question_prompt(question))
}

/// Pull the answer out of raw generated text.
///
/// The answer is whatever sits after the first response marker and before
/// the next end-of-sequence marker, trimmed. Without an end marker the answer
/// runs to the end of the text. Without a response marker the output cannot
/// be trusted and is rejected.
pub fn extract_response(raw: &str) -> Result<String, JobError> {
    let start = raw
        .find(RESPONSE_MARKER)
        .ok_or_else(|| JobError::MalformedOutput {
            reason: format!("no {RESPONSE_MARKER:?} marker in generated text"),
        })?;
    let body = &raw[start + RESPONSE_MARKER.len()..];
    let body = match body.find(EOS_MARKER) {
        Some(end) => &body[..end],
        None => body,
    };
    Ok(body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_between_markers() {
        let raw = format!("{}  4 \n{EOS_MARKER} trailing junk", question_prompt("2+2?"));
        assert_eq!(extract_response(&raw).unwrap(), "4");
    }

    #[test]
    fn missing_eos_runs_to_end() {
        let raw = "prefix ### Response:\n  the answer  ";
        assert_eq!(extract_response(raw).unwrap(), "the answer");
    }

    #[test]
    fn missing_response_marker_is_malformed() {
        let err = extract_response("just some words</s>").unwrap_err();
        assert!(matches!(err, JobError::MalformedOutput { .. }));
    }

    #[test]
    fn eos_before_marker_is_ignored() {
        let raw = "old</s> ### Response: new </s>";
        assert_eq!(extract_response(raw).unwrap(), "new");
    }

    #[test]
    fn training_sample_is_terminated() {
        let sample = training_sample("capital of France?", "Paris");
        assert!(sample.contains("### Input:\ncapital of France?"));
        assert!(sample.ends_with("Paris</s>"));
        assert_eq!(extract_response(&sample).unwrap(), "Paris");
    }
}
