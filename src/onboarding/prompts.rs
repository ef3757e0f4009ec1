//! Prompt text for each onboarding step, plus the text classifiers the
//! orchestrator relies on: tool-call parsing, completion claims,
//! confirmations and summaries.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::tools::{OperationId, OperationSchema};

use super::model::UserRole;
use super::state::OnboardingState;

const BASE_PROMPT: &str = "\
You are the onboarding assistant for a sailing community that connects boat \
owners with crew. Hold a friendly, concise conversation (one question at a \
time, 1-3 sentences per reply).

Rules:
- Only the operations listed below exist in this step. Never claim you saved, \
created or planned anything unless an operation result in this conversation \
says it succeeded.
- Before calling an operation that creates or saves something, summarize the \
details as a short list and ask the user to confirm.
- When the user confirms, call the operation immediately in the same reply.";

const TOOL_CALL_SYNTAX: &str = "\
To call an operation, put exactly this block in your reply (one block per call):
<tool_call>
{\"name\": \"operation_name\", \"arguments\": {\"field\": \"value\"}}
</tool_call>
Use real values from the conversation. Never use placeholders such as ... in arguments.";

/// Instructions for the current step.
pub fn step_instructions(role: UserRole, state: OnboardingState) -> &'static str {
    match (state, role) {
        (OnboardingState::SignupPending, UserRole::Owner) => "\
CURRENT STEP: Welcome (owner)
Greet the user, learn a little about them and their boat. Explain that they \
need to sign up before anything can be saved. Nothing can be saved yet.",
        (OnboardingState::SignupPending, UserRole::Prospect) => "\
CURRENT STEP: Welcome (crew)
Greet the user and learn what kind of sailing they want to do. Explain that \
they need to sign up before anything can be saved. Nothing can be saved yet.",
        (OnboardingState::ConsentPending, _) => "\
CURRENT STEP: Consent
The user must accept the privacy policy and terms before continuing. Do not \
collect further details; ask them to review and accept the terms.",
        (OnboardingState::ProfilePending, UserRole::Owner) => "\
CURRENT STEP: Profile (owner)
Collect a username and the name they want shown, plus an optional short bio \
and sailing experience level. Summarize, confirm, then call update_profile.",
        (OnboardingState::ProfilePending, UserRole::Prospect) => "\
CURRENT STEP: Profile (crew)
Collect a username and the name they want shown, a short bio about the \
sailing they want to do, and their experience level. Summarize, confirm, then \
call update_profile.",
        (OnboardingState::BoatPending, _) => "\
CURRENT STEP: Boat
Collect the boat's name, make, model, length in feet and home port. If the \
user gives a make and model, call fetch_reference_details to pre-fill specs. \
Summarize, confirm, then call create_vessel.",
        (OnboardingState::JourneyPending, _) => "\
CURRENT STEP: First journey
Ask where they want to sail from and to, and roughly when (YYYY-MM-DD). \
Summarize, confirm, then call generate_route.",
        (OnboardingState::Completed, _) => "\
CURRENT STEP: Done
Onboarding is complete. Answer any remaining questions briefly.",
        (OnboardingState::Deleted, _) => "\
CURRENT STEP: Closed
This conversation has ended. Reply politely and do not collect any details.",
    }
}

/// Full system prompt: base rules, step instructions and the step's
/// operation schemas.
pub fn system_prompt(role: UserRole, state: OnboardingState, schemas: &[OperationSchema]) -> String {
    let mut prompt = format!("{BASE_PROMPT}\n\n{}", step_instructions(role, state));

    if schemas.is_empty() {
        prompt.push_str("\n\nNo operations are available in this step.");
        return prompt;
    }

    prompt.push_str("\n\nAVAILABLE OPERATIONS:\n");
    for schema in schemas {
        prompt.push_str(&format!(
            "- {}: {}\n  arguments schema: {}\n",
            schema.name, schema.description, schema.parameters
        ));
    }
    prompt.push('\n');
    prompt.push_str(TOOL_CALL_SYNTAX);
    prompt
}

// ── Tool-call parsing ───────────────────────────────────────────────

static TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("static tool block pattern")
});

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("static fence pattern")
});

static ANGLE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<[^<>]*>$").expect("static placeholder pattern"));

static EXTRA_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static blank line pattern"));

/// One parsed operation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// A provider response split into visible text and operation requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub text: String,
    pub calls: Vec<ToolCall>,
    /// Blocks that were present but unusable.
    pub malformed: usize,
}

fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && s.chars().all(|c| c == '.' || c == '…' || c.is_whitespace()))
                || ANGLE_PLACEHOLDER.is_match(s)
        }
        Value::Array(items) => items.iter().any(is_placeholder),
        Value::Object(map) => map.values().any(is_placeholder),
        _ => false,
    }
}

fn parse_block(body: &str) -> Option<ToolCall> {
    let body = body.trim();
    let body = CODE_FENCE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(body);

    let value: Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match value.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return None,
    };
    if arguments.values().any(is_placeholder) {
        return None;
    }
    Some(ToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Split a raw provider response into visible text and tool calls.
pub fn parse_tool_calls(raw: &str) -> ParsedResponse {
    let mut calls = Vec::new();
    let mut malformed = 0;

    for capture in TOOL_BLOCK.captures_iter(raw) {
        match capture.get(1).and_then(|m| parse_block(m.as_str())) {
            Some(call) => calls.push(call),
            None => malformed += 1,
        }
    }

    let mut text = TOOL_BLOCK.replace_all(raw, "").into_owned();
    // An opened block that never closed is unusable, and so is the tail after it.
    if let Some(pos) = text.find("<tool_call>") {
        malformed += 1;
        text.truncate(pos);
    }
    let text = EXTRA_BLANK_LINES
        .replace_all(text.trim(), "\n\n")
        .into_owned();

    ParsedResponse {
        text,
        calls,
        malformed,
    }
}

// ── Completion claims ───────────────────────────────────────────────

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]*").expect("static sentence pattern"));

static CLAIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(i'?ve|i have|i just|we'?ve|has been|have been|is now|are now|successfully)\b.{0,60}?\b(created|saved|added|registered|set up|generated|planned|updated|recorded|stored)\b",
    )
    .expect("static claim pattern")
});

static CLAIM_PROFILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(profile|username|bio|details)\b").expect("static claim object pattern")
});

static CLAIM_VESSEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(vessel|boat|yacht)\b").expect("static claim object pattern")
});

static CLAIM_ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(route|journey|passage|trip|voyage)\b").expect("static claim object pattern")
});

fn sentence_claim(sentence: &str) -> Option<OperationId> {
    if !CLAIM.is_match(sentence) {
        return None;
    }
    // Most specific object first: "the route for your boat" is a route claim.
    if CLAIM_ROUTE.is_match(sentence) {
        Some(OperationId::GenerateRoute)
    } else if CLAIM_VESSEL.is_match(sentence) {
        Some(OperationId::CreateVessel)
    } else if CLAIM_PROFILE.is_match(sentence) {
        Some(OperationId::UpdateProfile)
    } else {
        None
    }
}

/// Operations the text claims to have completed, in order of first mention.
pub fn claimed_operations(text: &str) -> Vec<OperationId> {
    let mut claimed = Vec::new();
    for sentence in SENTENCE.find_iter(text) {
        if let Some(op) = sentence_claim(sentence.as_str())
            && !claimed.contains(&op)
        {
            claimed.push(op);
        }
    }
    claimed
}

/// Drop sentences that claim one of `unverified` was completed. Lines
/// without such a claim are kept verbatim, so lists and paragraphs survive.
pub fn strip_claims(text: &str, unverified: &[OperationId]) -> String {
    let stripped = |s: &str| sentence_claim(s).is_some_and(|op| unverified.contains(&op));
    let lines: Vec<String> = text
        .lines()
        .filter_map(|line| {
            if !SENTENCE.find_iter(line).any(|m| stripped(m.as_str())) {
                return Some(line.to_string());
            }
            let kept = SENTENCE
                .find_iter(line)
                .map(|m| m.as_str())
                .filter(|s| !stripped(s))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!kept.is_empty()).then_some(kept)
        })
        .collect();
    EXTRA_BLANK_LINES
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

/// Appended when the model claims an action no operation performed.
pub fn corrective_note(operations: &[OperationId]) -> String {
    let what = operations
        .iter()
        .map(|op| match op {
            OperationId::UpdateProfile => "your profile",
            OperationId::CreateVessel => "your boat",
            OperationId::GenerateRoute => "your journey",
            OperationId::FetchReferenceDetails => "those details",
        })
        .collect::<Vec<_>>()
        .join(" and ");
    format!(
        "Just to be clear, {what} hasn't been saved yet. \
         Please confirm the details and I'll save them."
    )
}

// ── User intent ─────────────────────────────────────────────────────

const AFFIRMATIVE_PHRASES: &[&str] = &[
    "yes",
    "yes please",
    "yep",
    "yeah",
    "yup",
    "y",
    "ok",
    "okay",
    "sure",
    "confirm",
    "confirmed",
    "i confirm",
    "correct",
    "that's correct",
    "thats correct",
    "that's right",
    "thats right",
    "looks good",
    "looks great",
    "sounds good",
    "all good",
    "perfect",
    "go ahead",
    "do it",
    "save it",
    "create it",
    "lgtm",
];

const NEGATIONS: &[&str] = &["no", "not", "don't", "dont", "wait", "change", "but", "wrong"];

/// Whether the user's message is a short confirmation.
pub fn is_affirmative(message: &str) -> bool {
    let normalized: String = message
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() || words.len() > 8 {
        return false;
    }
    if words.iter().any(|w| NEGATIONS.contains(w)) {
        return false;
    }
    let joined = words.join(" ");
    AFFIRMATIVE_PHRASES.iter().any(|phrase| {
        joined == *phrase
            || joined
                .strip_prefix(phrase)
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

static SUMMARY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*•]|\d+\.)?\s*\**[A-Za-z][A-Za-z /()']{1,30}\**\s*:\s*\S")
        .expect("static summary field pattern")
});

static CONFIRM_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(does (this|that|everything) look|is (this|that|everything) (right|correct)|shall i (create|save|go ahead)|should i (create|save|go ahead)|can you confirm|please confirm|ready to (save|create))",
    )
    .expect("static confirmation pattern")
});

/// Whether an assistant turn summarizes a resource for confirmation.
pub fn looks_like_summary(text: &str) -> bool {
    SUMMARY_FIELD.find_iter(text).count() >= 2 || CONFIRM_QUESTION.is_match(text)
}

// ── Synthetic turns ─────────────────────────────────────────────────

/// Injected when the user confirmed a summary but the model made no call.
pub fn nudge_directive(operation: OperationId) -> String {
    format!(
        "The user confirmed the summary. Call `{operation}` now with the details \
         you just summarized, using a <tool_call> block. Do not ask for \
         confirmation again."
    )
}

/// Injected after consent so the model continues without a user message.
pub fn resume_directive(role: UserRole, state: OnboardingState) -> String {
    format!(
        "The user has accepted the terms and agreed to AI-assisted onboarding. \
         Continue the {role} onboarding at the {state} step. Use what they already \
         told you and do not ask them to repeat it."
    )
}

/// Returned when a turn fails for reasons the user cannot fix.
pub const APOLOGY: &str =
    "Sorry, something went wrong on our side. Your progress so far is saved; please try again in a moment.";

/// Returned when the loop ends without any visible text.
pub const FALLBACK_REPLY: &str = "Could you tell me a bit more?";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_call_and_strips_block() {
        let raw = "Great, saving now.\n<tool_call>\n{\"name\": \"create_vessel\", \"arguments\": {\"name\": \"Sea Breeze\"}}\n</tool_call>";
        let parsed = parse_tool_calls(raw);
        assert_eq!(parsed.text, "Great, saving now.");
        assert_eq!(parsed.calls.len(), 1);
        assert_eq!(parsed.calls[0].name, "create_vessel");
        assert_eq!(parsed.calls[0].arguments["name"], "Sea Breeze");
        assert_eq!(parsed.malformed, 0);
    }

    #[test]
    fn parses_fenced_and_multiple_calls() {
        let raw = "<tool_call>```json\n{\"name\": \"fetch_reference_details\", \"arguments\": {\"make\": \"Beneteau\", \"model\": \"Oceanis 38\"}}\n```</tool_call>\
                   <tool_call>{\"name\": \"create_vessel\"}</tool_call>";
        let parsed = parse_tool_calls(raw);
        assert_eq!(parsed.calls.len(), 2);
        assert!(parsed.calls[1].arguments.is_empty());
        assert!(parsed.text.is_empty());
    }

    #[test]
    fn malformed_and_placeholder_calls_are_not_calls() {
        let cases = [
            "<tool_call>{not json}</tool_call>",
            "<tool_call>...</tool_call>",
            "<tool_call>{\"name\": \"\", \"arguments\": {}}</tool_call>",
            "<tool_call>{\"name\": \"create_vessel\", \"arguments\": \"Sea Breeze\"}</tool_call>",
            "<tool_call>{\"name\": \"create_vessel\", \"arguments\": {\"name\": \"...\"}}</tool_call>",
            "<tool_call>{\"name\": \"create_vessel\", \"arguments\": {\"name\": \"…\"}}</tool_call>",
            "<tool_call>{\"name\": \"create_vessel\", \"arguments\": {\"name\": \"<boat name>\"}}</tool_call>",
        ];
        for raw in cases {
            let parsed = parse_tool_calls(raw);
            assert!(parsed.calls.is_empty(), "{raw}");
            assert_eq!(parsed.malformed, 1, "{raw}");
        }
    }

    #[test]
    fn unclosed_block_is_malformed_and_hidden() {
        let parsed = parse_tool_calls("Saving.\n<tool_call>{\"name\": \"create_vessel\"");
        assert!(parsed.calls.is_empty());
        assert_eq!(parsed.malformed, 1);
        assert_eq!(parsed.text, "Saving.");
    }

    #[test]
    fn detects_completion_claims() {
        assert_eq!(
            claimed_operations("Great news! I've created your boat Sea Breeze."),
            vec![OperationId::CreateVessel]
        );
        assert_eq!(
            claimed_operations("Your profile has been saved. Your journey is now planned!"),
            vec![OperationId::UpdateProfile, OperationId::GenerateRoute]
        );
        assert!(claimed_operations("What is your boat called?").is_empty());
        assert!(claimed_operations("Shall I create your boat?").is_empty());
    }

    #[test]
    fn strip_claims_keeps_other_sentences() {
        let text = "I've created your boat. What's next? Let's plan a journey.";
        assert_eq!(
            strip_claims(text, &[OperationId::CreateVessel]),
            "What's next? Let's plan a journey."
        );
        assert_eq!(strip_claims(text, &[OperationId::GenerateRoute]), text);
    }

    #[test]
    fn strip_claims_keeps_line_structure() {
        let text = "Here's your boat:\n- Name: Sea Breeze\n- Make: Beneteau\n\nI've created your boat.\n\nShall we plan a route?";
        assert_eq!(
            strip_claims(text, &[OperationId::CreateVessel]),
            "Here's your boat:\n- Name: Sea Breeze\n- Make: Beneteau\n\nShall we plan a route?"
        );
    }

    #[test]
    fn affirmative_phrases() {
        for msg in ["yes", "Yes!", "confirm", "Looks good.", "yes, go ahead", "OK", "that's right"] {
            assert!(is_affirmative(msg), "{msg}");
        }
        for msg in [
            "",
            "no",
            "yes but change the name",
            "not yet",
            "my boat is called Sea Breeze",
            "yesterday I sailed",
        ] {
            assert!(!is_affirmative(msg), "{msg}");
        }
    }

    #[test]
    fn summary_detection() {
        let summary = "Here's what I have:\n- Name: Sea Breeze\n- Make: Beneteau\n- Length: 38 ft";
        assert!(looks_like_summary(summary));
        assert!(looks_like_summary("A Beneteau called Sea Breeze. Does this look right?"));
        assert!(!looks_like_summary("What is your boat called?"));
    }

    #[test]
    fn system_prompt_lists_only_given_schemas() {
        let schemas = vec![OperationSchema {
            name: "update_profile".into(),
            description: "Save profile".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let prompt = system_prompt(UserRole::Prospect, OnboardingState::ProfilePending, &schemas);
        assert!(prompt.contains("update_profile"));
        assert!(prompt.contains("<tool_call>"));
        assert!(!prompt.contains("- create_vessel"));

        let empty = system_prompt(UserRole::Owner, OnboardingState::SignupPending, &[]);
        assert!(empty.contains("No operations are available"));
    }
}
