//! Prompt templates used by the pipeline stages. Kept in one place so
//! wording changes do not scatter across the comparators.

/// System prompt shared by the comparison prompts.
pub const COMPARISON_SYSTEM: &str = "You are an expert in software migration validation. \
You compare abstract representations of a source and a target system and answer \
strictly in JSON.";

/// Pairing prompt: given unmatched elements on both sides, propose pairs
/// with similarity scores in [0,1].
pub fn pairing_prompt(category: &str, source_items: &str, target_items: &str) -> String {
    format!(
        "Unpaired {category} elements remain after exact matching.\n\n\
         Source elements (JSON):\n{source_items}\n\n\
         Target elements (JSON):\n{target_items}\n\n\
         Propose pairs of elements that represent the same concept under a rename or \
         refactoring. Respond with JSON of the shape \
         {{\"pairs\":[{{\"source\":\"<name>\",\"target\":\"<name>\",\"similarity\":0.0}}]}}. \
         Only include pairs you believe represent the same element; similarity is your \
         confidence in [0,1]."
    )
}

/// Business-logic comparison for one paired function.
pub fn logic_comparison_prompt(
    function_name: &str,
    source_summary: &str,
    target_summary: &str,
) -> String {
    format!(
        "Compare the business logic of the function `{function_name}` before and after a \
         migration.\n\nSource logic:\n{source_summary}\n\nTarget logic:\n{target_summary}\n\n\
         Respond with JSON of the shape \
         {{\"similarity\":0.0,\"diagnosis\":\"<one sentence>\"}} where similarity in [0,1] \
         measures preserved behavior."
    )
}

/// Vision extraction prompt for one screenshot.
pub fn visual_extraction_prompt(scope: &str) -> String {
    format!(
        "Extract the UI elements visible in this screenshot for a {scope} validation. \
         Respond with JSON of the shape \
         {{\"elements\":[{{\"kind\":\"input|button|label|table|link|form\",\
         \"id\":\"<stable identifier>\",\"text\":\"<visible text>\",\
         \"attributes\":{{}}}}]}}. Use the visible label or placeholder to synthesize an \
         identifier when none is apparent."
    )
}

/// Code extraction prompt used when no structural analyzer covers the
/// language; asks for the unified representation shape.
pub fn code_extraction_prompt(language: &str, scope: &str, source: &str) -> String {
    format!(
        "Extract an abstract representation of this {language} file for a {scope} \
         validation.\n\n```{language}\n{source}\n```\n\n\
         Respond with JSON of the shape {{\"functions\":[...],\"data_structures\":[...],\
         \"endpoints\":[...],\"ui_elements\":[...]}} using the field names exactly."
    )
}
