//! Prompt construction for schema-driven extraction.

use scrapeline_core::ExtractionSchema;

pub const SYSTEM_PROMPT: &str = "You are a data extraction expert. Your job is to extract structured data from webpage content.

Rules:
1. Return ONLY valid JSON matching the requested schema
2. If a field cannot be found, use null
3. For arrays, return empty array [] if no items found
4. For numbers, extract numeric values only (no currency symbols)
5. For dates, use ISO 8601 format (YYYY-MM-DD)
6. For strings, preserve the exact text from the content
7. Do not invent or infer data that isn't explicitly in the content

Be precise. Do not invent data that isn't in the content.";

/// User message asking for `schema` to be extracted from `content`.
pub fn user_prompt(schema: &ExtractionSchema, content: &str) -> String {
    match schema {
        ExtractionSchema::Structured(value) => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            format!(
                "Extract data matching this JSON Schema:\n\n```json\n{pretty}\n```\n\n\
                 CONTENT:\n{content}\n\n\
                 Return the extracted data as valid JSON matching the schema above."
            )
        }
        ExtractionSchema::Prompt(instructions) => {
            let instructions = instructions.trim();
            let request = if instructions.is_empty() {
                "Extract all relevant information from the content."
            } else {
                instructions
            };
            format!(
                "Extract the following information from the content:\n\n{request}\n\n\
                 CONTENT:\n{content}\n\n\
                 Return the extracted data as valid JSON."
            )
        }
    }
}

/// Cut `content` to at most `max_chars` characters on a char boundary.
pub fn clip_content(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
