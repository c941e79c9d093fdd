//! Prompts for the LLM-backed fallback inference.
//!
//! The prompt asks for exactly the keys [`crate::pipeline::fallback`]
//! understands. The reply is still validated field by field, so a model that
//! ignores the instructions produces `Unknown` amounts, not wrong ones.
//!
//! Callers can override the default via
//! [`crate::config::PipelineConfig::system_prompt`].

use crate::pipeline::input::DocumentInput;

/// Default system prompt for reading a scanned tax statement.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You read scanned U.S. tax information statements and report their values as JSON.

Supported forms: W-2, 1099-INT, 1099-NEC. Identify the form, then return ONE JSON object with these keys:

- "form_type": "W-2", "1099-INT" or "1099-NEC"
- "payer_name": the employer (W-2) or payer (1099) name
- "recipient_tin_last4": last four digits of the employee/recipient SSN or TIN
- "tax_year": four-digit year printed on the form
- "wages": W-2 box 1
- "social_security_wages": W-2 box 3
- "medicare_wages": W-2 box 5
- "interest_income": 1099-INT box 1
- "nonemployee_compensation": 1099-NEC box 1
- "federal_withholding": federal income tax withheld (W-2 box 2, 1099 box 4)

Rules:
1. Amounts are plain numbers in dollars, e.g. 50000.00. No currency signs or thousands separators.
2. If a box is empty, unreadable or not present, use null. NEVER guess and NEVER use 0 for a value you cannot read.
3. Omit keys that do not belong to the identified form.
4. Output ONLY the JSON object. No markdown fences, no commentary."#;

/// User message accompanying the page images.
///
/// Includes whatever partial text the reader recovered, which helps the model
/// with low-quality scans.
pub fn structuring_request(input: &DocumentInput) -> String {
    let mut request = format!("Document: {}\n", input.name);
    if let Some(hint) = &input.kind_hint {
        request.push_str(&format!("Declared form type: {}\n", hint));
    }
    let partial = input.text();
    if partial.trim().is_empty() {
        request.push_str("No text layer is available; read the attached page images.");
    } else {
        request.push_str(&format!(
            "Partial text recovered from the document:\n\"\"\"\n{}\n\"\"\"",
            partial.trim()
        ));
    }
    request
}
