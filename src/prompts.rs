//! Prompts for VLM-based petition extraction.
//!
//! Centralising the prompt here keeps the vendor adapters free of prompt
//! text and lets tests inspect it without calling a real vendor.
//!
//! Callers can override the default via [`crate::config::PipelineConfig::prompt`];
//! the constant here is used only when no override is provided.

/// Default prompt for turning one cropped petition page into signer rows.
///
/// The field names match [`crate::record::ExtractionRecord`]. Asking for a
/// bare JSON array (no fences) is best effort: every vendor adapter still
/// tolerates fenced output.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are transcribing a scanned page of a handwritten petition. The image shows a table where each row is one signer.

Return a JSON array with one object per signer row, in the order the rows appear from top to bottom. Each object has these keys:

- "name":    the signer's printed name, exactly as written
- "address": the street address, including house number and street name
- "date":    the date written on the row, as written (or "" if absent)
- "ward":    the ward number if the sheet has one (or "" if absent)

Rules:
1. Skip rows that are completely empty.
2. Do not invent values. If a field is illegible, use your best reading; if it is missing, use "".
3. Output ONLY the JSON array. Do not wrap it in ```json fences. Do not add commentary.
4. If the page contains no signer rows, output []."#;
