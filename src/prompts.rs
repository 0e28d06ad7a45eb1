//! Extraction prompts for purchase-order documents.
//!
//! Centralising the prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the reply schema must match
//!    [`crate::record::StructuredRecord`] field for field; one file to edit
//!    keeps them aligned.
//!
//! 2. **Testability** — unit tests can inspect the prompt directly without
//!    calling a real model, so schema drift is caught at test time.
//!
//! Callers can override via [`crate::config::PipelineConfig::extraction_prompt`];
//! the constants here are used only when no override is provided.

/// Default prompt for extracting order data from scanned page images.
///
/// This prompt is used when `PipelineConfig::extraction_prompt` is `None`.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert at reading scanned Korean purchase-order documents (발주서). Extract the order data from the attached page images.

Follow these rules precisely:

1. OUTPUT FORMAT
   - Output ONLY one JSON object
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations

2. SCHEMA
   - Use exactly these keys: "order_date", "client_name", "phone_number",
     "address", "consignee", "payment_type", "remarks", "items"
   - "items" is an array of objects with keys "item_name", "spec", "qty"
   - "qty" is a number, never a string; strip units such as EA or 개
   - "spec" is the size/standard column (규격) when present, otherwise ""

3. VALUES
   - Dates must be "YYYY-MM-DD"; convert forms like 2024.05.20 or 2024/05/20
   - If a field is not on the document, use "" for strings and 0 for "qty"
   - Never invent values that are not visible on the page
   - Keep Korean text as-is; do not translate names, items, or addresses

4. EXAMPLE
   {"order_date":"2024-05-20","client_name":"OO건설","phone_number":"010-1234-5678","address":"서울시 강남구 테헤란로 1","consignee":"홍길동","payment_type":"월말결제","remarks":"","items":[{"item_name":"단열재","spec":"50T","qty":10}]}"#;

/// Build the extraction prompt, appending a client-identity rule when the
/// operator configured client-name exclusions for their own company.
///
/// Purchase orders show both parties; without this rule the model sometimes
/// returns the receiving company as the client.
pub fn build_extraction_prompt(excluded_keywords: &[String]) -> String {
    if excluded_keywords.is_empty() {
        return DEFAULT_EXTRACTION_PROMPT.to_string();
    }
    format!(
        r#"{DEFAULT_EXTRACTION_PROMPT}

5. CLIENT IDENTITY
   - "client_name" is the ORDERING party, never the receiving company
   - It is never one of: {}
   - If the document shows one of those names, find the other party"#,
        excluded_keywords.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_record_field() {
        for field in [
            "order_date",
            "client_name",
            "phone_number",
            "address",
            "consignee",
            "payment_type",
            "remarks",
            "items",
            "item_name",
            "spec",
            "qty",
        ] {
            assert!(
                DEFAULT_EXTRACTION_PROMPT.contains(field),
                "prompt missing {field}"
            );
        }
    }

    #[test]
    fn exclusion_clause_is_appended_only_when_configured() {
        let plain = build_extraction_prompt(&[]);
        assert_eq!(plain, DEFAULT_EXTRACTION_PROMPT);

        let with = build_extraction_prompt(&["우리자재".to_string(), "우리자재(주)".to_string()]);
        assert!(with.contains("우리자재, 우리자재(주)"));
        assert!(with.starts_with(DEFAULT_EXTRACTION_PROMPT));
    }
}
