/// Unwraps a model reply from a Markdown code fence of any language tag.
/// An unterminated fence still yields its body.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s.to_string();
    };

    // The info string runs to the end of the opening line.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n[]\n```"), "[]");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_other_tags_and_unterminated_fence() {
        assert_eq!(strip_code_blocks("```JSON5\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_blocks("```javascript\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_blocks("```json\n{\"scenes\": []}"), "{\"scenes\": []}");
        assert_eq!(strip_code_blocks("```[]```"), "[]");
    }
}
