use regex::Regex;
use thiserror::Error;

/// Markers that typically introduce a trailing natural-language explanation
/// after the statement.
pub const DEFAULT_EXPLANATION_MARKERS: [&str; 4] =
    ["\n\nThis query", "\n\nExplanation", "\n\nNote:", "\n\n--"];

#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// The priming prefix the prompt ends with, e.g. "SELECT". Empty disables
    /// prefix handling.
    pub response_prefix: String,
    pub explanation_markers: Vec<String>,
}

impl SanitizeOptions {
    pub fn new(response_prefix: &str) -> Self {
        Self {
            response_prefix: response_prefix.trim().to_string(),
            explanation_markers: DEFAULT_EXPLANATION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Distinct from an execution failure: the generated text never became a
/// statement, so nothing was sent to the data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("generated text contained no executable statement")]
    Empty,
}

/// Normalizes raw generation output into an executable statement.
///
/// Rules apply in a fixed order, chosen so the transform is idempotent:
/// 1. code-fence extraction (fenced content wins over surrounding chatter)
/// 2. trailing-explanation truncation at the earliest marker
/// 3. trailing statement terminators collapse to at most one
/// 4. emptiness check
/// 5. doubled leading keyword removal (a model echoing the priming prefix)
/// 6. priming-prefix prepend when the text starts with neither the prefix
///    nor a CTE
pub fn sanitize(raw: &str, options: &SanitizeOptions) -> Result<String, SanitizeError> {
    let mut text = extract_fenced(raw.trim());

    // Cut everything from the earliest explanation marker onwards.
    if let Some(cut) = options
        .explanation_markers
        .iter()
        .filter_map(|m| text.find(m.as_str()))
        .min()
    {
        text.truncate(cut);
    }
    let mut text = text.trim().to_string();

    while text.ends_with(";;") {
        text.pop();
    }

    if text.trim_end_matches(';').trim().is_empty() {
        return Err(SanitizeError::Empty);
    }

    let prefix = options.response_prefix.trim();
    if !prefix.is_empty() {
        let prefix_upper = prefix.to_uppercase();
        let doubled = format!("{} {}", prefix_upper, prefix_upper);
        let cte_echo = format!("{} WITH", prefix_upper);
        loop {
            let upper = text.to_uppercase();
            if upper.starts_with(&doubled) || (prefix_upper != "WITH" && upper.starts_with(&cte_echo))
            {
                text = text[prefix.len() + 1..].trim_start().to_string();
            } else {
                break;
            }
        }

        let upper = text.to_uppercase();
        if !upper.starts_with(&prefix_upper) && !upper.starts_with("WITH") {
            text = format!("{} {}", prefix, text);
        }
    }

    Ok(text.trim().to_string())
}

/// Prefers the content of the first fenced code block; a fence without a
/// closing marker degrades to stripping the fence lines themselves.
fn extract_fenced(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }

    let fence = Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").unwrap();
    if let Some(captures) = fence.captures(text) {
        return captures[1].trim().to_string();
    }

    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SanitizeOptions {
        SanitizeOptions::new("SELECT")
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(sanitize("```sql\nSELECT 1\n```", &opts()).unwrap(), "SELECT 1");
        assert_eq!(sanitize("```\nSELECT 1\n```", &opts()).unwrap(), "SELECT 1");
    }

    #[test]
    fn fenced_content_wins_over_surrounding_chatter() {
        let raw = "Here is the query:\n```sql\nSELECT COUNT(*) FROM t\n```\nHope that helps!";
        assert_eq!(sanitize(raw, &opts()).unwrap(), "SELECT COUNT(*) FROM t");
    }

    #[test]
    fn removes_doubled_keyword_before_cte() {
        let raw = "SELECT WITH cte AS (...) SELECT * FROM cte";
        assert_eq!(
            sanitize(raw, &opts()).unwrap(),
            "WITH cte AS (...) SELECT * FROM cte"
        );
    }

    #[test]
    fn removes_repeated_leading_keyword() {
        assert_eq!(
            sanitize("SELECT SELECT SELECT 1", &opts()).unwrap(),
            "SELECT 1"
        );
    }

    #[test]
    fn prepends_prefix_when_model_continues_from_priming() {
        assert_eq!(
            sanitize("COUNT(*) FROM orders", &opts()).unwrap(),
            "SELECT COUNT(*) FROM orders"
        );
    }

    #[test]
    fn cte_is_not_prefixed() {
        let raw = "WITH cte AS (SELECT 1) SELECT * FROM cte";
        assert_eq!(sanitize(raw, &opts()).unwrap(), raw);
    }

    #[test]
    fn collapses_trailing_terminators() {
        assert_eq!(sanitize("SELECT 1;;;", &opts()).unwrap(), "SELECT 1;");
        assert_eq!(sanitize("SELECT 1;", &opts()).unwrap(), "SELECT 1;");
    }

    #[test]
    fn truncates_trailing_explanation() {
        let raw = "SELECT COUNT(*) FROM t\n\nThis query counts all rows in the table.";
        assert_eq!(sanitize(raw, &opts()).unwrap(), "SELECT COUNT(*) FROM t");

        let raw = "SELECT 1\n\nNote: assumes the table is non-empty";
        assert_eq!(sanitize(raw, &opts()).unwrap(), "SELECT 1");
    }

    #[test]
    fn empty_and_terminator_only_input_is_a_sanitization_failure() {
        assert_eq!(sanitize("", &opts()), Err(SanitizeError::Empty));
        assert_eq!(sanitize("   \n  ", &opts()), Err(SanitizeError::Empty));
        assert_eq!(sanitize(";;;", &opts()), Err(SanitizeError::Empty));
        assert_eq!(sanitize("```\n```", &opts()), Err(SanitizeError::Empty));
    }

    #[test]
    fn empty_prefix_disables_keyword_handling() {
        let options = SanitizeOptions::new("");
        assert_eq!(
            sanitize("COUNT(*) FROM t", &options).unwrap(),
            "COUNT(*) FROM t"
        );
    }

    #[test]
    fn idempotent_on_every_fixture() {
        let fixtures = [
            "SELECT 1",
            "```sql\nSELECT 1\n```",
            "SELECT WITH cte AS (SELECT 1) SELECT * FROM cte",
            "SELECT SELECT 1",
            "COUNT(*) FROM orders",
            "WITH cte AS (SELECT 1) SELECT * FROM cte;",
            "SELECT 1;;;",
            "SELECT region, COUNT(*) FROM t GROUP BY region\n\nExplanation: groups rows",
            "Here you go:\n```sql\nSELECT a FROM b\n```",
        ];
        for raw in fixtures {
            let once = sanitize(raw, &opts()).unwrap();
            let twice = sanitize(&once, &opts()).unwrap();
            assert_eq!(once, twice, "sanitize not idempotent for {:?}", raw);
        }
    }
}
