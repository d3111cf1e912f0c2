use crate::config::{HintStyle, PromptFormat, PromptStructure};
use crate::semantic::SemanticContext;
use serde::{Deserialize, Serialize};

/// One failed attempt, fed back into the next prompt as the self-repair
/// signal and surfaced to the caller in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub sql: String,
    pub error: String,
}

/// Assembles one generation request payload. Pure and deterministic: no
/// network or state access, so prompt shape is unit-testable without a
/// backend. Section order is configuration-driven; prior failures always land
/// after the static context and before the final question restatement.
pub fn build_prompt(
    ctx: &SemanticContext,
    question: &str,
    failures: &[AttemptFailure],
    format: &PromptFormat,
) -> String {
    let mut parts: Vec<String> = vec![
        "Generate a DuckDB SQL query to answer the question based on the schema and data below."
            .to_string(),
    ];

    let schema = schema_section(ctx);
    let samples = samples_section(ctx);
    let hints = hints_section(ctx, format.hint_style);

    let ordered: Vec<Option<String>> = match format.structure {
        PromptStructure::SchemaSamplesHints => vec![Some(schema), samples, hints],
        PromptStructure::SchemaHintsSamples => vec![Some(schema), hints, samples],
        PromptStructure::HintsSchemaSamples => vec![hints, Some(schema), samples],
    };
    parts.extend(ordered.into_iter().flatten());

    parts.push(format!(
        "/* Query Rules */\n\
         -- Return ONLY a valid DuckDB SQL SELECT statement\n\
         -- The table is named: {}\n\
         -- Use single quotes for strings; escape apostrophes by doubling: 'O''Brien'\n\
         -- For date filtering with VARCHAR dates, cast to TIMESTAMP: CAST(date_col AS TIMESTAMP)",
        ctx.table_name
    ));

    for failure in failures {
        parts.push(failure_section(failure));
    }

    parts.push(format!("Question: {}", question));

    let mut prompt = parts.join("\n\n");
    if !format.response_prefix.trim().is_empty() {
        // Response priming: the model continues from this prefix.
        prompt.push_str("\n\n");
        prompt.push_str(format.response_prefix.trim());
    }
    prompt
}

fn schema_section(ctx: &SemanticContext) -> String {
    format!("/* Table Schema */\n{}", ctx.schema_ddl)
}

fn samples_section(ctx: &SemanticContext) -> Option<String> {
    ctx.sample_csv
        .as_ref()
        .map(|csv| format!("/* Sample Data (CSV format) */\n{}", csv))
}

fn hints_section(ctx: &SemanticContext, style: HintStyle) -> Option<String> {
    let mut blocks = Vec::new();

    if !ctx.categorical_values.is_empty() {
        let mut lines = vec!["/* Categorical Column Values */".to_string()];
        for (col, values) in &ctx.categorical_values {
            let rendered = if values.len() <= 20 {
                quote_list(values)
            } else {
                format!("{} ... ({} total)", quote_list(&values[..20]), values.len())
            };
            lines.push(style_line(style, &format!("{}: {}", col, rendered)));
        }
        blocks.push(lines.join("\n"));
    }

    if !ctx.date_ranges.is_empty() {
        let mut lines = vec!["/* Date Ranges */".to_string()];
        for (col, min, max) in &ctx.date_ranges {
            lines.push(style_line(style, &format!("{}: {} to {}", col, min, max)));
        }
        blocks.push(lines.join("\n"));
    }

    if !ctx.auto_query_notes.is_empty() {
        let mut lines = vec!["/* Reference Query Results */".to_string()];
        for note in &ctx.auto_query_notes {
            lines.push(style_line(style, note));
        }
        blocks.push(lines.join("\n"));
    }

    if !ctx.hints.is_empty() {
        let mut lines = vec!["/* Important Notes */".to_string()];
        for hint in &ctx.hints {
            lines.push(style_line(style, hint));
        }
        blocks.push(lines.join("\n"));
    }

    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

fn failure_section(failure: &AttemptFailure) -> String {
    let sql = if failure.sql.is_empty() {
        "(no SQL was produced)"
    } else {
        failure.sql.as_str()
    };
    format!(
        "/* PREVIOUS ATTEMPT FAILED - FIX THE ERROR */\n\
         Failed SQL:\n{}\n\n\
         Error message:\n{}\n\n\
         Analyze the error and generate corrected SQL. Do not repeat the same mistake.",
        sql, failure.error
    )
}

fn style_line(style: HintStyle, text: &str) -> String {
    match style {
        HintStyle::SqlComment => format!("-- {}", text),
        HintStyle::Plain => text.to_string(),
    }
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptFormat;
    use crate::semantic::ColumnInfo;

    fn context() -> SemanticContext {
        SemanticContext {
            table_name: "sales".into(),
            schema_ddl: "CREATE TABLE sales (\n    id INTEGER,\n    region VARCHAR\n);".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: "INTEGER".into(),
                },
                ColumnInfo {
                    name: "region".into(),
                    data_type: "VARCHAR".into(),
                },
            ],
            sample_csv: Some("id,region\n1,north".into()),
            categorical_values: vec![("region".into(), vec!["north".into(), "south".into()])],
            date_ranges: vec![],
            auto_query_notes: vec![],
            hints: vec!["Regions are lowercase".into()],
        }
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let ctx = context();
        let fmt = PromptFormat::default();
        let a = build_prompt(&ctx, "how many rows?", &[], &fmt);
        let b = build_prompt(&ctx, "how many rows?", &[], &fmt);
        assert_eq!(a, b);
    }

    #[test]
    fn default_structure_orders_schema_then_samples_then_hints() {
        let prompt = build_prompt(&context(), "q", &[], &PromptFormat::default());
        let schema = prompt.find("/* Table Schema */").unwrap();
        let samples = prompt.find("/* Sample Data (CSV format) */").unwrap();
        let hints = prompt.find("/* Categorical Column Values */").unwrap();
        assert!(schema < samples && samples < hints);
    }

    #[test]
    fn hints_first_structure_reorders_sections() {
        let fmt = PromptFormat {
            structure: crate::config::PromptStructure::HintsSchemaSamples,
            ..PromptFormat::default()
        };
        let prompt = build_prompt(&context(), "q", &[], &fmt);
        let schema = prompt.find("/* Table Schema */").unwrap();
        let hints = prompt.find("/* Categorical Column Values */").unwrap();
        assert!(hints < schema);
    }

    #[test]
    fn failures_render_exact_sql_and_error_before_question() {
        let failures = vec![AttemptFailure {
            sql: "SELECT nope FROM sales".into(),
            error: "Binder Error: column nope not found".into(),
        }];
        let prompt = build_prompt(&context(), "how many rows?", &failures, &PromptFormat::default());

        let block = prompt.find("/* PREVIOUS ATTEMPT FAILED").unwrap();
        let question = prompt.rfind("Question: how many rows?").unwrap();
        assert!(block < question);
        assert!(prompt.contains("SELECT nope FROM sales"));
        assert!(prompt.contains("Binder Error: column nope not found"));
    }

    #[test]
    fn response_prefix_terminates_the_prompt() {
        let prompt = build_prompt(&context(), "q", &[], &PromptFormat::default());
        assert!(prompt.ends_with("SELECT"));
    }

    #[test]
    fn empty_prefix_disables_priming() {
        let fmt = PromptFormat {
            response_prefix: String::new(),
            ..PromptFormat::default()
        };
        let prompt = build_prompt(&context(), "q", &[], &fmt);
        assert!(prompt.ends_with("Question: q"));
    }

    #[test]
    fn plain_hint_style_drops_comment_markers() {
        let fmt = PromptFormat {
            hint_style: crate::config::HintStyle::Plain,
            ..PromptFormat::default()
        };
        let prompt = build_prompt(&context(), "q", &[], &fmt);
        assert!(prompt.contains("\nRegions are lowercase"));
        assert!(!prompt.contains("-- Regions are lowercase"));
    }
}
