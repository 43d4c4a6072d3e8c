//! Instruction prompt sent to the generation service.

use crate::rewrite::business::BusinessRules;

/// Physical columns most questions need, with the meaning business users attach to them.
const CORE_COLUMNS: &[(&str, &str)] = &[
    ("[Level]", "granularity code of the row (see level definitions)"),
    ("[From_Date]", "business date; use YEAR(), MONTH(), DAY() for calendar parts"),
    ("[STATUS]", "'W' written, 'D' delivered"),
    ("[Region_Name]", "region"),
    ("[Company_Name]", "company"),
    ("[Profitcenter_Name]", "store"),
    ("[Name]", "salesperson name"),
    ("[usr_Id]", "salesperson id"),
    ("[Sales]", "sales amount (USD)"),
    ("[Total Sales]", "total sales (USD)"),
    ("[cogs_sale]", "cost of goods (USD)"),
    ("[Gross Margin]", "gross margin (%)"),
    ("[Sales Count]", "number of sales"),
    ("[Traffic Count]", "store traffic count"),
    ("[LastYearSales]", "last year sales (USD)"),
    ("[sales_goal]", "sales goal (USD)"),
];

pub fn build_prompt(question: &str, rules: &BusinessRules) -> String {
    let columns: String = CORE_COLUMNS.iter().map(|(c, d)| format!("- {} : {}\n", c, d)).collect();
    let levels: String = rules
        .levels
        .rules()
        .iter()
        .map(|r| {
            let companion = r.companion.as_ref().map(|c| format!(" and {}", c.predicate())).unwrap_or_default();
            format!("- {} → {}{}\n", r.phrase, r.predicate, companion)
        })
        .collect();
    let not_blank = rules.not_blank_columns.join(", ");
    let overrides: Vec<String> = rules
        .levels
        .rules()
        .iter()
        .filter_map(|r| r.nulled_column().map(|c| format!("{} for {}", c, r.phrase)))
        .collect();
    let overrides = if overrides.is_empty() {
        String::new()
    } else {
        format!(
            "\n   Exception: when a level definition requires a column IS NULL, do not apply this filter to that column ({}).",
            overrides.join("; ")
        )
    };
    let entities: Vec<String> = rules.entities.iter().map(|e| format!("{} AS {}", e.column, e.alias)).collect();

    format!(
        r#"You are an expert in generating **valid T-SQL** queries for Microsoft SQL Server.

### IMPORTANT:
- Always use the **actual column names** from the database table `{table}` when writing SQL.
- Output aliases with AS are allowed; never use an alias inside WHERE, GROUP BY or HAVING.

### CORE COLUMNS:
{columns}
### LEVEL DEFINITIONS (business rules):
{levels}
RULES:
1. Only **SELECT** queries, exactly one statement, no modifications.
2. Use actual column names in the SQL and enclose names in square brackets.
3. Skip null/empty/'N/A' values for all displayed columns.
4. Always filter out rows where any of {not_blank} IS NULL, empty, or 'N/A'.{overrides}
5. If a list by entity ({entities}) is requested, aggregate numeric metrics using SUM(...) and **GROUP BY** that entity.
6. Unless otherwise specified, aggregate across statuses and dates.
7. Default sort: SUM({metric}) DESC unless otherwise specified.
8. Return strictly this JSON (no markdown code fences):
{{
  "SQL": "<generated SQL query using actual column names>",
  "TEXT": "<short explanation in plain English>",
  "CHART_TITLE": "<chart title>"
}}

Question: "{question}"
"#,
        table = rules.table,
        columns = columns,
        levels = levels,
        not_blank = not_blank,
        overrides = overrides,
        entities = entities.join(", "),
        metric = rules.metric.column,
        question = question.trim(),
    )
}
