use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use querywarden::error::{GENERATION_SERVICE_ERROR, NON_SELECT_QUERY_ERROR, SENSITIVE_QUERY_ERROR, SQL_PARSE_ERROR};
use querywarden::generation::CompletionService;
use querywarden::rewrite::BusinessRules;
use querywarden::Pipeline;

/// Replays a fixed reply and counts how often it was asked.
struct Recorded {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

impl Recorded {
    fn ok(reply: &str) -> Self {
        Self { reply: Ok(reply.to_string()), calls: AtomicUsize::new(0) }
    }

    fn failing(msg: &str) -> Self {
        Self { reply: Err(msg.to_string()), calls: AtomicUsize::new(0) }
    }
}

impl CompletionService for Recorded {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("Question: "));
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

fn envelope(sql: &str) -> String {
    serde_json::json!({"SQL": sql, "TEXT": "Sales per store.", "CHART_TITLE": "Store Sales"}).to_string()
}

fn pipeline() -> Pipeline {
    Pipeline::new(BusinessRules::default().with_table("[dbo].[T]"))
}

#[tokio::test]
async fn store_listing_is_enforced_and_rolled_up() {
    let service = Recorded::ok(&format!("```json\n{}\n```", envelope("SELECT [Profitcenter_Name], [Sales] FROM [dbo].[T]")));
    let answer = pipeline().answer("top stores, store level data", &service).await.expect("answer");
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    assert!(answer.sql.starts_with("SELECT [Profitcenter_Name] AS [Store Name], SUM([Sales]) AS [Sales] FROM [dbo].[T] WHERE "));
    assert!(answer.sql.contains("[Level] = '1'"));
    assert!(answer.sql.ends_with("GROUP BY [Profitcenter_Name] ORDER BY SUM([Sales]) DESC"));
    assert_eq!(answer.explanation, "Sales per store.");
    assert_eq!(answer.chart_title, "Store Sales");
    assert_eq!(answer.columns_tag(), "Company_Name, Level, Profitcenter_Name, Region_Name, Sales");
}

#[tokio::test]
async fn sensitive_question_never_reaches_the_service() {
    let service = Recorded::ok(&envelope("SELECT [a] FROM [T]"));
    let err = pipeline().answer("What columns does the sales table have?", &service).await.unwrap_err();
    assert_eq!(err.code(), SENSITIVE_QUERY_ERROR);
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn write_statements_are_declined() {
    let service = Recorded::ok(&envelope("UPDATE [dbo].[T] SET [Sales] = 0"));
    let err = pipeline().answer("zero out sales", &service).await.unwrap_err();
    assert_eq!(err.code(), NON_SELECT_QUERY_ERROR);
    assert_eq!(err.title(), "Invalid Operation");
}

#[tokio::test]
async fn piggybacked_statement_is_declined() {
    let service = Recorded::ok(&envelope("SELECT [Sales] FROM [dbo].[T]; DROP TABLE [dbo].[T]"));
    let err = pipeline().answer("sales", &service).await.unwrap_err();
    assert_eq!(err.code(), NON_SELECT_QUERY_ERROR);
    assert_eq!(err.explanation(), "The generated query could not be processed safely.");
}

#[tokio::test]
async fn batch_statement_without_semicolon_is_declined() {
    let service = Recorded::ok(&envelope("SELECT [Sales] FROM [dbo].[T] DROP TABLE [dbo].[T]"));
    let err = pipeline().answer("sales", &service).await.unwrap_err();
    assert_eq!(err.code(), NON_SELECT_QUERY_ERROR);
    assert_eq!(err.explanation(), "The generated query could not be processed safely.");
}

#[tokio::test]
async fn region_level_reply_keeps_rows_with_blank_company() {
    let service = Recorded::ok(&envelope(
        "SELECT [Region_Name], [Sales] FROM [dbo].[T] \
         WHERE ISNULL(LTRIM(RTRIM([Company_Name])), '') NOT IN ('', 'N/A') \
         AND ISNULL(LTRIM(RTRIM([Region_Name])), '') NOT IN ('', 'N/A')",
    ));
    let answer = pipeline().answer("sales by region, region level data", &service).await.expect("answer");
    assert!(!answer.sql.contains("RTRIM([Company_Name])"), "{}", answer.sql);
    assert!(answer.sql.contains("[Level] = '2' AND [Company_Name] IS NULL"));
    assert!(answer.sql.contains("GROUP BY [Region_Name]"));
}

#[tokio::test]
async fn unparseable_reply_is_declined() {
    let service = Recorded::ok("Sorry, I can't produce JSON today.");
    let err = pipeline().answer("sales by month", &service).await.unwrap_err();
    assert_eq!(err.code(), SQL_PARSE_ERROR);
    assert_eq!(err.http_status(), 500);
}

#[tokio::test]
async fn service_failure_maps_to_its_own_sentinel() {
    let service = Recorded::failing("connection reset");
    let err = pipeline().answer("sales by month", &service).await.unwrap_err();
    assert_eq!(err.code(), GENERATION_SERVICE_ERROR);
    assert_eq!(err.http_status(), 502);
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn pipeline_serves_concurrent_requests() {
    let pipeline = std::sync::Arc::new(pipeline());
    let mut handles = Vec::new();
    for n in 0..4 {
        let p = pipeline.clone();
        handles.push(tokio::spawn(async move {
            let service = Recorded::ok(&envelope(&format!("SELECT TOP {} [Company_Name] FROM [dbo].[T]", n + 1)));
            p.answer("company level data", &service).await.map(|a| a.sql)
        }));
    }
    for (n, h) in handles.into_iter().enumerate() {
        let sql = h.await.expect("join").expect("answer");
        assert!(sql.starts_with(&format!("SELECT TOP {} [Company_Name] AS [Company Name]", n + 1)), "{}", sql);
        assert!(sql.contains("[Profitcenter_Name] IS NULL"));
    }
}

#[test]
fn recorded_reply_can_be_finished_without_a_service() {
    let answer = pipeline()
        .finish("region level data", &envelope("SELECT [Region_Name], [Sales] FROM [dbo].[T]"))
        .expect("finish");
    assert!(answer.sql.contains("[Company_Name] IS NULL"));
    assert!(!answer.sql.contains("RTRIM([Company_Name])"));
    let json = serde_json::to_value(&answer).unwrap();
    assert_eq!(json["sql_query_columns"], "Company_Name, Level, Region_Name, Sales");
}
