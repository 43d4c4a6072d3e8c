use std::io::Read;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use querywarden::config::Settings;
use querywarden::generation::OpenAiCompletion;
use querywarden::pipeline::Pipeline;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --question \"<text>\"                 # ask the completion service\n  {program} --question \"<text>\" --reply <file>   # use a recorded service reply\n  {program} --question \"<text>\" --sql \"<SQL>\"     # rewrite SQL directly\n  {program}                                       # reads the question from stdin\n\nFlags:\n  -q, --question <text>   Natural-language question\n  --reply <file>          File holding a raw service reply (JSON envelope)\n  --sql <SQL>             Candidate SQL to validate and rewrite; prints only the SQL\n  -h, --help              Show this help\n\nEnvironment:\n  OPENAI_API_KEY, QUERYWARDEN_COMPLETION_URL, QUERYWARDEN_MODEL, QUERYWARDEN_TIMEOUT_SECS,\n  QUERYWARDEN_TABLE, QUERYWARDEN_LEVEL_RULES, RUST_LOG"
    );
}

fn require_value(args: &[String], i: usize, flag: &str, program: &str) -> String {
    match args.get(i + 1) {
        Some(v) => v.clone(),
        None => {
            eprintln!("{} requires a value", flag);
            print_usage(program);
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = std::env::args().collect();
    let program = args.remove(0);

    let mut question: Option<String> = None;
    let mut reply_file: Option<String> = None;
    let mut sql: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--question" | "-q" => { question = Some(require_value(&args, i, "--question", &program)); i += 2; }
            "--reply" => { reply_file = Some(require_value(&args, i, "--reply", &program)); i += 2; }
            "--sql" => { sql = Some(require_value(&args, i, "--sql", &program)); i += 2; }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            unk => {
                if question.is_none() { question = Some(unk.to_string()); i += 1; continue; }
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
    }

    let question = match question {
        Some(q) => q,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading question from stdin")?;
            buf
        }
    };
    if question.trim().is_empty() {
        print_usage(&program);
        bail!("no question given");
    }

    let settings = Settings::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "querywarden",
        "querywarden starting: RUST_LOG='{}', model={}, table={}, level_rules={}",
        rust_log,
        settings.model,
        settings.table,
        settings.level_rules_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<built-in>".to_string())
    );
    let pipeline = Pipeline::new(settings.business_rules()?);

    if let Some(sql) = sql {
        let outcome = pipeline.screen(&question).and_then(|_| pipeline.rewrite(&question, &sql));
        return match outcome {
            Ok(rewritten) => {
                println!("{}", rewritten);
                Ok(())
            }
            Err(e) => decline_and_exit(&e),
        };
    }

    let outcome = match reply_file {
        Some(path) => {
            let reply = std::fs::read_to_string(&path).with_context(|| format!("reading reply file {}", path))?;
            pipeline.screen(&question).and_then(|_| pipeline.finish(&question, &reply))
        }
        None => {
            let service = OpenAiCompletion::from_settings(&settings)?;
            pipeline.answer(&question, &service).await
        }
    };
    match outcome {
        Ok(answer) => {
            println!("{}", serde_json::to_string_pretty(&answer)?);
            Ok(())
        }
        Err(e) => decline_and_exit(&e),
    }
}

fn decline_and_exit(err: &querywarden::error::PipelineError) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&err.decline())?);
    std::process::exit(1);
}
