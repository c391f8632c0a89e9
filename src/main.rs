//! Hive - Rust 多智能体编排引擎
//!
//! 入口：初始化日志、按配置构建 Supervisor，并运行标准输入上的 REPL。
//! 每行作为一次请求；`:feedback <run_id> +|- [reason]`、`:ingest <path>`、`:end <agent>`、`:quit` 为命令。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use hive::core::create_engine_builder;
use hive::performance::Feedback;
use hive::react::StepStatus;
use hive::tools::RecordingUi;
use hive::{RunRequest, Supervisor, SupervisorEvent};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let supervisor = create_engine_builder(config_path)
        .with_ui(Arc::new(RecordingUi::new()))
        .build()
        .context("Failed to build engine")?;

    println!("hive ready. Type a request, or :feedback / :ingest / :end / :quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" {
            break;
        }
        let result = if let Some(rest) = line.strip_prefix(':') {
            command(&supervisor, rest).await
        } else {
            request(&supervisor, line).await
        };
        if let Err(e) = result {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}

async fn command(supervisor: &Supervisor, input: &str) -> anyhow::Result<()> {
    let (name, args) = input.split_once(' ').unwrap_or((input, ""));
    match name {
        "feedback" => {
            let mut parts = args.splitn(3, ' ');
            let (Some(run_id), Some(sign)) = (parts.next(), parts.next()) else {
                bail!("usage: :feedback <run_id> +|- [reason]");
            };
            let feedback = match sign {
                "+" => Feedback::Positive,
                "-" => Feedback::Negative,
                _ => bail!("feedback must be + or -"),
            };
            let run = supervisor
                .submit_feedback(run_id, feedback, parts.next())
                .await
                .context("Failed to apply feedback")?;
            println!("run {} final score {:.3}", run.id, run.final_score);
        }
        "ingest" => {
            let path = args.trim();
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {path}"))?;
            let n = supervisor
                .retriever()
                .ingest(path, "file", &text)
                .await
                .context("Failed to ingest file")?;
            println!("indexed {n} chunk(s) from {path}");
        }
        "end" => {
            let agent = args.trim();
            match supervisor.end_session(agent).await.context("Failed to end session")? {
                Some(item) => println!("remembered: {}", item.content),
                None => println!("nothing new to remember"),
            }
        }
        other => bail!("unknown command :{other}"),
    }
    Ok(())
}

async fn request(supervisor: &Supervisor, prompt: &str) -> anyhow::Result<()> {
    let mut handle = supervisor.run(RunRequest::new(prompt)).await.context("Failed to start run")?;
    let mut stdout = std::io::stdout();
    while let Some(event) = handle.next().await {
        match event {
            SupervisorEvent::Routed { agent_name, reasoning, .. } => {
                println!("[{agent_name}] {reasoning}");
            }
            SupervisorEvent::Thought { text } => println!("  (thinking) {text}"),
            SupervisorEvent::Content { text } => {
                print!("{text}");
                stdout.flush().ok();
            }
            SupervisorEvent::Metadata { .. } | SupervisorEvent::Usage { .. } => {}
            SupervisorEvent::ToolCall { tool, args } => println!("\n  -> {tool} {args}"),
            SupervisorEvent::ToolResult { tool, result } => println!("  <- {tool} {result}"),
            SupervisorEvent::PlanUpdate { steps } => {
                for s in steps {
                    let mark = match s.status {
                        StepStatus::Pending => " ",
                        StepStatus::InProgress => ">",
                        StepStatus::Completed => "x",
                    };
                    println!("  [{mark}] {}. {} ({})", s.step, s.task, s.agent);
                }
            }
            SupervisorEvent::RunRecorded { run } => {
                println!("\n  run {} score {:.3}", run.id, run.final_score);
            }
            SupervisorEvent::Error { message } => println!("\n{message}"),
            SupervisorEvent::Done => println!(),
        }
    }
    Ok(())
}
