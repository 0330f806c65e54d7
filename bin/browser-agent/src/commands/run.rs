use browser_agent_agent::{AgentRuntime, RunOutcome};
use browser_agent_core::{Paths, ThreadId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::{build_runtime, parse_value, print_outcome, with_shutdown};

pub async fn run(
    paths: &Paths,
    thread: Option<String>,
    message: Option<String>,
    interactive: bool,
) -> anyhow::Result<()> {
    let thread_id = ThreadId::from(thread.unwrap_or_else(|| Uuid::new_v4().to_string()));
    let runtime = build_runtime(paths).await?;
    println!("Thread: {}", thread_id);

    let finished = with_shutdown(&runtime, drive(&runtime, &thread_id, message, interactive)).await?;
    if finished.is_none() {
        println!();
        println!("Interrupted. Continue later with `browser-agent resume --thread {}`", thread_id);
    }
    Ok(())
}

async fn drive(
    runtime: &AgentRuntime,
    thread_id: &ThreadId,
    message: Option<String>,
    interactive: bool,
) -> anyhow::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let task = match message {
        Some(task) => task,
        None => {
            prompt("Task: ").await?;
            match stdin.next_line().await? {
                Some(line) if !line.trim().is_empty() => line,
                _ => anyhow::bail!("no task given"),
            }
        }
    };

    let mut outcome = runtime.run(thread_id, &task).await?;
    loop {
        print_outcome(&outcome);
        let RunOutcome::Suspended { interrupt_id, .. } = &outcome else {
            return Ok(());
        };
        let interrupt_id = *interrupt_id;

        if !interactive {
            println!();
            println!(
                "Answer with `browser-agent respond --thread {} --id {} <answer>`",
                thread_id, interrupt_id
            );
            return Ok(());
        }

        prompt("answer> ").await?;
        let Some(line) = stdin.next_line().await? else {
            println!();
            println!("stdin closed; the thread stays suspended.");
            return Ok(());
        };
        if line.trim().is_empty() {
            println!("Left unanswered; the thread stays suspended.");
            return Ok(());
        }

        if !runtime.respond(thread_id, interrupt_id, parse_value(&line)).await? {
            anyhow::bail!("interrupt {} is no longer waiting for an answer", interrupt_id);
        }
        outcome = runtime.resume(thread_id).await?;
    }
}

async fn prompt(text: &str) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
