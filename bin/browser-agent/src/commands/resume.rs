use browser_agent_core::{Paths, ThreadId};

use super::{build_runtime, print_outcome, with_shutdown};

pub async fn run(paths: &Paths, thread: &str) -> anyhow::Result<()> {
    let thread_id = ThreadId::from(thread);
    let runtime = build_runtime(paths).await?;

    let outcome = with_shutdown(&runtime, async { Ok(runtime.resume(&thread_id).await?) }).await?;
    if let Some(outcome) = outcome {
        print_outcome(&outcome);
    }
    Ok(())
}
