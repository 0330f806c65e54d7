use browser_agent_core::{Paths, ThreadId};
use uuid::Uuid;

use super::{build_runtime, parse_value, print_outcome, with_shutdown};

pub async fn run(paths: &Paths, thread: &str, id: &str, value: &str) -> anyhow::Result<()> {
    let thread_id = ThreadId::from(thread);
    let interrupt_id = Uuid::parse_str(id.trim())
        .map_err(|e| anyhow::anyhow!("invalid interrupt id '{}': {}", id, e))?;
    let runtime = build_runtime(paths).await?;

    if !runtime.respond(&thread_id, interrupt_id, parse_value(value)).await? {
        println!("✗ Interrupt {} is not pending on thread '{}'.", interrupt_id, thread_id);
        return Ok(());
    }
    println!("✓ Response recorded, resuming thread '{}'", thread_id);

    let outcome = with_shutdown(&runtime, async { Ok(runtime.resume(&thread_id).await?) }).await?;
    if let Some(outcome) = outcome {
        print_outcome(&outcome);
    }
    Ok(())
}
