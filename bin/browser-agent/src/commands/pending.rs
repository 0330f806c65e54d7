use browser_agent_core::{Paths, ThreadId};

use super::{build_runtime, print_interrupt};

pub async fn run(paths: &Paths, thread: &str) -> anyhow::Result<()> {
    let thread_id = ThreadId::from(thread);
    let runtime = build_runtime(paths).await?;

    if runtime.checkpoint(&thread_id).await?.is_none() {
        println!("No checkpoint for thread '{}'.", thread_id);
        return Ok(());
    }

    let pending = runtime.pending(&thread_id).await?;
    if pending.is_empty() {
        println!("Thread '{}' has no open interrupts.", thread_id);
        return Ok(());
    }

    println!("Open interrupts for '{}':", thread_id);
    for pi in &pending {
        print_interrupt(pi);
    }
    Ok(())
}
