use browser_agent_core::{Paths, ThreadId};

use super::build_runtime;

pub async fn run(paths: &Paths, thread: &str) -> anyhow::Result<()> {
    let thread_id = ThreadId::from(thread);
    let runtime = build_runtime(paths).await?;

    match runtime.forget(&thread_id).await? {
        0 => println!("No checkpoint for thread '{}'.", thread_id),
        1 => println!("Forgot thread '{}'.", thread_id),
        n => println!("Forgot thread '{}' and {} sub-agent thread(s).", thread_id, n - 1),
    }
    Ok(())
}
