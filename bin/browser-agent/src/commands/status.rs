use browser_agent_core::config::CheckpointBackend;
use browser_agent_core::Paths;
use browser_agent_storage::open_checkpoint_store;

pub async fn run(paths: &Paths) -> anyhow::Result<()> {
    println!("browser-agent status");
    println!("====================");
    println!();

    let config_path = paths.config_file();
    if config_path.exists() {
        println!("Config:   ✓ {}", config_path.display());
    } else {
        println!("Config:   ✗ not found (run `browser-agent init`)");
    }
    println!("Sandbox:  {}", paths.base.display());
    println!();

    let config = match super::load_config(paths) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Invalid configuration: {}", e);
            return Ok(());
        }
    };

    println!("Provider:");
    println!("  Model:    {}", config.provider.model);
    println!(
        "  API base: {}",
        config.provider.api_base.as_deref().unwrap_or("https://api.openai.com/v1")
    );
    if config.provider.api_key.trim().is_empty() {
        println!("  API key:  ✗ not set");
    } else {
        println!("  API key:  ✓ configured");
    }
    println!();

    println!("Browser:");
    match which::which(&config.browser.driver_binary) {
        Ok(path) => println!("  Driver:   ✓ {}", path.display()),
        Err(_) => println!("  Driver:   ✗ '{}' not on PATH", config.browser.driver_binary),
    }
    if config.browser.use_cdp {
        println!("  CDP port: {}", config.browser.cdp_port);
    }
    println!(
        "  Stream ports: {}..{}",
        config.browser.base_stream_port,
        u32::from(config.browser.base_stream_port) + u32::from(config.browser.max_port_offset)
    );
    println!("  Idle timeout: {}s", config.browser.idle_timeout_secs);
    println!();

    println!("Checkpoints:");
    let backend = match config.checkpoint.backend {
        CheckpointBackend::Sqlite => format!("sqlite ({})", config.checkpoint.sqlite_path(paths).display()),
        CheckpointBackend::Postgres => "postgres".to_string(),
    };
    println!("  Backend:  {}", backend);
    match open_checkpoint_store(&config.checkpoint, paths).await {
        Ok(store) => match store.list_threads().await {
            Ok(threads) if threads.is_empty() => println!("  Threads:  (none)"),
            Ok(threads) => {
                println!("  Threads:  {}", threads.len());
                for thread in threads {
                    let marker = match store.load(&thread).await {
                        Ok(Some(cp)) if cp.is_suspended() => "⏸",
                        Ok(Some(cp)) if cp.state.pending_interrupts.iter().any(|pi| pi.is_live()) => "⏸",
                        _ => "·",
                    };
                    println!("    {} {}", marker, thread);
                }
            }
            Err(e) => println!("  ✗ Could not list threads: {}", e),
        },
        Err(e) => println!("  ✗ Could not open store: {}", e),
    }

    Ok(())
}
