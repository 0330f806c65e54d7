use browser_agent_core::{Config, Paths};
use std::io::{self, Write};

pub async fn run(paths: &Paths, force: bool) -> anyhow::Result<()> {
    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;
    Config::default().save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());
    println!("✓ Created sandbox: {}", paths.base.display());
    println!();
    println!("Next steps:");
    println!("  1. Set OPENAI_API_KEY or edit {}", paths.config_file().display());
    println!("  2. Run `browser-agent status` to verify configuration");
    println!("  3. Run `browser-agent run -m \"<task>\"` to start a thread");

    Ok(())
}
