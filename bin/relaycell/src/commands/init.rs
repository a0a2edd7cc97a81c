use relaycell_core::config::TOKEN_ENV;
use relaycell_core::{Config, Paths};

pub fn run(paths: &Paths, force: bool) -> anyhow::Result<()> {
    let config_path = paths.config_file();

    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    Config::default().save(&config_path)?;

    println!("✓ Wrote {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. export {}=<bot token>", TOKEN_ENV);
    println!("  2. relaycell serve");
    Ok(())
}
