use relaycell_core::config::TOKEN_ENV;
use relaycell_core::{Config, Paths};

pub fn run(paths: &Paths) -> anyhow::Result<()> {
    println!("relaycell status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let mut config = Config::load_or_default(paths)?;
    let env_token = std::env::var(TOKEN_ENV).map(|t| !t.trim().is_empty()).unwrap_or(false);
    config.apply_env();

    let token_status = match (config.has_token(), env_token) {
        (true, true) => format!("✓ from {}", TOKEN_ENV),
        (true, false) => "✓ from config".to_string(),
        (false, _) => format!("✗ not set (export {} or set discord.botToken)", TOKEN_ENV),
    };
    println!("Token:     {}", token_status);
    println!("HTTP:      http://{}:{}", config.http.host, config.http.port);
    println!("Max chars: {}", config.bridge.max_message_chars);
    println!(
        "Backoff:   {}ms → {}ms (jitter {}, reset after {}ms up)",
        config.supervisor.backoff_base_ms,
        config.supervisor.backoff_cap_ms,
        config.supervisor.jitter,
        config.supervisor.stable_after_ms
    );
    println!();

    if !config.presence.enabled {
        println!("Presence:  disabled");
    } else {
        println!("Presence ({:?}):", config.presence.selection);
        for spec in &config.presence.candidates {
            match &spec.activity {
                Some(activity) => println!(
                    "  {:<10} {:?} \"{}\"",
                    spec.status.as_str(),
                    activity.kind,
                    activity.name
                ),
                None => println!("  {}", spec.status.as_str()),
            }
        }
    }

    if let Err(e) = config.validate() {
        println!();
        println!("⚠ {}", e);
    }

    if !config_exists {
        println!();
        println!("Run `relaycell init` to write a config file.");
    }

    Ok(())
}
