// src/cli/init.rs — First-time setup

use crate::infra::config::Config;
use crate::infra::paths;
use crate::memory::VersionStore;

/// Create directories, write a default config, open the database and seed
/// the module configs.
pub async fn run_init(db: Option<&str>, force: bool) -> anyhow::Result<()> {
    println!("tuneloop setup");
    println!();

    eprint!("  Creating directories... ");
    paths::ensure_dirs().await?;
    eprintln!("done");

    let config_path = paths::config_file_path();
    let config = if config_path.exists() && !force {
        println!("  Config: {} (already exists)", config_path.display());
        Config::load_from(&config_path)?
    } else {
        let config = Config::default();
        tokio::fs::write(&config_path, default_config_toml(&config)?).await?;
        println!("  Config: {} (written)", config_path.display());
        config
    };

    eprint!("  Initializing database... ");
    let store = super::open_store(db)?.into_shared();
    let seeded = VersionStore::new(store).seed(&config.modules)?;
    eprintln!("done");
    for v in &seeded {
        println!("    seeded {} v{}", v.module, v.version);
    }

    let key_env = &config.provider.api_key_env;
    if std::env::var_os(key_env).is_none() {
        println!();
        println!("  {key_env} is not set. Export it before running:");
        println!("    export {key_env}=sk-...");
    }

    println!();
    println!("Setup complete!");
    println!();
    println!("Tips:");
    println!("  tuneloop run                 Run the optimization loop");
    println!("  tuneloop run -n 3 -p 4       Fewer iterations and personas");
    println!("  tuneloop history             Past runs");
    println!("  tuneloop versions            Config version history");
    Ok(())
}

pub fn default_config_toml(config: &Config) -> anyhow::Result<String> {
    let body = toml::to_string_pretty(config)?;
    Ok(format!(
        "# tuneloop configuration. Every key is optional; missing keys use defaults.\n\n{body}"
    ))
}
