// src/cli/versions.rs — `tuneloop versions` and `tuneloop rollback`

use crate::memory::{ConfigVersion, VersionStore};

pub fn show_versions(versions: &VersionStore, module: Option<&str>, payload: bool) -> anyhow::Result<()> {
    let modules = match module {
        Some(m) => vec![m.to_string()],
        None => versions.modules()?,
    };
    if modules.is_empty() {
        println!("No config versions yet. Run `tuneloop init` or `tuneloop run` first.");
        return Ok(());
    }
    for m in &modules {
        let history = versions.history(m)?;
        if history.is_empty() {
            anyhow::bail!("unknown module '{m}'");
        }
        println!("{m}");
        for v in &history {
            println!("{}", format_version(v));
            if payload {
                for line in v.payload.lines() {
                    println!("        {line}");
                }
            }
        }
    }
    Ok(())
}

/// Append a copy of `version` so it becomes current. History is never
/// rewritten.
pub fn rollback(versions: &VersionStore, module: &str, version: u32) -> anyhow::Result<()> {
    let restored = versions.rollback(module, version, 0)?;
    println!(
        "{module}: v{version} restored as v{} ({})",
        restored.version,
        &restored.digest[..restored.digest.len().min(12)]
    );
    Ok(())
}

pub fn format_version(v: &ConfigVersion) -> String {
    let score = v
        .convergence_score
        .map(|s| format!("{s:.2}"))
        .unwrap_or_else(|| "-".into());
    let origin = match v.parent_version {
        Some(p) => format!("from v{p}"),
        None => "seed".to_string(),
    };
    format!(
        "  v{:<3} {}  iter {:<3} {:<9} score {:<5} {}",
        v.version,
        v.created_at.format("%Y-%m-%d %H:%M"),
        v.iteration,
        origin,
        score,
        v.changelog
    )
}
