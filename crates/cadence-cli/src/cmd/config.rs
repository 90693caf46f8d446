use crate::output::{print_fields, print_json, print_table};
use anyhow::Context;
use cadence_core::config::has_errors;
use cadence_core::{
    ActionDefinition, EngineConfig, EngineSettings, Polarity, Region, StatusCondition, WarnLevel,
};
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a starter config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the config for common mistakes
    Validate,

    /// Show settings and the ordered action list
    Show,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(path: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { force } => init(path, force, json),
        ConfigSubcommand::Validate => validate(path, json),
        ConfigSubcommand::Show => show(path, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    starter_config()
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({ "written": path.display().to_string() }))?;
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// A row of four icons along the top of a 256x48 capture strip.
fn starter_config() -> EngineConfig {
    let icon = |slot: u32| Region::new(8 + slot * 40, 8, 32, 32);

    let mut guard = ActionDefinition::new("guard", "4", 20.0)
        .with_priority(1)
        .with_icon(icon(3));
    guard.name = "Guard".into();
    guard.min_hp = Some(0.5);

    let mut opener = ActionDefinition::new("opener", "1", 8.0)
        .with_priority(2)
        .with_icon(icon(0));
    opener.name = "Opener".into();
    opener.requires_target = true;

    let mut cleanse = ActionDefinition::new("cleanse", "3", 12.0)
        .with_priority(3)
        .with_tag("dispel")
        .with_icon(icon(2));
    cleanse.name = "Cleanse".into();
    cleanse.status_conditions.push(StatusCondition {
        name: "shielded".into(),
        region: Region::new(216, 8, 32, 32),
        template: None,
        threshold: 0.8,
        polarity: Polarity::Forbidden,
    });

    let mut filler = ActionDefinition::new("filler", "2", 1.5)
        .with_priority(4)
        .with_icon(icon(1));
    filler.name = "Filler".into();

    EngineConfig::new(
        EngineSettings::new(Region::new(0, 0, 256, 48)),
        vec![opener, guard, cleanse, filler],
    )
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    if json {
        return print_json(&config);
    }

    let s = &config.settings;
    let r = s.capture_region;
    print_fields(&[
        ("capture region", format!("{}x{} at ({}, {})", r.width, r.height, r.x, r.y)),
        (
            "delay",
            format!(
                "{}ms (bounds {}-{}ms, target latency {}ms)",
                s.base_delay_ms, s.min_delay_ms, s.max_delay_ms, s.target_latency_ms
            ),
        ),
        ("loop mode", s.loop_mode.as_str().to_string()),
        (
            "assisted",
            if s.assisted_mode {
                format!("on (cooldowns enforced: {})", s.enforce_cooldown())
            } else {
                "off".to_string()
            },
        ),
        (
            "stall recovery",
            format!("{} after {} failures", s.interrupt_code, s.stall_threshold),
        ),
    ]);
    println!();

    let rows = config
        .actions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            vec![
                (i + 1).to_string(),
                a.id.clone(),
                a.code.clone(),
                format!("{}s", a.cooldown_secs),
                a.priority.to_string(),
                if a.enabled { "yes" } else { "no" }.to_string(),
                if a.usable_icon_region().is_some() { "yes" } else { "-" }.to_string(),
                if a.tags.is_empty() {
                    "-".to_string()
                } else {
                    a.tags.join(",")
                },
            ]
        })
        .collect();
    print_table(
        &["#", "ID", "CODE", "COOLDOWN", "PRIORITY", "ENABLED", "ICON", "TAGS"],
        rows,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_config_is_valid_and_icons_fit() {
        let config = starter_config();
        assert!(config.validate().is_empty());
        let r = config.settings.capture_region;
        for action in &config.actions {
            let icon = action.usable_icon_region().unwrap();
            assert!(icon.fits_within(r.width, r.height), "{}", action.id);
        }
    }
}
