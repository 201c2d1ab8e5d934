/// Configuration management commands
use anyhow::Result;
use signpal_core::config::Settings;
use std::path::Path;

pub fn show_config(data_dir: &Path) -> Result<()> {
    let path = Settings::path_in(data_dir);
    let settings = Settings::load(&path)?;

    println!("Configuration ({})", path.display());
    println!("  match_threshold:         {:.2}", settings.match_threshold);
    println!(
        "  confirmation_delay_ms:   {}",
        settings.confirmation_delay_ms
    );
    println!("  poll_interval_ms:        {}", settings.poll_interval_ms);
    println!(
        "  max_missed_frames:       {}",
        settings
            .max_missed_frames
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    );
    println!(
        "  missed_frame_warn_every: {}",
        settings.missed_frame_warn_every
    );
    println!(
        "  replay_script:           {}",
        settings
            .replay_script
            .map_or_else(|| "None".to_string(), |p| p.display().to_string())
    );
    Ok(())
}

pub fn show_config_path(data_dir: &Path) {
    println!("{}", Settings::path_in(data_dir).display());
}

pub fn init_config(data_dir: &Path, force: bool) -> Result<()> {
    let path = Settings::path_in(data_dir);
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Settings::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
