//! Example demonstrating audio configuration loading and validation
//!
//! Run with: cargo run --package sonority-core --example config_demo

use sonority_core::domain::config::{AudioConfig, ConfigManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("sonority_core=debug,info")
        .init();

    println!("=== Sonority Configuration Demo ===\n");

    let dir = tempfile::tempdir()?;
    let manager = ConfigManager::new(dir.path().to_path_buf());

    // 1. First load writes the defaults
    println!("1. Loading configuration from an empty directory...");
    let config = manager.load().await;
    println!("   ✓ Defaults written to {}", manager.config_path().display());
    println!("   Poll interval: {:?}", config.poll_interval());

    // 2. Save a preference
    println!("\n2. Saving a preferred device...");
    let config = AudioConfig {
        preferred_device: "Headphones".to_string(),
        sample_concurrency: 4,
        ..config
    };
    manager.save(&config).await?;
    println!("   ✓ Saved");

    // 3. Load it back
    println!("\n3. Reloading...");
    let reloaded = manager.load().await;
    println!("   ✓ Preferred device: {}", reloaded.preferred_device);
    assert_eq!(reloaded, config);

    // 4. Out-of-range values are clamped
    println!("\n4. Validating out-of-range values...");
    let repaired = AudioConfig {
        track_volume: 2.5,
        sample_concurrency: 0,
        sample_extensions: vec![".wav".to_string()],
        ..AudioConfig::default()
    }
    .validate()?;
    println!(
        "   ✓ track_volume={} sample_concurrency={} extensions={:?}",
        repaired.track_volume, repaired.sample_concurrency, repaired.sample_extensions
    );

    // 5. A corrupt file is backed up and replaced by defaults
    println!("\n5. Loading a corrupt file...");
    tokio::fs::write(manager.config_path(), "preferred_device = [").await?;
    let fallback = manager.load().await;
    println!("   ✓ Fell back to defaults: {:?}", fallback == AudioConfig::default());

    println!("\n=== Demo Complete ===");
    Ok(())
}
