use std::io::{self, Write};

use eyre::Result;

use crate::cli::ConfigCommands;
use crate::config::Config;

pub async fn handle_config_command(cmd: ConfigCommands, config: &mut Config) -> Result<()> {
    match cmd {
        ConfigCommands::Set { key, value } => handle_set_config(config, &key, &value).await,
        ConfigCommands::Get { key } => {
            println!("{}: {}", key, config.get_value(&key)?);
            Ok(())
        }
        ConfigCommands::Show => {
            println!("{}", config.show_all());
            Ok(())
        }
        ConfigCommands::Reset { force } => handle_reset_config(config, force).await,
    }
}

async fn handle_set_config(config: &mut Config, key: &str, value: &str) -> Result<()> {
    if let Err(e) = config.set_value(key, value) {
        println!("❌ Failed to set configuration: {}", e);
        return Err(e);
    }
    config.save().await?;
    println!("✅ Configuration updated: {} = {}", key, value);
    Ok(())
}

async fn handle_reset_config(config: &mut Config, force: bool) -> Result<()> {
    if !force {
        print!("Are you sure you want to reset all configuration? (y/N): ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().to_lowercase().starts_with('y') {
            println!("❌ Cancelled");
            return Ok(());
        }
    }

    config.reset().await?;
    println!("✅ Configuration reset to defaults");
    Ok(())
}
