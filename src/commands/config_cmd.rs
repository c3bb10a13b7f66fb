use clap::{Args, Subcommand};

use super::OutputFormat;
use crate::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Keeps the last four characters of a key visible.
fn mask(key: &str) -> String {
    let visible: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", visible)
}

fn print_value<T: std::fmt::Display>(name: &str, value: &ConfigValue<T>) {
    println!("{}: {}", name, value.value);
    println!("  source: {}", value.source);
    println!();
}

fn print_optional(name: &str, value: Option<String>, source: &impl std::fmt::Display) {
    println!("{}: {}", name, value.unwrap_or_else(|| "(not set)".to_string()));
    println!("  source: {}", source);
    println!();
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let mut shown = config.clone();
                shown.api_key.value = shown.api_key.value.as_deref().map(mask);

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&shown)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &shown.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        print_value("server_url", &shown.server_url);
                        print_optional("api_key", shown.api_key.value.clone(), &shown.api_key.source);
                        print_optional("user_id", shown.user_id.value.clone(), &shown.user_id.source);
                        print_value("settle_delay_ms", &shown.settle_delay_ms);
                        print_value("request_timeout_ms", &shown.request_timeout_ms);
                        print_value("feed_debounce_ms", &shown.feed_debounce_ms);
                        print_value("history_days", &shown.history_days);
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_keeps_tail() {
        assert_eq!(mask("secret-key-1234"), "****1234");
        assert_eq!(mask("ab"), "****ab");
    }
}
