//! Config command implementation.

use anyhow::{Context, Result};
use netrate::Config;
use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;

/// Generates configuration files
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat, commented: bool) -> Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("netrate.yaml"));

    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Serializes `config`; only YAML output carries comments.
pub fn render_config(config: &Config, format: ConfigFormat, commented: bool) -> Result<String> {
    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    };
    Ok(content)
}

fn add_config_comments(yaml: String) -> String {
    let comments = r#"# netrate Configuration
# =====================
#
# Sampling
# --------
# interval_ms: 1600            # Sampling period, also the rate divisor
# churn_threshold: 3           # New pids per cycle tolerated before a session restart
# top_n: 4                     # Length of the ranked process list
# command_timeout_ms: 5000     # Upper bound for one command invocation
#
# External Commands
# -----------------
# accounting_program: /usr/bin/nettop
# accounting_args: [-x, -P, -l, "1", -t, wifi, -t, wired, -J, "time,bytes_in,bytes_out"]
# header_prefix: time          # First column name of the accounting header
# header_terminal_token: bytes_out  # Last column name, marks a complete header
# listing_program: /bin/ps     # Invoked as: -o pid,command -p <pids>
# listing_path_column: COMMAND
#
# Replay
# ------
# test_data_file: null         # JSON fixture replayed instead of running commands
#
# Server Configuration
# --------------------
# enable_http: false           # Serve /metrics and /health
# bind: "127.0.0.1"
# port: 9216
# enable_health: true
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_config_loads_back() {
        for (format, suffix) in [
            (ConfigFormat::Yaml, ".yaml"),
            (ConfigFormat::Json, ".json"),
            (ConfigFormat::Toml, ".toml"),
        ] {
            let content = render_config(&Config::default(), format, true).unwrap();
            let file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
            fs::write(file.path(), content).unwrap();
            let loaded = netrate::config::load_config(Some(file.path())).unwrap();
            assert_eq!(loaded, Config::default());
        }
    }
}
