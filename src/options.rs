use clap::{Parser, Subcommand};

/// SMH Bridge - Modbus inverter telemetry to MQTT, with Home Assistant discovery
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Register map JSON, replacing the built-in defaults and the config file's map
    #[clap(long = "register-map", env = "MODBUS_MAP_JSON")]
    pub register_map: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Poll the Modbus device and publish meta and state events
    Adapter,
    /// Publish Home Assistant discovery configs for announced devices
    Discovery,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommand_and_map() {
        let options = Options::parse_from([
            "smh-bridge",
            "-c",
            "/etc/smh.yaml",
            "--register-map",
            "{}",
            "discovery",
        ]);

        assert_eq!(options.config_file, "/etc/smh.yaml");
        assert_eq!(options.register_map.as_deref(), Some("{}"));
        assert_eq!(options.command, Command::Discovery);
    }
}
