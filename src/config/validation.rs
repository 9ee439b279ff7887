//! Configuration validation.
//!
//! Runs at startup to catch fatal problems before any connection is
//! attempted. All errors found are returned, not just the first.

use super::Config;
use crate::error::ConfigError;
use std::collections::HashSet;

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.servers.server.is_empty() {
        errors.push(ConfigError::NoServers);
    }

    let mut names = HashSet::new();
    let mut addresses = HashSet::new();
    for server in &config.servers.server {
        if server.name.is_empty() {
            errors.push(ConfigError::MissingField {
                server: server.host.clone(),
                field: "name",
            });
        } else if !names.insert(server.name.to_lowercase()) {
            errors.push(ConfigError::DuplicateName(server.name.clone()));
        }

        if server.host.is_empty() {
            errors.push(ConfigError::MissingField {
                server: server.name.clone(),
                field: "host",
            });
        }

        if server.port_number().is_none() {
            errors.push(ConfigError::InvalidPort {
                server: server.name.clone(),
                port: server.port.clone(),
            });
        }

        let address = format!("{}:{}", server.host.to_lowercase(), server.port);
        if !server.host.is_empty() && !addresses.insert(address.clone()) {
            errors.push(ConfigError::DuplicateAddress(address));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn server(name: &str, host: &str, port: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            host: host.into(),
            port: port.into(),
            ..ServerConfig::default()
        }
    }

    fn config_with(servers: Vec<ServerConfig>) -> Config {
        let mut config = Config::default();
        config.servers.server = servers;
        config
    }

    #[test]
    fn valid_config_passes() {
        let config = config_with(vec![
            server("alpha", "a.example.net", "10333"),
            server("beta", "b.example.net", "10333"),
        ]);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn empty_server_list_is_fatal() {
        let errors = validate(&Config::default()).expect_err("must fail");
        assert!(matches!(errors[0], ConfigError::NoServers));
    }

    #[test]
    fn duplicate_names_fold_case() {
        let config = config_with(vec![
            server("Alpha", "a.example.net", "10333"),
            server("alpha", "b.example.net", "10333"),
        ]);
        let errors = validate(&config).expect_err("must fail");
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ConfigError::DuplicateName(_)))
        );
    }

    #[test]
    fn duplicate_addresses_rejected() {
        let config = config_with(vec![
            server("alpha", "Example.net", "10333"),
            server("beta", "example.net", "10333"),
        ]);
        let errors = validate(&config).expect_err("must fail");
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ConfigError::DuplicateAddress(_)))
        );
    }

    #[test]
    fn bad_ports_rejected() {
        for port in ["", "0", "70000", "tcp"] {
            let config = config_with(vec![server("alpha", "a.example.net", port)]);
            let errors = validate(&config).expect_err("must fail");
            assert!(
                errors
                    .iter()
                    .any(|e| matches!(e, ConfigError::InvalidPort { .. })),
                "port {port:?} accepted"
            );
        }
    }

    #[test]
    fn missing_fields_rejected() {
        let config = config_with(vec![server("", "", "10333")]);
        let errors = validate(&config).expect_err("must fail");
        assert!(
            errors
                .iter()
                .filter(|e| matches!(e, ConfigError::MissingField { .. }))
                .count()
                >= 2
        );
    }
}
