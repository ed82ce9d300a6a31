//! Config file loading (spec ambient stack): an optional TOML file at a
//! path named by `RT_CONFIG` (default `config.toml`), falling back to
//! defaults when absent. Mirrors the teacher's
//! `sa_gateway::cli::load_config` shape.

use rt_domain::config::Config;

pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("RT_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// Parse and validate, printing any issues. Returns whether validation
/// found no errors (warnings still pass).
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    use rt_domain::config::ConfigSeverity;
    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    let warning_count = issues.len() - error_count;
    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");
    error_count == 0
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => eprintln!("failed to serialize config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.loop_config.max_iterations, config.loop_config.max_iterations);
    }

    #[test]
    fn validate_reports_ok_for_defaults() {
        let config = Config::default();
        assert!(validate(&config, "config.toml"));
    }
}
