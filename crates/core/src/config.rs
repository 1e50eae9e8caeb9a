use std::env;
use std::fmt;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REGISTRY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 1;
const DEFAULT_CACHE_DIR_NAME: &str = ".capstan-cache";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone)]
pub struct CapstanConfig {
    pub log_level: String,
    /// Timeout for package-registry version queries.
    pub registry_timeout_secs: u64,
    /// Timeout for a single dependency installation.
    pub install_timeout_secs: u64,
    /// Timeout for a single compiler invocation.
    pub compile_timeout_secs: u64,
    /// How many times a failed compilation task is retried after the
    /// full-project dependency install escalation.
    pub max_retry_attempts: u32,
    /// Name of the dependency cache directory created under the source root.
    pub cache_dir_name: String,
}

impl Default for CapstanConfig {
    fn default() -> Self {
        let log_level = env::var("CAPSTAN_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let registry_timeout_secs = env::var("CAPSTAN_REGISTRY_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REGISTRY_TIMEOUT_SECS);

        let install_timeout_secs = env::var("CAPSTAN_INSTALL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_INSTALL_TIMEOUT_SECS);

        let compile_timeout_secs = env::var("CAPSTAN_COMPILE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS);

        let max_retry_attempts = env::var("CAPSTAN_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS);

        let cache_dir_name =
            env::var("CAPSTAN_CACHE_DIR").unwrap_or_else(|_| DEFAULT_CACHE_DIR_NAME.to_string());

        Self {
            log_level,
            registry_timeout_secs,
            install_timeout_secs,
            compile_timeout_secs,
            max_retry_attempts,
            cache_dir_name,
        }
    }
}

impl CapstanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        if self.registry_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Registry timeout must be at least 1 second".to_string(),
            ));
        }
        if self.install_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Install timeout must be at least 1 second".to_string(),
            ));
        }
        if self.compile_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Compile timeout must be at least 1 second".to_string(),
            ));
        }

        if self.max_retry_attempts > 3 {
            return Err(ConfigError::ValidationFailed(
                "Max retry attempts cannot exceed 3".to_string(),
            ));
        }

        if self.cache_dir_name.is_empty() || self.cache_dir_name.contains(['/', '\\']) {
            return Err(ConfigError::ValidationFailed(format!(
                "Cache directory name must be a single path component: {}",
                self.cache_dir_name
            )));
        }

        Ok(())
    }
}

impl fmt::Display for CapstanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Capstan Configuration:")?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        writeln!(f, "  Registry Timeout: {}s", self.registry_timeout_secs)?;
        writeln!(f, "  Install Timeout: {}s", self.install_timeout_secs)?;
        writeln!(f, "  Compile Timeout: {}s", self.compile_timeout_secs)?;
        writeln!(f, "  Max Retry Attempts: {}", self.max_retry_attempts)?;
        writeln!(f, "  Cache Dir Name: {}", self.cache_dir_name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        for key in [
            "CAPSTAN_LOG_LEVEL",
            "CAPSTAN_REGISTRY_TIMEOUT",
            "CAPSTAN_INSTALL_TIMEOUT",
            "CAPSTAN_COMPILE_TIMEOUT",
            "CAPSTAN_MAX_RETRIES",
            "CAPSTAN_CACHE_DIR",
        ] {
            env::remove_var(key);
        }

        let config = CapstanConfig::default();

        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.registry_timeout_secs, DEFAULT_REGISTRY_TIMEOUT_SECS);
        assert_eq!(config.install_timeout_secs, DEFAULT_INSTALL_TIMEOUT_SECS);
        assert_eq!(config.compile_timeout_secs, DEFAULT_COMPILE_TIMEOUT_SECS);
        assert_eq!(config.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert_eq!(config.cache_dir_name, DEFAULT_CACHE_DIR_NAME);
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = [
            EnvGuard::set("CAPSTAN_LOG_LEVEL", "DEBUG"),
            EnvGuard::set("CAPSTAN_REGISTRY_TIMEOUT", "10"),
            EnvGuard::set("CAPSTAN_MAX_RETRIES", "2"),
            EnvGuard::set("CAPSTAN_CACHE_DIR", ".cds-deps"),
        ];

        let config = CapstanConfig::default();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.registry_timeout_secs, 10);
        assert_eq!(config.max_retry_attempts, 2);
        assert_eq!(config.cache_dir_name, ".cds-deps");
    }

    #[test]
    fn test_validation_valid() {
        let config = CapstanConfig {
            log_level: "info".to_string(),
            registry_timeout_secs: 30,
            install_timeout_secs: 300,
            compile_timeout_secs: 120,
            max_retry_attempts: 1,
            cache_dir_name: ".capstan-cache".to_string(),
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = CapstanConfig {
            log_level: "loud".to_string(),
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let config = CapstanConfig {
            compile_timeout_secs: 0,
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_retries_too_high() {
        let config = CapstanConfig {
            max_retry_attempts: 10,
            ..valid_config()
        };

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("3"));
    }

    #[test]
    fn test_validation_cache_dir_with_separator() {
        let config = CapstanConfig {
            cache_dir_name: "nested/cache".to_string(),
            ..valid_config()
        };

        assert!(config.validate().is_err());
    }

    fn valid_config() -> CapstanConfig {
        CapstanConfig {
            log_level: "info".to_string(),
            registry_timeout_secs: 30,
            install_timeout_secs: 300,
            compile_timeout_secs: 120,
            max_retry_attempts: 1,
            cache_dir_name: ".capstan-cache".to_string(),
        }
    }
}
