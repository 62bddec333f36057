//! TOML configuration loading with `{{VAR}}` / `${VAR}` environment
//! interpolation and a base+environment overlay merge.

use regex::Regex;
use shared_types::{AdapterEndpointConfig, AdaptersConfig, AppConfig};
use std::env;
use std::fs;

/// Load a single TOML config file and perform environment interpolation for
/// occurrences of `{{VAR}}` or `${VAR}`.
pub fn load_single_config(path: &str) -> Result<AppConfig, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    let re = Regex::new(r"(\{\{|\$\{)([a-zA-Z0-9_]+)(\}\}|\})")
        .map_err(|e| format!("Failed to create regex: {}", e))?;

    let processed_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps[2];
        env::var(var_name).unwrap_or_else(|_| format!("{{{{{{{}}}}}}}", var_name))
    });

    toml::from_str(&processed_content).map_err(|e| format!("Failed to parse config file: {}", e))
}

fn merge_endpoint(
    base: Option<AdapterEndpointConfig>,
    overlay: Option<AdapterEndpointConfig>,
) -> Option<AdapterEndpointConfig> {
    match (base, overlay) {
        (Some(b), Some(o)) => Some(AdapterEndpointConfig {
            endpoint: o.endpoint.or(b.endpoint),
            credential_handle: o.credential_handle.or(b.credential_handle),
            extra: if o.extra.is_empty() { b.extra } else { o.extra },
        }),
        (None, Some(o)) => Some(o),
        (Some(b), None) => Some(b),
        (None, None) => None,
    }
}

fn merge_adapters(base: AdaptersConfig, overlay: AdaptersConfig) -> AdaptersConfig {
    AdaptersConfig {
        kubernetes: merge_endpoint(base.kubernetes, overlay.kubernetes),
        source_hosting: merge_endpoint(base.source_hosting, overlay.source_hosting),
        observability: merge_endpoint(base.observability, overlay.observability),
        documentation: merge_endpoint(base.documentation, overlay.documentation),
        pager: merge_endpoint(base.pager, overlay.pager),
    }
}

/// Merge two `AppConfig` instances, treating `overlay` as an
/// environment-specific override on top of `base`. Non-default overlay
/// scalars win; `None` overlay options fall back to base.
pub fn merge_app_config(base: AppConfig, overlay: AppConfig) -> AppConfig {
    AppConfig {
        operating_mode: overlay.operating_mode,
        destructive_enabled: overlay.destructive_enabled || base.destructive_enabled,
        approval_timeout_secs: if overlay.approval_timeout_secs != 0 {
            overlay.approval_timeout_secs
        } else {
            base.approval_timeout_secs
        },
        circuit_breaker: shared_types::CircuitBreakerConfig {
            failure_threshold: if overlay.circuit_breaker.failure_threshold != 0 {
                overlay.circuit_breaker.failure_threshold
            } else {
                base.circuit_breaker.failure_threshold
            },
            success_threshold: if overlay.circuit_breaker.success_threshold != 0 {
                overlay.circuit_breaker.success_threshold
            } else {
                base.circuit_breaker.success_threshold
            },
            cooldown_secs: if overlay.circuit_breaker.cooldown_secs != 0 {
                overlay.circuit_breaker.cooldown_secs
            } else {
                base.circuit_breaker.cooldown_secs
            },
        },
        context_gather_deadline_secs: if overlay.context_gather_deadline_secs != 0 {
            overlay.context_gather_deadline_secs
        } else {
            base.context_gather_deadline_secs
        },
        llm: shared_types::LlmConfig {
            provider: if overlay.llm.provider.is_empty() {
                base.llm.provider
            } else {
                overlay.llm.provider
            },
            model: if overlay.llm.model.is_empty() {
                base.llm.model
            } else {
                overlay.llm.model
            },
            api_key: overlay.llm.api_key.or(base.llm.api_key),
            base_url: overlay.llm.base_url.or(base.llm.base_url),
            max_tokens: if overlay.llm.max_tokens != 0 {
                overlay.llm.max_tokens
            } else {
                base.llm.max_tokens
            },
            timeout_secs: if overlay.llm.timeout_secs != 0 {
                overlay.llm.timeout_secs
            } else {
                base.llm.timeout_secs
            },
        },
        adapters: merge_adapters(base.adapters, overlay.adapters),
    }
}

/// Load configuration using an environment profile, overlaying
/// `config/<env>.toml` on top of the base `config/base.toml`. Missing
/// overlay files are treated as "no overlay".
pub fn load_app_config_with_env(base_path: &str, env_name: &str) -> Result<AppConfig, String> {
    let base = load_single_config(base_path)?;

    let overlay_path = format!(
        "{}/{}.toml",
        std::path::Path::new(base_path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string()),
        env_name.to_lowercase()
    );

    let overlay = match load_single_config(&overlay_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if e.contains("Failed to read config file") {
                return Ok(base);
            }
            return Err(e);
        }
    };

    Ok(merge_app_config(base, overlay))
}

/// Load configuration from the environment, falling back to process
/// defaults for anything not present. This is the path the binary
/// composition root is expected to use: read `.env` if present, then pull
/// typed fields out of `std::env`.
pub fn load_app_config_from_env() -> AppConfig {
    let _ = dotenvy::dotenv();

    let mut config = AppConfig::default();

    if let Ok(mode) = env::var("OPERATING_MODE") {
        if let Ok(parsed) = mode.parse() {
            config.operating_mode = parsed;
        }
    }
    if let Ok(v) = env::var("DESTRUCTIVE_ENABLED") {
        config.destructive_enabled = v.eq_ignore_ascii_case("true") || v == "1";
    }
    if let Ok(v) = env::var("APPROVAL_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse() {
            config.approval_timeout_secs = parsed;
        }
    }
    if let Ok(v) = env::var("CIRCUIT_FAILURE_THRESHOLD") {
        if let Ok(parsed) = v.parse() {
            config.circuit_breaker.failure_threshold = parsed;
        }
    }
    if let Ok(v) = env::var("CIRCUIT_SUCCESS_THRESHOLD") {
        if let Ok(parsed) = v.parse() {
            config.circuit_breaker.success_threshold = parsed;
        }
    }
    if let Ok(v) = env::var("CIRCUIT_COOLDOWN_SECONDS") {
        if let Ok(parsed) = v.parse() {
            config.circuit_breaker.cooldown_secs = parsed;
        }
    }
    if let Ok(v) = env::var("CONTEXT_GATHER_DEADLINE_SECONDS") {
        if let Ok(parsed) = v.parse() {
            config.context_gather_deadline_secs = parsed;
        }
    }
    if let Ok(v) = env::var("LLM_MODEL") {
        config.llm.model = v;
    }
    if let Ok(v) = env::var("LLM_MAX_TOKENS") {
        if let Ok(parsed) = v.parse() {
            config.llm.max_tokens = parsed;
        }
    }
    if let Ok(v) = env::var("LLM_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse() {
            config.llm.timeout_secs = parsed;
        }
    }
    if let Ok(v) = env::var("LLM_API_KEY") {
        config.llm.api_key = Some(v);
    }
    if let Ok(v) = env::var("LLM_BASE_URL") {
        config.llm.base_url = Some(v);
    }

    config.adapters.kubernetes = adapter_from_env("KUBERNETES");
    config.adapters.source_hosting = adapter_from_env("SOURCE_HOSTING");
    config.adapters.observability = adapter_from_env("OBSERVABILITY");
    config.adapters.documentation = adapter_from_env("DOCUMENTATION");
    config.adapters.pager = adapter_from_env("PAGER");

    config
}

fn adapter_from_env(prefix: &str) -> Option<AdapterEndpointConfig> {
    let endpoint = env::var(format!("{prefix}_ENDPOINT")).ok();
    let credential_handle = env::var(format!("{prefix}_CREDENTIAL_HANDLE")).ok();
    if endpoint.is_none() && credential_handle.is_none() {
        return None;
    }
    Some(AdapterEndpointConfig {
        endpoint,
        credential_handle,
        extra: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_single_config_substitutes_env_vars_brace_syntax() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
operating_mode = "AUTO"
destructive_enabled = false
approval_timeout_secs = 300
context_gather_deadline_secs = 30

[circuit_breaker]
failure_threshold = 5
success_threshold = 2
cooldown_secs = 300

[llm]
provider = "openrouter"
model = "test-model"
api_key = "{{{{TEST_API_KEY}}}}"
max_tokens = 1024
timeout_secs = 30
"#
        )
        .expect("write config");

        env::set_var("TEST_API_KEY", "test-key-123");

        let path_str = file.path().to_str().unwrap().to_string();
        let cfg = load_single_config(&path_str).expect("config should load");

        assert_eq!(cfg.llm.api_key.as_deref(), Some("test-key-123"));
        assert_eq!(cfg.llm.model, "test-model");
    }

    #[test]
    fn merge_app_config_overlay_wins_for_non_default_scalars() {
        let mut base = AppConfig::default();
        base.llm.model = "base-model".to_string();
        base.circuit_breaker.failure_threshold = 5;

        let mut overlay = AppConfig::default();
        overlay.llm.model = String::new();
        overlay.circuit_breaker.failure_threshold = 8;

        let merged = merge_app_config(base, overlay);

        assert_eq!(merged.llm.model, "base-model");
        assert_eq!(merged.circuit_breaker.failure_threshold, 8);
    }
}
