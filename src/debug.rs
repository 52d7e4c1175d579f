//! Debug configuration for lisa.
//!
//! Environment variables:
//! - `LISA_DEBUG=1` - Enable verbose debug logging
//!
//! When LISA_DEBUG is enabled the default log filter drops to `debug` and
//! every text-generation call prints its backend, role and a prompt preview
//! to stderr.

use std::sync::OnceLock;

/// Global debug configuration loaded once at startup.
static DEBUG_CONFIG: OnceLock<DebugConfig> = OnceLock::new();

/// Debug configuration.
#[derive(Debug, Clone)]
pub struct DebugConfig {
    /// Enable verbose debug logging.
    pub debug_mode: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DebugConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var("LISA_DEBUG").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        Self {
            debug_mode: value
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Gets the global debug configuration.
///
/// This is initialized once from environment variables.
pub fn get_config() -> &'static DebugConfig {
    DEBUG_CONFIG.get_or_init(DebugConfig::from_env)
}

/// Returns true if debug mode is enabled.
pub fn is_debug() -> bool {
    get_config().debug_mode
}

/// Returns the default log filter directive.
pub fn default_filter() -> &'static str {
    if is_debug() {
        "debug"
    } else {
        "info"
    }
}

/// Prints debug info about a text-generation call.
pub fn debug_generation(backend: &str, role: &str, prompt: &str) {
    if is_debug() {
        eprintln!("[LISA_DEBUG] Generation:");
        eprintln!("  backend: {}", backend);
        eprintln!("  role: {}", role);
        eprintln!("  prompt (first 200 chars): {}...", preview(prompt, 200));
    }
}

/// Returns at most `max` characters of `text`, respecting char boundaries.
pub(crate) fn preview(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
