//! Application configuration.

/// Configuration for the demo application and renderer setup.
///
/// All fields have sensible defaults; override individual fields as needed:
///
/// ```
/// use framegraph_core::AppConfig;
///
/// let config = AppConfig {
///     width: 1920,
///     height: 1080,
///     ..Default::default()
/// };
/// assert!(config.title.contains("framegraph"));
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
    /// Whether to enable Vulkan validation layers.
    pub enable_validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "framegraph".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_sane() {
        let config = AppConfig::default();
        assert!(config.width > 0);
        assert!(config.height > 0);
        assert!(!config.title.is_empty());
    }
}
