use std::sync::Once;

/// Logger configuration.
///
/// `env_filter` follows the `env_logger` filter syntax (e.g. "info",
/// "lucent_engine::peel=trace,wgpu=warn").
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub env_filter: Option<String>,
    pub write_style: env_logger::WriteStyle,

    /// Route output through the test harness capture instead of stderr.
    pub is_test: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            write_style: env_logger::WriteStyle::Auto,
            is_test: false,
        }
    }
}

impl LoggingConfig {
    /// Configuration suited to `#[test]` functions: captured output, `RUST_LOG` honored.
    pub fn for_tests() -> Self {
        Self {
            is_test: true,
            ..Self::default()
        }
    }
}

static INIT: Once = Once::new();

/// Filter used when neither the config nor `RUST_LOG` provides one.
///
/// wgpu is chatty at info level during adapter selection.
const DEFAULT_FILTER: &str = "info,wgpu_core=warn,wgpu_hal=warn,naga=warn";

/// Initializes the global logger once.
///
/// Subsequent calls are ignored, so tests and hosts may both call it.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match config.env_filter {
            Some(filter) => {
                builder.parse_filters(&filter);
            }
            None => match std::env::var("RUST_LOG") {
                Ok(filter) => {
                    builder.parse_filters(&filter);
                }
                Err(_) => {
                    builder.parse_filters(DEFAULT_FILTER);
                }
            },
        }

        builder.write_style(config.write_style);
        builder.is_test(config.is_test);

        // A host may already have installed a logger; that is not an error for us.
        if builder.try_init().is_err() {
            log::debug!("global logger already installed; keeping it");
            return;
        }

        log::debug!("logging initialized");
    });
}
