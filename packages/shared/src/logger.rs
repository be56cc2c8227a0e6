//! Logging setup utilities for the Tsudoi binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Both the hub library crate and the binary log at `default_log_level`
/// unless `RUST_LOG` overrides the filter.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "tsudoi_server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use tsudoi_shared::logger::setup_logger;
///
/// setup_logger("tsudoi_server", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "tsudoi_server={level},tsudoi_shared={level},{bin}={level},tower_http={level}",
                    level = default_log_level,
                    bin = binary_name.replace('-', "_"),
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_default_filter_directive_is_parseable() {
        // テスト項目: デフォルトのフィルタ文字列が EnvFilter として解釈できる
        // given (前提条件):
        let directive = format!(
            "tsudoi_server={level},tsudoi_shared={level},{bin}={level},tower_http={level}",
            level = "debug",
            bin = "tsudoi-server".replace('-', "_"),
        );

        // when (操作):
        let result = tracing_subscriber::EnvFilter::try_new(&directive);

        // then (期待する結果):
        assert!(result.is_ok());
    }
}
