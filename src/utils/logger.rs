use env_logger::{Builder, Env};
use log::LevelFilter;

/// 设置日志记录器，RUST_LOG环境变量优先
pub fn setup_logger(level: Option<LevelFilter>) -> Result<(), String> {
    let env = Env::default().default_filter_or(level_to_string(level.unwrap_or(LevelFilter::Info)));

    Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| format!("Failed to initialize logger: {}", e))
}

/// 将日志级别转换为字符串
fn level_to_string(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// 从字符串解析日志级别
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter, String> {
    match level_str.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(format!("Invalid log level: {}", level_str)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_log_level("warn").unwrap(), LevelFilter::Warn);
        assert!(parse_log_level("loud").is_err());
        assert_eq!(level_to_string(LevelFilter::Trace), "trace");
    }
}
