mod config;
mod logger;

pub use config::{Config, ConfigError};
pub use logger::{parse_log_level, setup_logger};

/// 获取应用程序版本
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 获取应用程序名称
pub fn name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// 获取应用程序描述
pub fn description() -> &'static str {
    env!("CARGO_PKG_DESCRIPTION")
}

/// 格式化字节大小为可读字符串
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes = bytes as f64;
    let base = 1024_f64;

    let exponent = (bytes.ln() / base.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes / base.powi(exponent as i32);

    format!("{:.2} {}", value, UNITS[exponent])
}

/// 格式化unix秒时间戳
pub fn format_timestamp(timestamp: i64) -> String {
    match chrono::DateTime::from_timestamp(timestamp, 0) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}
