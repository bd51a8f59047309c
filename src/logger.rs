//! DNS 解析器专用日志系统
//!
//! 基于 rat_logger 高性能日志库，提供适合 DNS 查询场景的彩色日志输出
//!
//! # 调用者初始化逻辑
//!
//! 这个模块遵循调用者初始化模式，用户必须先初始化rat_logger日志系统，
//! 然后才能使用DNS日志功能。

use chrono::Local;
use rat_logger::{Level, LevelFilter};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// 确保日志器只初始化一次
static INIT: std::sync::Once = std::sync::Once::new();

/// 日志初始化状态标志（线程安全）
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// DNS 解析器专用日志格式化器
pub fn dns_format(
    buf: &mut dyn std::io::Write,
    record: &rat_logger::config::Record,
) -> std::io::Result<()> {
    let level = record.metadata.level;

    // DNS 主题配色方案
    let (level_color, level_bg, level_icon) = match level {
        Level::Error => ("\x1b[97m", "\x1b[41m", "🚫"), // 白字红底 - DNS 错误
        Level::Warn => ("\x1b[30m", "\x1b[43m", "⚠️ "), // 黑字黄底 - DNS 警告
        Level::Info => ("\x1b[97m", "\x1b[42m", "🌐"),  // 白字绿底 - DNS 查询
        Level::Debug => ("\x1b[30m", "\x1b[46m", "🔍"), // 黑字青底 - DNS 调试
        Level::Trace => ("\x1b[97m", "\x1b[45m", "📡"), // 白字紫底 - DNS 追踪
    };

    let timestamp_color = "\x1b[90m"; // 灰色时间戳
    let message_color = "\x1b[37m"; // 亮白色消息
    let reset = "\x1b[0m";

    let now = Local::now();
    let timestamp = now.format("%H:%M:%S%.3f");

    writeln!(
        buf,
        "{}{} {}{}{:5}{} {} {}{}{}",
        timestamp_color,
        timestamp,
        level_color,
        level_bg,
        level,
        reset,
        level_icon,
        message_color,
        record.args,
        reset
    )
}

/// 初始化 DNS 解析器日志系统（线程安全，防止重复初始化）
///
/// **注意**: 调用者必须先初始化rat_logger日志系统，
/// 此函数只设置DNS日志级别与状态标志。
pub fn init_dns_logger(level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    INIT.call_once(|| {
        INITIALIZED.store(true, Ordering::SeqCst);
    });

    rat_logger::core::set_max_level(level);

    Ok(())
}

/// 安全的日志初始化函数，默认禁用日志输出
///
/// 这个函数专门用于构造器，确保默认情况下不输出日志
pub fn init_dns_logger_silent() -> Result<(), Box<dyn std::error::Error>> {
    init_dns_logger(LevelFilter::Off)
}

/// 检查DNS日志系统是否已初始化
pub fn is_dns_logger_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// DNS 查询相关的便捷日志宏
#[macro_export]
macro_rules! dns_error {
    ($($arg:tt)*) => {
        $crate::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! dns_warn {
    ($($arg:tt)*) => {
        $crate::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! dns_info {
    ($($arg:tt)*) => {
        $crate::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! dns_debug {
    ($($arg:tt)*) => {
        $crate::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! dns_transport {
    ($($arg:tt)*) => {
        $crate::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! dns_timeout {
    ($client_id:expr, $timeout:expr) => {
        $crate::warn!("⏰ 客户端查询 {} 超时: {:?}", $client_id, $timeout);
    };
}

#[macro_export]
macro_rules! dns_race {
    ($server:expr, $attempt:expr, $client_id:expr) => {
        $crate::trace!(
            "📡 第{}轮发往上游 {} (客户端查询 {})",
            $attempt,
            $server,
            $client_id
        );
    };
}
