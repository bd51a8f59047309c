//! 错误类型定义

use std::fmt;
use std::io;

/// DNS查询结果类型
pub type Result<T> = std::result::Result<T, DnsError>;

/// DNS错误类型
///
/// 引擎对错误的处理策略各不相同：`Timeout`/`ResourceExhausted`
/// 在内部通过重试与竞速消化，终结性错误直接上报客户端，
/// `Internal` 表示不变式被破坏，正常运行时不应出现。
#[derive(Debug, Clone, PartialEq)]
pub enum DnsError {
    /// IO错误
    Io(String),
    /// 协议错误（报文格式非法）
    Protocol(String),
    /// 单包超时（传输层）
    Timeout,
    /// 客户端查询超时（硬截止时间）
    ClientTimeout,
    /// 域名不存在（权威否定，不再重试）
    NxDomain,
    /// 本地资源耗尽（如文件描述符），保留调度等待恢复
    ResourceExhausted(String),
    /// 传输失败（该服务器将被沉底并移出本查询的调度）
    Transport(String),
    /// DNSSEC验证失败
    Validation(String),
    /// 参数错误（同步上报，不经过传输层）
    Argument(String),
    /// 解析器已关闭
    ResolverClosed,
    /// 内部错误（不变式被破坏）
    Internal(String),
    /// 配置错误
    Config(String),
    /// 查询被拒绝
    Refused,
    /// 服务器失败
    ServerFailure,
    /// 格式错误
    FormatError,
    /// 无可用上游服务器
    NoUpstreamAvailable,
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::Io(msg) => write!(f, "IO error: {}", msg),
            DnsError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            DnsError::Timeout => write!(f, "Packet timeout"),
            DnsError::ClientTimeout => write!(f, "Query timeout"),
            DnsError::NxDomain => write!(f, "Domain not found"),
            DnsError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            DnsError::Transport(msg) => write!(f, "Transport error: {}", msg),
            DnsError::Validation(msg) => write!(f, "Validation error: {}", msg),
            DnsError::Argument(msg) => write!(f, "Argument error: {}", msg),
            DnsError::ResolverClosed => write!(f, "Resolver closed"),
            DnsError::Internal(msg) => write!(f, "Internal error: {}", msg),
            DnsError::Config(msg) => write!(f, "Config error: {}", msg),
            DnsError::Refused => write!(f, "Query refused"),
            DnsError::ServerFailure => write!(f, "Server failure"),
            DnsError::FormatError => write!(f, "Format error"),
            DnsError::NoUpstreamAvailable => write!(f, "No upstream server available"),
        }
    }
}

impl std::error::Error for DnsError {}

impl From<io::Error> for DnsError {
    fn from(err: io::Error) -> Self {
        if is_fd_exhausted(&err) {
            DnsError::ResourceExhausted(err.to_string())
        } else {
            DnsError::Io(err.to_string())
        }
    }
}

/// 判断IO错误是否为文件描述符耗尽
///
/// EMFILE(24)/ENFILE(23)属于瞬时本地资源问题，引擎保留该服务器的
/// 调度继续等待，而不是把它沉底。
pub fn is_fd_exhausted(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(23) | Some(24))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_exhaustion_maps_to_resource_exhausted() {
        let err = io::Error::from_raw_os_error(24);
        assert!(matches!(
            DnsError::from(err),
            DnsError::ResourceExhausted(_)
        ));
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(DnsError::from(err), DnsError::Io(_)));
    }
}
