//! 通用工具函数模块
//!
//! 提供跨模块共享的工具函数，避免代码重复

use crate::{DnsError, Result};

/// 解析服务器地址和端口
///
/// 支持以下格式：
/// - "8.8.8.8" -> ("8.8.8.8", default_port)
/// - "8.8.8.8:5353" -> ("8.8.8.8", 5353)
/// - "dns.example.com:53" -> ("dns.example.com", 53)
pub fn parse_server_address(server: &str, default_port: u16) -> Result<(String, u16)> {
    if server.is_empty() {
        return Err(DnsError::Config(
            "Server address cannot be empty".to_string(),
        ));
    }
    if let Some(colon_pos) = server.rfind(':') {
        let (addr, port_str) = server.split_at(colon_pos);
        let port = port_str[1..].parse::<u16>().map_err(|_| {
            DnsError::Config(format!("Invalid port in server address: {}", server))
        })?;
        Ok((addr.to_string(), port))
    } else {
        Ok((server.to_string(), default_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_address() {
        assert_eq!(
            parse_server_address("8.8.8.8", 53).unwrap(),
            ("8.8.8.8".to_string(), 53)
        );
        assert_eq!(
            parse_server_address("8.8.8.8:5353", 53).unwrap(),
            ("8.8.8.8".to_string(), 5353)
        );
        assert_eq!(
            parse_server_address("dns.example.com:53", 53).unwrap(),
            ("dns.example.com".to_string(), 53)
        );
    }

    #[test]
    fn test_parse_server_address_rejects_bad_port() {
        assert!(parse_server_address("8.8.8.8:abc", 53).is_err());
        assert!(parse_server_address("", 53).is_err());
    }
}
