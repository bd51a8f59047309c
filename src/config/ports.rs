//! 源端口策略
//!
//! 校验与挑选出站套接字的源端口。合法配置只有两种形态：
//! 恰好一个 `0`（任意端口，交给操作系统分配），或者一组
//! 全部位于 `(1024, 65535)` 开区间且不在IANA注册表内的端口。
//! 两种形态混用视为配置错误。

use super::ConfigError;
use rand::seq::SliceRandom;

/// 任意端口（交给操作系统分配）
pub const ANY_PORT: u16 = 0;

/// IANA注册端口表（1024以上）
///
/// 这是进程内唯一的全局表，只读。
static IANA_REGISTERED_PORTS: &[u16] = &[
    1080, // socks
    1194, // openvpn
    1433, // ms-sql-s
    1434, // ms-sql-m
    1521, // oracle
    1723, // pptp
    1812, // radius
    1813, // radius-acct
    2049, // nfs
    2181, // zookeeper
    2375, // docker
    2376, // docker-s
    3128, // squid
    3268, // msft-gc
    3306, // mysql
    3389, // ms-wbt-server
    4369, // epmd
    5060, // sip
    5061, // sips
    5222, // xmpp-client
    5269, // xmpp-server
    5353, // mdns
    5432, // postgresql
    5671, // amqps
    5672, // amqp
    5900, // vnc
    5984, // couchdb
    6379, // redis
    6443, // kubernetes-api
    8080, // http-alt
    8443, // https-alt
    8883, // secure-mqtt
    9092, // kafka
    9200, // elasticsearch
    11211, // memcache
    27017, // mongodb
];

/// 端口是否在IANA注册表内
pub fn is_iana_registered(port: u16) -> bool {
    IANA_REGISTERED_PORTS.binary_search(&port).is_ok()
}

/// 校验源端口配置
pub fn validate_src_ports(ports: &[u16]) -> Result<(), ConfigError> {
    if ports.is_empty() {
        return Err(ConfigError::InvalidSourcePort(
            "Source port list cannot be empty".to_string(),
        ));
    }

    if ports.contains(&ANY_PORT) {
        if ports.len() != 1 {
            return Err(ConfigError::InvalidSourcePort(
                "Port 0 (any) cannot be mixed with explicit ports".to_string(),
            ));
        }
        return Ok(());
    }

    for &port in ports {
        if port <= 1024 || port == u16::MAX {
            return Err(ConfigError::InvalidSourcePort(format!(
                "Source port {} out of range (1024, 65535)",
                port
            )));
        }
        if is_iana_registered(port) {
            return Err(ConfigError::InvalidSourcePort(format!(
                "Source port {} is IANA-registered",
                port
            )));
        }
    }

    Ok(())
}

/// 从配置的端口集中随机挑选一个
///
/// 配置为 `[0]` 时返回 `0`，由操作系统分配临时端口。
/// 调用前必须已通过 [`validate_src_ports`]。
pub fn choose_src_port(ports: &[u16]) -> u16 {
    if ports == [ANY_PORT] {
        return ANY_PORT;
    }
    *ports
        .choose(&mut rand::thread_rng())
        .unwrap_or(&ANY_PORT)
}

/// 把端口区间展开为端口列表
///
/// 区间端点同样要通过校验，非法端点直接报错而不是静默跳过。
pub fn expand_port_range(
    start: u16,
    end: u16,
) -> Result<Vec<u16>, ConfigError> {
    if start > end {
        return Err(ConfigError::InvalidSourcePort(format!(
            "Invalid port range {}..={}",
            start, end
        )));
    }
    let ports: Vec<u16> = (start..=end).collect();
    validate_src_ports(&ports)?;
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iana_table_is_sorted() {
        // binary_search 依赖表有序
        let mut sorted = IANA_REGISTERED_PORTS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted.as_slice(), IANA_REGISTERED_PORTS);
    }

    #[test]
    fn test_single_zero_is_valid() {
        assert!(validate_src_ports(&[0]).is_ok());
    }

    #[test]
    fn test_zero_mixed_with_ports_is_invalid() {
        assert!(validate_src_ports(&[0, 2000]).is_err());
        assert!(validate_src_ports(&[2000, 0]).is_err());
    }

    #[test]
    fn test_reserved_and_out_of_range_ports_rejected() {
        assert!(validate_src_ports(&[3306]).is_err());
        assert!(validate_src_ports(&[53]).is_err());
        assert!(validate_src_ports(&[1024]).is_err());
        assert!(validate_src_ports(&[u16::MAX]).is_err());
        assert!(validate_src_ports(&[]).is_err());
    }

    #[test]
    fn test_plain_high_ports_accepted() {
        assert!(validate_src_ports(&[2000, 40000, 64000]).is_ok());
    }

    #[test]
    fn test_choose_src_port() {
        assert_eq!(choose_src_port(&[0]), 0);
        let port = choose_src_port(&[2000, 2001]);
        assert!(port == 2000 || port == 2001);
    }

    #[test]
    fn test_expand_port_range() {
        assert_eq!(expand_port_range(2000, 2002).unwrap(), vec![2000, 2001, 2002]);
        assert!(expand_port_range(2002, 2000).is_err());
        // 区间覆盖注册端口时整体拒绝
        assert!(expand_port_range(3300, 3310).is_err());
    }
}
