//! 解析器配置
//!
//! 配置项与默认值跟随存根解析器的惯例：端口53、单包超时10秒、
//! 4轮重试、轮间隔5秒。`validate()` 在构建解析器前强制校验
//! 所有不变式，DNSSEC开启时EDNS0缓冲区会被强制提升到4096。

pub mod ports;

use crate::tsig::TsigKey;
use crate::types::SecurityLevel;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 无效的超时设置
    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
    /// 无效的重试次数
    #[error("Invalid retry count: {0}")]
    InvalidRetryCount(String),
    /// 无效的端口号
    #[error("Invalid port: {0}")]
    InvalidPort(String),
    /// 无效的源端口配置
    #[error("Invalid source port: {0}")]
    InvalidSourcePort(String),
    /// 未配置上游服务器
    #[error("No nameservers configured - at least one upstream server is required")]
    NoNameservers,
    /// 无效的配置值
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for crate::DnsError {
    fn from(err: ConfigError) -> Self {
        crate::DnsError::Config(err.to_string())
    }
}

/// EDNS0缓冲区的绝对下限
pub const MIN_UDP_SIZE: u16 = 1220;

/// DNSSEC开启时EDNS0缓冲区的下限
pub const MIN_DNSSEC_UDP_SIZE: u16 = 4096;

/// 解析器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// 上游服务器列表（"ip" 或 "ip:port"），顺序即初始排序
    pub nameservers: Vec<String>,
    /// 默认目的端口
    pub port: u16,
    /// 强制新查询走TCP
    pub use_tcp: bool,
    /// TSIG签名密钥，`None` 关闭签名
    pub tsig: Option<TsigKey>,
    /// TC=1时不再转用TCP重试
    pub ignore_truncation: bool,
    /// 出站套接字绑定地址
    pub src_address: IpAddr,
    /// 出站源端口集：恰好一个0（任意），或一组合法高位端口
    pub src_port: Vec<u16>,
    /// 跨查询复用TCP连接
    pub persistent_tcp: bool,
    /// 跨查询复用UDP套接字
    pub persistent_udp: bool,
    /// 新查询设置RD位
    pub recurse: bool,
    /// EDNS0缓冲区大小（原始配置值，生效值见 [`ResolverConfig::udp_size`]）
    pub(crate) raw_udp_size: u16,
    /// 启用DNSSEC感知行为（CD位默认置位、EDNS0缓冲区≥4096）
    pub dnssec: bool,
    /// 单包超时（传输层）
    pub packet_timeout: Duration,
    /// 客户端查询硬超时，零表示不设截止时间
    pub query_timeout: Duration,
    /// 重试轮数
    pub retry_times: usize,
    /// 轮间名义延迟（逐轮翻倍）
    pub retry_delay: Duration,
    /// 编排器tick周期
    pub tick_interval: Duration,
    /// 哪些安全级别作为错误上报（而非附加在返回报文上）
    pub error_levels: Vec<SecurityLevel>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            port: 53,
            use_tcp: false,
            tsig: None,
            ignore_truncation: false,
            src_address: IpAddr::from([0, 0, 0, 0]),
            src_port: vec![ports::ANY_PORT],
            persistent_tcp: false,
            persistent_udp: false,
            recurse: true,
            raw_udp_size: 1232,
            dnssec: false,
            packet_timeout: Duration::from_secs(10),
            query_timeout: Duration::ZERO,
            retry_times: 4,
            retry_delay: Duration::from_secs(5),
            tick_interval: Duration::from_millis(500),
            error_levels: vec![SecurityLevel::Bogus],
        }
    }
}

impl ResolverConfig {
    /// 创建配置构建器
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder::new()
    }

    /// 生效的EDNS0缓冲区大小
    ///
    /// 原始配置值被钳制到绝对下限1220；DNSSEC开启时进一步
    /// 提升到至少4096。任意顺序的setter调用之后该值都满足约束。
    pub fn udp_size(&self) -> u16 {
        let floored = self.raw_udp_size.max(MIN_UDP_SIZE);
        if self.dnssec {
            floored.max(MIN_DNSSEC_UDP_SIZE)
        } else {
            floored
        }
    }

    /// 设置EDNS0缓冲区大小
    pub fn set_udp_size(&mut self, size: u16) {
        self.raw_udp_size = size;
    }

    /// 新查询CD位的默认取值
    ///
    /// DNSSEC开启意味着客户端自行验证，CD默认置位。
    pub fn default_cd(&self) -> bool {
        self.dnssec
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nameservers.is_empty() {
            return Err(ConfigError::NoNameservers);
        }
        for (i, server) in self.nameservers.iter().enumerate() {
            if server.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "Nameserver {} cannot be empty",
                    i
                )));
            }
        }

        self.validate_options()
    }

    /// 校验与上游列表无关的配置项
    ///
    /// 显式注入传输实例时（[`crate::StubResolver::with_transports`]）
    /// 上游列表允许为空，但其余约束照常生效。
    pub fn validate_options(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("Port cannot be zero".to_string()));
        }

        if self.packet_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Packet timeout cannot be zero".to_string(),
            ));
        }

        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Tick interval cannot be zero".to_string(),
            ));
        }

        if self.retry_times == 0 {
            return Err(ConfigError::InvalidRetryCount(
                "Retry count cannot be zero".to_string(),
            ));
        }

        if self.retry_times > 10 {
            return Err(ConfigError::InvalidRetryCount(
                "Retry count cannot exceed 10".to_string(),
            ));
        }

        if self.retry_delay.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "Retry delay cannot be zero".to_string(),
            ));
        }

        ports::validate_src_ports(&self.src_port)?;

        Ok(())
    }
}

/// 配置构建器
pub struct ResolverConfigBuilder {
    config: ResolverConfig,
}

impl ResolverConfigBuilder {
    /// 创建带默认值的构建器
    pub fn new() -> Self {
        Self {
            config: ResolverConfig::default(),
        }
    }

    /// 设置上游服务器（单个）
    pub fn nameserver(mut self, server: impl Into<String>) -> Self {
        self.config.nameservers = vec![server.into()];
        self
    }

    /// 设置上游服务器列表（替换初始排序）
    pub fn nameservers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.nameservers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// 设置默认目的端口
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// 强制走TCP
    pub fn use_tcp(mut self, use_tcp: bool) -> Self {
        self.config.use_tcp = use_tcp;
        self
    }

    /// 设置TSIG密钥
    pub fn tsig(mut self, key: Option<TsigKey>) -> Self {
        self.config.tsig = key;
        self
    }

    /// TC=1时不转用TCP
    pub fn ignore_truncation(mut self, ignore: bool) -> Self {
        self.config.ignore_truncation = ignore;
        self
    }

    /// 设置出站绑定地址
    pub fn src_address(mut self, addr: IpAddr) -> Self {
        self.config.src_address = addr;
        self
    }

    /// 设置单个源端口（0表示任意）
    pub fn src_port(mut self, port: u16) -> Self {
        self.config.src_port = vec![port];
        self
    }

    /// 设置源端口列表
    pub fn src_ports(mut self, ports: Vec<u16>) -> Self {
        self.config.src_port = ports;
        self
    }

    /// 设置源端口区间
    pub fn src_port_range(mut self, start: u16, end: u16) -> Self {
        // 展开推迟到validate，这里保留原始区间端点
        self.config.src_port = (start..=end).collect();
        self
    }

    /// 跨查询复用TCP连接
    pub fn persistent_tcp(mut self, persistent: bool) -> Self {
        self.config.persistent_tcp = persistent;
        self
    }

    /// 跨查询复用UDP套接字
    pub fn persistent_udp(mut self, persistent: bool) -> Self {
        self.config.persistent_udp = persistent;
        self
    }

    /// 新查询是否设置RD位
    pub fn recurse(mut self, recurse: bool) -> Self {
        self.config.recurse = recurse;
        self
    }

    /// 设置EDNS0缓冲区大小
    pub fn udp_size(mut self, size: u16) -> Self {
        self.config.raw_udp_size = size;
        self
    }

    /// 启用DNSSEC感知行为
    pub fn dnssec(mut self, dnssec: bool) -> Self {
        self.config.dnssec = dnssec;
        self
    }

    /// 设置单包超时
    pub fn packet_timeout(mut self, timeout: Duration) -> Self {
        self.config.packet_timeout = timeout;
        self
    }

    /// 设置客户端查询硬超时（零表示不设）
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    /// 设置重试轮数
    pub fn retry_times(mut self, times: usize) -> Self {
        self.config.retry_times = times;
        self
    }

    /// 设置轮间名义延迟
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// 设置编排器tick周期
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// 设置作为错误上报的安全级别集合
    pub fn error_levels(mut self, levels: Vec<SecurityLevel>) -> Self {
        self.config.error_levels = levels;
        self
    }

    /// 构建并校验配置
    pub fn build(self) -> Result<ResolverConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ResolverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
