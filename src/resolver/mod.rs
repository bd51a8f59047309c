//! 存根解析器公共接口
//!
//! [`StubResolver`] 是调用方看到的全部：同步语义的 `query` /
//! `send_message`（在各自的结果通道上等待唯一的终结元组），
//! 立即返回的 `send_async`，一组运行期setter，以及把所有在途
//! 查询一次性终结的 `close`。真正的多服务器竞速逻辑都在
//! [`crate::engine`] 里。

use crate::config::{ports, ResolverConfig};
use crate::engine::event::{result_channel, ResultSink};
use crate::engine::QueryEngine;
use crate::transport::{SingleTransport, TcpTransport, TransportOptions, UdpTransport};
use crate::tsig::TsigKey;
use crate::types::{Message, QClass, RecordType};
use crate::validator::{NullValidator, Validator};
use crate::{DnsError, Result};
use std::sync::Arc;
use std::time::Duration;

/// DNS存根解析器
///
/// 克隆代价低廉：所有状态都挂在共享的引擎后面。
#[derive(Debug, Clone)]
pub struct StubResolver {
    engine: Arc<QueryEngine>,
}

impl StubResolver {
    /// 用给定配置创建解析器（默认直通验证器）
    pub fn new(config: ResolverConfig) -> Result<Self> {
        Self::with_validator(config, Arc::new(NullValidator))
    }

    /// 用给定配置与验证器创建解析器
    pub fn with_validator(config: ResolverConfig, validator: Arc<dyn Validator>) -> Result<Self> {
        config.validate()?;
        let transports = build_transports(&config)?;
        let engine = QueryEngine::start(config, transports, validator);
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// 用显式传输列表创建解析器
    ///
    /// 给自定义 [`SingleTransport`] 实现留的入口；此时配置中的
    /// `nameservers` 不参与传输构建。
    pub fn with_transports(
        config: ResolverConfig,
        transports: Vec<Arc<dyn SingleTransport>>,
        validator: Arc<dyn Validator>,
    ) -> Result<Self> {
        config.validate_options()?;
        if transports.is_empty() {
            return Err(DnsError::NoUpstreamAvailable);
        }
        let engine = QueryEngine::start(config, transports, validator);
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// 查询一条DNS记录
    ///
    /// 构造RD按配置置位的查询报文；DNSSEC开启时CD位取默认值
    /// （客户端自行验证）。等待本次查询的唯一终结元组。
    pub async fn query(
        &self,
        name: &str,
        record_type: RecordType,
        class: QClass,
    ) -> Result<Message> {
        self.query_with_cd(name, record_type, class, None).await
    }

    /// 查询一条DNS记录并显式控制CD位
    ///
    /// `set_cd` 只在DNSSEC开启时生效，缺省取DNSSEC标志本身。
    pub async fn query_with_cd(
        &self,
        name: &str,
        record_type: RecordType,
        class: QClass,
        set_cd: Option<bool>,
    ) -> Result<Message> {
        let config = self.engine.config();
        let mut message = Message::new_query(name, record_type, class);
        message.flags.rd = config.recurse;
        if config.dnssec {
            message.flags.cd = set_cd.unwrap_or_else(|| config.default_cd());
        }
        self.send_message(message).await
    }

    /// 发送一个现成的查询报文并等待结果
    pub async fn send_message(&self, message: Message) -> Result<Message> {
        let (sink, mut stream) = result_channel();
        self.send_async(message, sink, None);

        match stream.recv().await {
            Some((_, _, Some(error))) => Err(error),
            Some((_, Some(message), None)) => Ok(message),
            Some((_, None, None)) => Err(DnsError::Internal(
                "Result tuple carries neither message nor error".to_string(),
            )),
            None => Err(DnsError::ResolverClosed),
        }
    }

    /// 异步发送：立即返回 `client_id`，结果稍后出现在 `sink` 上
    ///
    /// `client_id` 缺省自动生成。参数不合法时唯一的错误元组
    /// 直接推入 `sink`，不消耗任何传输资源。
    pub fn send_async(&self, message: Message, sink: ResultSink, client_id: Option<u64>) -> u64 {
        self.engine.submit(message, sink, client_id)
    }

    /// 关闭解析器：每个在途查询在其结果通道上收到一个
    /// `ResolverClosed` 错误，之后不再有任何元组
    pub fn close(&self) {
        self.engine.close();
    }

    /// 解析器是否已关闭
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    /// 当前配置快照
    pub fn config(&self) -> ResolverConfig {
        self.engine.config()
    }

    /// 生效的EDNS0缓冲区大小
    pub fn udp_size(&self) -> u16 {
        self.engine.config().udp_size()
    }

    /// DNSSEC是否开启
    pub fn dnssec(&self) -> bool {
        self.engine.config().dnssec
    }

    /// 当前排序下的服务器标签（排名靠前的先被尝试）
    pub fn server_order(&self) -> Vec<String> {
        self.engine.server_order()
    }

    /// 在途查询数
    pub fn pending_queries(&self) -> usize {
        self.engine.pending_queries()
    }

    /// 开关DNSSEC感知行为
    ///
    /// 开启后新查询默认置CD位，EDNS0缓冲区被强制提升到至少4096。
    pub fn set_dnssec(&self, enabled: bool) {
        let mut config = self.engine.config();
        config.dnssec = enabled;
        self.engine.reconfigure(config);
    }

    /// 设置EDNS0缓冲区大小（受绝对下限1220与DNSSEC下限4096钳制）
    pub fn set_udp_size(&self, size: u16) {
        let mut config = self.engine.config();
        config.set_udp_size(size);
        self.engine.reconfigure(config);
    }

    /// 替换上游服务器列表（重置排序）
    pub fn set_nameservers<I, S>(&self, servers: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = self.engine.config();
        config.nameservers = servers.into_iter().map(Into::into).collect();
        config.validate()?;
        let transports = build_transports(&config)?;
        self.engine.reconfigure(config);
        self.engine.set_transports(transports);
        Ok(())
    }

    /// 强制新查询走TCP（重建传输）
    pub fn set_use_tcp(&self, use_tcp: bool) -> Result<()> {
        let mut config = self.engine.config();
        config.use_tcp = use_tcp;
        let transports = build_transports(&config)?;
        self.engine.reconfigure(config);
        self.engine.set_transports(transports);
        Ok(())
    }

    /// 设置TSIG密钥，`None` 关闭签名
    pub fn set_tsig(&self, key: Option<TsigKey>) {
        let mut config = self.engine.config();
        config.tsig = key;
        self.engine.reconfigure(config);
    }

    /// 设置出站源端口集
    pub fn set_src_ports(&self, src_ports: Vec<u16>) -> Result<()> {
        ports::validate_src_ports(&src_ports)?;
        let mut config = self.engine.config();
        config.src_port = src_ports;
        self.engine.reconfigure(config);
        Ok(())
    }

    /// TC=1时是否放弃TCP重试
    pub fn set_ignore_truncation(&self, ignore: bool) {
        let mut config = self.engine.config();
        config.ignore_truncation = ignore;
        self.engine.reconfigure(config);
    }

    /// 新查询是否设置RD位
    pub fn set_recurse(&self, recurse: bool) {
        let mut config = self.engine.config();
        config.recurse = recurse;
        self.engine.reconfigure(config);
    }

    /// 设置单包超时
    pub fn set_packet_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(DnsError::Config(
                "Packet timeout cannot be zero".to_string(),
            ));
        }
        let mut config = self.engine.config();
        config.packet_timeout = timeout;
        self.engine.reconfigure(config);
        Ok(())
    }

    /// 设置客户端查询硬超时（零表示不设截止时间）
    pub fn set_query_timeout(&self, timeout: Duration) {
        let mut config = self.engine.config();
        config.query_timeout = timeout;
        self.engine.reconfigure(config);
    }
}

/// 按配置为每个nameserver构建传输
fn build_transports(config: &ResolverConfig) -> Result<Vec<Arc<dyn SingleTransport>>> {
    let options = TransportOptions::from_config(config);
    let mut transports: Vec<Arc<dyn SingleTransport>> = Vec::with_capacity(config.nameservers.len());

    for server in &config.nameservers {
        if config.use_tcp {
            transports.push(Arc::new(TcpTransport::new(server, options.clone())?));
        } else {
            transports.push(Arc::new(UdpTransport::new(server, options.clone())?));
        }
    }

    Ok(transports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setters_uphold_dnssec_floor() {
        let config = ResolverConfig::builder()
            .nameserver("127.0.0.1:53")
            .build()
            .unwrap();
        let resolver = StubResolver::new(config).unwrap();

        // 任意顺序的setter之后，DNSSEC开启都蕴含缓冲区≥4096
        resolver.set_udp_size(512);
        resolver.set_dnssec(true);
        assert!(resolver.udp_size() >= 4096);

        resolver.set_udp_size(600);
        assert!(resolver.udp_size() >= 4096);

        resolver.set_dnssec(false);
        assert_eq!(resolver.udp_size(), 1220);

        resolver.close();
    }

    #[tokio::test]
    async fn test_src_port_setter_validates() {
        let config = ResolverConfig::builder()
            .nameserver("127.0.0.1:53")
            .build()
            .unwrap();
        let resolver = StubResolver::new(config).unwrap();

        assert!(resolver.set_src_ports(vec![0]).is_ok());
        assert!(resolver.set_src_ports(vec![0, 2000]).is_err());
        assert!(resolver.set_src_ports(vec![3306]).is_err());
        assert!(resolver.set_src_ports(vec![2000, 40000]).is_ok());

        resolver.close();
    }

    #[tokio::test]
    async fn test_bad_nameserver_rejected() {
        let config = ResolverConfig::builder()
            .nameserver("not an address")
            .build()
            .unwrap();
        assert!(StubResolver::new(config).is_err());
    }
}
