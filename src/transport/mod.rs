//! DNS传输层抽象
//!
//! 每个上游服务器对应一个 [`SingleTransport`] 实例：一个套接字、
//! 单包超时、TC位TCP回退与TSIG签名都在这一层完成。编排器只通过
//! [`send_async`] 合约消费它：非阻塞派发，每个子查询最终恰好
//! 回送一个RECEIVED事件到事件总线。

use crate::config::ResolverConfig;
use crate::engine::event::{EventSender, QueryEvent, SubQuery};
use crate::error::Result;
use crate::tsig::TsigKey;
use crate::types::Message;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub mod tcp;
pub mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// 每传输配置
///
/// 解析器在构建传输时写入一份，配置变更时对每个传输再次下发。
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// 默认目的端口
    pub port: u16,
    /// 强制走TCP
    pub use_tcp: bool,
    /// TSIG签名密钥
    pub tsig: Option<TsigKey>,
    /// TC=1时不转用TCP重试
    pub ignore_truncation: bool,
    /// 单包超时
    pub packet_timeout: Duration,
    /// 出站绑定地址
    pub src_address: IpAddr,
    /// 出站源端口集
    pub src_port: Vec<u16>,
    /// 跨查询复用TCP连接
    pub persistent_tcp: bool,
    /// 跨查询复用UDP套接字
    pub persistent_udp: bool,
    /// 新查询设置RD位
    pub recurse: bool,
    /// EDNS0缓冲区大小（生效值）
    pub udp_size: u16,
    /// DNSSEC感知（发送OPT记录并置DO位）
    pub dnssec: bool,
}

impl TransportOptions {
    /// 从解析器配置导出传输配置
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            port: config.port,
            use_tcp: config.use_tcp,
            tsig: config.tsig.clone(),
            ignore_truncation: config.ignore_truncation,
            packet_timeout: config.packet_timeout,
            src_address: config.src_address,
            src_port: config.src_port.clone(),
            persistent_tcp: config.persistent_tcp,
            persistent_udp: config.persistent_udp,
            recurse: config.recurse,
            udp_size: config.udp_size(),
            dnssec: config.dnssec,
        }
    }
}

/// 单服务器传输抽象
///
/// 编排器把它当作黑盒：一个 `server()` 标签（日志与排序身份）、
/// 一次配置下发入口和一次报文往返。
#[async_trait]
pub trait SingleTransport: std::fmt::Debug + Send + Sync {
    /// 服务器标签
    fn server(&self) -> &str;

    /// 下发传输配置
    fn configure(&self, options: &TransportOptions);

    /// 单次报文往返
    ///
    /// 成功返回响应报文；NXDOMAIN等权威否定以错误形式返回，
    /// 由编排器决定是否终结客户端查询。
    async fn exchange(&self, request: &Message) -> Result<Message>;
}

/// 非阻塞派发一个子查询
///
/// 立即返回；后台任务完成往返后向事件总线投递恰好一个
/// RECEIVED事件。总线关闭（解析器已关闭）时事件被丢弃。
pub fn send_async(
    transport: Arc<dyn SingleTransport>,
    request: Message,
    event_bus: EventSender,
    sub: SubQuery,
) {
    tokio::spawn(async move {
        let event = match transport.exchange(&request).await {
            Ok(message) => QueryEvent::received(sub, Some(message), None),
            Err(error) => QueryEvent::received(sub, None, Some(error)),
        };
        let _ = event_bus.send(event);
    });
}

/// 按响应码把响应归类为成功或错误
pub(crate) fn classify_response(message: Message) -> Result<Message> {
    use crate::error::DnsError;
    use crate::types::ResponseCode;

    match message.rcode() {
        ResponseCode::NxDomain => Err(DnsError::NxDomain),
        ResponseCode::ServerFailure => Err(DnsError::ServerFailure),
        ResponseCode::Refused => Err(DnsError::Refused),
        ResponseCode::FormatError => Err(DnsError::FormatError),
        _ => Ok(message),
    }
}

/// 生成上线报文字节：应用RD位与EDNS0，必要时附加TSIG签名
pub(crate) fn prepare_payload(request: &Message, options: &TransportOptions) -> Result<Vec<u8>> {
    use crate::types::EdnsRecord;
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut outgoing = request.clone();
    outgoing.flags.rd = options.recurse;
    if options.dnssec || options.udp_size > 512 {
        outgoing.edns = Some(EdnsRecord {
            udp_payload_size: options.udp_size,
            extended_rcode: 0,
            version: 0,
            dnssec_ok: options.dnssec,
        });
    }

    let bytes = crate::wire::encode_message(&outgoing)?;
    if let Some(key) = &options.tsig {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let record = crate::tsig::sign(&bytes, key, outgoing.id, now)?;
        outgoing.additionals.push(record);
        return crate::wire::encode_message(&outgoing);
    }
    Ok(bytes)
}

/// 选出与目标地址族一致的绑定地址
///
/// 配置的源地址与目标族不一致时退回该族的任意地址，避免bind直接失败。
pub(crate) fn bind_address(src: IpAddr, target: &std::net::SocketAddr, port: u16) -> std::net::SocketAddr {
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

    let ip = match (src, target) {
        (IpAddr::V4(v4), SocketAddr::V4(_)) => IpAddr::V4(v4),
        (IpAddr::V6(v6), SocketAddr::V6(_)) => IpAddr::V6(v6),
        (_, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (_, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}
