//! UDP传输实现

use super::{bind_address, classify_response, prepare_payload, SingleTransport, TransportOptions};
use crate::config::ports;
use crate::utils::parse_server_address;
use crate::{dns_debug, dns_warn};
use crate::{DnsError, Message, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// UDP传输实现
///
/// 每次往返默认新建套接字并connect到目标，借内核过滤串源的
/// 应答；`persistent_udp` 开启时跨查询复用。事务ID不匹配的
/// 报文丢弃后继续等待，直到单包超时。
#[derive(Debug)]
pub struct UdpTransport {
    label: String,
    addr: SocketAddr,
    options: Mutex<TransportOptions>,
    socket: tokio::sync::Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpTransport {
    /// 创建UDP传输
    ///
    /// `server` 为 "ip" 或 "ip:port" 形式，缺省端口取配置的目的端口。
    pub fn new(server: &str, options: TransportOptions) -> Result<Self> {
        let (host, port) = parse_server_address(server, options.port)?;
        let ip = host
            .parse()
            .map_err(|_| DnsError::Config(format!("Invalid nameserver address: {}", host)))?;
        let addr = SocketAddr::new(ip, port);
        Ok(Self {
            label: addr.to_string(),
            addr,
            options: Mutex::new(options),
            socket: tokio::sync::Mutex::new(None),
        })
    }

    /// 目标地址
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn obtain_socket(&self, options: &TransportOptions) -> Result<Arc<UdpSocket>> {
        let mut cached = self.socket.lock().await;

        if options.persistent_udp {
            if let Some(socket) = cached.as_ref() {
                return Ok(socket.clone());
            }
        }

        let src_port = ports::choose_src_port(&options.src_port);
        let bind_addr = bind_address(options.src_address, &self.addr, src_port);
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;
        let socket = Arc::new(socket);

        if options.persistent_udp {
            *cached = Some(socket.clone());
        } else {
            *cached = None;
        }

        Ok(socket)
    }
}

#[async_trait]
impl SingleTransport for UdpTransport {
    fn server(&self) -> &str {
        &self.label
    }

    fn configure(&self, options: &TransportOptions) {
        if let Ok(mut current) = self.options.lock() {
            *current = options.clone();
        }
        // 套接字缓存不立即失效，下一次非持久往返自然换新
    }

    async fn exchange(&self, request: &Message) -> Result<Message> {
        let options = self
            .options
            .lock()
            .map(|o| o.clone())
            .map_err(|_| DnsError::Internal("Transport options lock poisoned".to_string()))?;

        let payload = prepare_payload(request, &options)?;
        let socket = self.obtain_socket(&options).await?;
        let deadline = Instant::now() + options.packet_timeout;

        match timeout_at(deadline, socket.send(&payload)).await {
            Err(_) => return Err(DnsError::Timeout),
            Ok(result) => {
                result?;
            }
        }

        let mut buffer = vec![0u8; options.udp_size.max(512) as usize];
        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buffer)).await {
                Err(_) => return Err(DnsError::Timeout),
                Ok(Ok(len)) => len,
                Ok(Err(e)) => return Err(e.into()),
            };

            let response = match crate::wire::decode_message(&buffer[..len]) {
                Ok(response) => response,
                Err(e) => {
                    dns_debug!("丢弃来自 {} 的非法报文: {}", self.label, e);
                    continue;
                }
            };

            if response.id != request.id {
                dns_debug!(
                    "丢弃事务ID不匹配的应答: 期望 {} 实际 {} ({})",
                    request.id,
                    response.id,
                    self.label
                );
                continue;
            }

            if response.flags.tc && !options.ignore_truncation {
                dns_warn!("来自 {} 的应答被截断，转用TCP重试", self.label);
                let response =
                    super::tcp::exchange_once(self.addr, &payload, &options).await?;
                if response.id != request.id {
                    return Err(DnsError::Protocol(
                        "TCP retry returned mismatched transaction id".to_string(),
                    ));
                }
                return classify_response(response);
            }

            return classify_response(response);
        }
    }
}
