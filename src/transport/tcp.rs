//! TCP传输实现
//!
//! 两字节长度前缀的报文流。`persistent_tcp` 开启时跨查询复用连接，
//! 复用失败自动重建一次。也为UDP传输提供TC位回退的单次往返入口。

use super::{bind_address, classify_response, prepare_payload, SingleTransport, TransportOptions};
use crate::config::ports;
use crate::utils::parse_server_address;
use crate::{DnsError, Message, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::{timeout_at, Instant};

/// TCP传输实现
#[derive(Debug)]
pub struct TcpTransport {
    label: String,
    addr: SocketAddr,
    options: Mutex<TransportOptions>,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    /// 创建TCP传输
    pub fn new(server: &str, options: TransportOptions) -> Result<Self> {
        let (host, port) = parse_server_address(server, options.port)?;
        let ip = host
            .parse()
            .map_err(|_| DnsError::Config(format!("Invalid nameserver address: {}", host)))?;
        let addr = SocketAddr::new(ip, port);
        Ok(Self {
            label: format!("{}/tcp", addr),
            addr,
            options: Mutex::new(options),
            stream: tokio::sync::Mutex::new(None),
        })
    }

    /// 目标地址
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl SingleTransport for TcpTransport {
    fn server(&self) -> &str {
        &self.label
    }

    fn configure(&self, options: &TransportOptions) {
        if let Ok(mut current) = self.options.lock() {
            *current = options.clone();
        }
    }

    async fn exchange(&self, request: &Message) -> Result<Message> {
        let options = self
            .options
            .lock()
            .map(|o| o.clone())
            .map_err(|_| DnsError::Internal("Transport options lock poisoned".to_string()))?;

        let payload = prepare_payload(request, &options)?;
        let deadline = Instant::now() + options.packet_timeout;
        let mut guard = self.stream.lock().await;

        if options.persistent_tcp {
            if let Some(stream) = guard.as_mut() {
                match roundtrip(stream, &payload, deadline).await {
                    Ok(response) => return finish(response, request),
                    Err(DnsError::Timeout) => return Err(DnsError::Timeout),
                    Err(_) => {
                        // 复用的连接已失效，重建
                        *guard = None;
                    }
                }
            }
        }

        let mut stream = connect(self.addr, &options, deadline).await?;
        let response = roundtrip(&mut stream, &payload, deadline).await?;
        if options.persistent_tcp {
            *guard = Some(stream);
        }
        finish(response, request)
    }
}

fn finish(response: Message, request: &Message) -> Result<Message> {
    if response.id != request.id {
        return Err(DnsError::Protocol(
            "TCP response transaction id mismatch".to_string(),
        ));
    }
    classify_response(response)
}

/// 建立到目标的TCP连接（按配置绑定源地址/端口）
async fn connect(
    addr: SocketAddr,
    options: &TransportOptions,
    deadline: Instant,
) -> Result<TcpStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };

    let src_port = ports::choose_src_port(&options.src_port);
    socket.bind(bind_address(options.src_address, &addr, src_port))?;

    let stream = match timeout_at(deadline, socket.connect(addr)).await {
        Err(_) => return Err(DnsError::Timeout),
        Ok(stream) => stream?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// 在给定连接上完成一次长度前缀报文往返
async fn roundtrip(
    stream: &mut TcpStream,
    payload: &[u8],
    deadline: Instant,
) -> Result<Message> {
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);

    match timeout_at(deadline, stream.write_all(&framed)).await {
        Err(_) => return Err(DnsError::Timeout),
        Ok(result) => result?,
    }

    let mut len_buf = [0u8; 2];
    match timeout_at(deadline, stream.read_exact(&mut len_buf)).await {
        Err(_) => return Err(DnsError::Timeout),
        Ok(result) => {
            result?;
        }
    }

    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buffer = vec![0u8; len];
    match timeout_at(deadline, stream.read_exact(&mut buffer)).await {
        Err(_) => return Err(DnsError::Timeout),
        Ok(result) => {
            result?;
        }
    }

    crate::wire::decode_message(&buffer)
}

/// 单次TCP往返（UDP传输的TC位回退入口，不走连接复用）
pub(crate) async fn exchange_once(
    addr: SocketAddr,
    payload: &[u8],
    options: &TransportOptions,
) -> Result<Message> {
    let deadline = Instant::now() + options.packet_timeout;
    let mut stream = connect(addr, options, deadline).await?;
    roundtrip(&mut stream, payload, deadline).await
}
