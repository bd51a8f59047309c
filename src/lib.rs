//! RatStubDNS - 多服务器竞速DNS存根解析器
//!
//! 围绕一个协作式查询编排引擎构建：每个客户端查询按交错重传
//! 调度同时发往多台上游服务器，第一个干净的应答胜出；服务器
//! 排序随结果自适应调整（成功前移、超时后移、硬错误沉底）；
//! DNSSEC感知（EDNS0缓冲区、CD位、验证器交接）与TSIG签名内建。
//!
//! ```no_run
//! use rat_stubdns::{ResolverConfig, StubResolver, RecordType, QClass};
//!
//! #[tokio::main]
//! async fn main() -> rat_stubdns::Result<()> {
//!     let config = ResolverConfig::builder()
//!         .nameservers(["8.8.8.8", "1.1.1.1"])
//!         .build()?;
//!     let resolver = StubResolver::new(config)?;
//!     let answer = resolver.query("example.com", RecordType::A, QClass::IN).await?;
//!     println!("{} answers", answer.answers.len());
//!     resolver.close();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod resolver;
pub mod transport;
pub mod tsig;
pub mod types;
pub mod utils;
pub mod validator;
pub mod wire;

pub use config::{ConfigError, ResolverConfig, ResolverConfigBuilder};
pub use engine::event::{
    event_channel, result_channel, EventKind, QueryEvent, QueryOutcome, ResultSink, ResultStream,
    SubQuery,
};
pub use engine::QueryEngine;
pub use error::{DnsError, Result};
pub use logger::{dns_format, init_dns_logger, init_dns_logger_silent};
pub use resolver::StubResolver;
pub use transport::{SingleTransport, TcpTransport, TransportOptions, UdpTransport};
pub use tsig::{TsigAlgorithm, TsigKey};
pub use types::*;
pub use validator::{NullValidator, Validator};

// 重新导出rat_logger基础日志宏到crate根部，供DNS宏使用
pub use rat_logger::{debug, error, info, trace, warn};
