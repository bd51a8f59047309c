//! 事件总线与结果通道
//!
//! 事件总线把各传输的单包事件送进编排器；结果通道把每个客户端
//! 查询的唯一终结元组交还调用方。两者都是无界mpsc：编排器
//! 永远不会因为调用方阻塞而停摆。

use crate::error::DnsError;
use crate::types::Message;
use tokio::sync::mpsc;

/// 子查询标识
///
/// 一次子查询 = 某个客户端查询在某一轮发往某台服务器的一个报文。
/// 结构化比较：既是传输层的关联令牌，也是在途集合的键。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubQuery {
    /// 目标传输的服务器标签
    pub server: String,
    /// 本子查询的事务ID（每次派发新分配）
    pub msg_id: u16,
    /// 所属客户端查询
    pub client_id: u64,
    /// 重试轮次
    pub attempt: usize,
}

/// 事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// 某个传输收到了响应（或以错误收场）
    Received,
    /// 验证器对报文给出了结论
    Validated,
    /// 与具体响应无关的传输层故障
    Error,
}

/// 事件总线上的单包事件
#[derive(Debug)]
pub struct QueryEvent {
    /// 关联的子查询
    pub sub: SubQuery,
    /// 事件种类
    pub kind: EventKind,
    /// 响应报文（若有）
    pub message: Option<Message>,
    /// 错误（若有）
    pub error: Option<DnsError>,
}

impl QueryEvent {
    /// 构造RECEIVED事件
    pub fn received(sub: SubQuery, message: Option<Message>, error: Option<DnsError>) -> Self {
        Self {
            sub,
            kind: EventKind::Received,
            message,
            error,
        }
    }

    /// 构造VALIDATED事件
    pub fn validated(sub: SubQuery, message: Option<Message>, error: Option<DnsError>) -> Self {
        Self {
            sub,
            kind: EventKind::Validated,
            message,
            error,
        }
    }

    /// 构造ERROR事件
    pub fn transport_error(sub: SubQuery, error: DnsError) -> Self {
        Self {
            sub,
            kind: EventKind::Error,
            message: None,
            error: Some(error),
        }
    }
}

/// 事件总线发送端
pub type EventSender = mpsc::UnboundedSender<QueryEvent>;

/// 事件总线接收端（由编排器独占）
pub type EventReceiver = mpsc::UnboundedReceiver<QueryEvent>;

/// 创建事件总线
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// 交还调用方的结果元组：`(client_id, 报文, 错误)`
///
/// 每个客户端查询恰好收到一个。
pub type QueryOutcome = (u64, Option<Message>, Option<DnsError>);

/// 结果通道发送端（挂在每个客户端查询上）
pub type ResultSink = mpsc::UnboundedSender<QueryOutcome>;

/// 结果通道接收端（调用方持有）
pub type ResultStream = mpsc::UnboundedReceiver<QueryOutcome>;

/// 创建结果通道
pub fn result_channel() -> (ResultSink, ResultStream) {
    mpsc::unbounded_channel()
}
