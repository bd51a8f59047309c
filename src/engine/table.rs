//! 在途查询登记表
//!
//! 以 `client_id` 为键的在途客户端查询登记表，是"哪些子查询还算
//! 有效"的唯一事实来源。登记表只在临界区内被修改；迟到的传输
//! 事件凡是找不到对应客户端的，一律按过期事件静默丢弃。

use crate::engine::event::{ResultSink, SubQuery};
use crate::engine::plan::FireSlot;
use crate::transport::SingleTransport;
use crate::types::Message;
use crate::{DnsError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 客户端查询状态
///
/// 终结（DONE）即从登记表移除，不作为驻留状态存在。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// 仍在调度与等待应答
    Open,
    /// 已拿到应答、停止调度，等待验证器结论
    StoppedWaitingValidation,
}

/// 已解析的调度槽：到点后发往哪个传输、属于第几轮
#[derive(Debug, Clone)]
pub struct ScheduledFire {
    /// 目标传输
    pub transport: Arc<dyn SingleTransport>,
    /// 重试轮次
    pub attempt: usize,
}

impl ScheduledFire {
    /// 把规划槽解析到排序快照中的具体传输
    pub fn resolve(slot: FireSlot, snapshot: &[Arc<dyn SingleTransport>]) -> Self {
        Self {
            transport: snapshot[slot.server].clone(),
            attempt: slot.attempt,
        }
    }
}

/// 单个在途客户端查询
#[derive(Debug)]
pub struct ClientQuery {
    /// 调用方要发送的报文
    pub request: Message,
    /// 结果通道
    pub sink: ResultSink,
    /// 仍在途的子查询
    pub outstanding: HashSet<SubQuery>,
    /// 未触发的调度槽
    pub schedule: BTreeMap<Instant, ScheduledFire>,
    /// 硬截止时刻，`None` 表示不设
    pub hard_deadline: Option<Instant>,
    /// 当前状态
    pub state: QueryState,
}

/// 在途查询登记表
#[derive(Debug, Default)]
pub struct QueryTable {
    clients: HashMap<u64, ClientQuery>,
}

impl QueryTable {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否没有任何在途查询
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// 在途查询数
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// 客户端是否在表内
    pub fn contains(&self, client_id: u64) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// 读取客户端
    pub fn get(&self, client_id: u64) -> Option<&ClientQuery> {
        self.clients.get(&client_id)
    }

    /// 客户端状态
    pub fn state(&self, client_id: u64) -> Option<QueryState> {
        self.clients.get(&client_id).map(|c| c.state)
    }

    /// 登记新查询（原子，重复ID拒绝）
    pub fn insert(
        &mut self,
        client_id: u64,
        request: Message,
        sink: ResultSink,
        schedule: BTreeMap<Instant, ScheduledFire>,
        hard_deadline: Option<Instant>,
    ) -> Result<()> {
        if self.clients.contains_key(&client_id) {
            return Err(DnsError::Argument(format!(
                "Duplicate client id: {}",
                client_id
            )));
        }
        self.clients.insert(
            client_id,
            ClientQuery {
                request,
                sink,
                outstanding: HashSet::new(),
                schedule,
                hard_deadline,
                state: QueryState::Open,
            },
        );
        Ok(())
    }

    /// 已越过硬截止时刻的客户端
    pub fn expired(&self, now: Instant) -> Vec<u64> {
        self.clients
            .iter()
            .filter(|(_, client)| matches!(client.hard_deadline, Some(d) if now >= d))
            .map(|(id, _)| *id)
            .collect()
    }

    /// 取出并移除所有到点的调度槽
    ///
    /// 只有OPEN状态的客户端还会触发新的子查询。
    pub fn pop_due(&mut self, now: Instant) -> Vec<(u64, ScheduledFire)> {
        let mut due = Vec::new();
        let boundary = now + Duration::from_nanos(1);

        for (id, client) in self.clients.iter_mut() {
            if client.state != QueryState::Open || client.schedule.is_empty() {
                continue;
            }
            let later = client.schedule.split_off(&boundary);
            let fired = std::mem::replace(&mut client.schedule, later);
            for (_, fire) in fired {
                due.push((*id, fire));
            }
        }

        due
    }

    /// 登记在途子查询
    pub fn record_outstanding(&mut self, client_id: u64, sub: SubQuery) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.outstanding.insert(sub);
        }
    }

    /// 消费在途子查询；不在集合内时返回 `false`
    pub fn clear_outstanding(&mut self, client_id: u64, sub: &SubQuery) -> bool {
        self.clients
            .get_mut(&client_id)
            .map(|client| client.outstanding.remove(sub))
            .unwrap_or(false)
    }

    /// 从客户端的剩余调度中剔除某台服务器
    pub fn remove_server_schedule(&mut self, client_id: u64, server: &str) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client
                .schedule
                .retain(|_, fire| fire.transport.server() != server);
        }
    }

    /// 客户端是否已无在途子查询也无未触发调度
    pub fn nothing_left(&self, client_id: u64) -> bool {
        self.clients
            .get(&client_id)
            .map(|client| client.outstanding.is_empty() && client.schedule.is_empty())
            .unwrap_or(true)
    }

    /// 停止调度：丢弃调度槽与在途集合，客户端留在表内等待验证
    pub fn cancel(&mut self, client_id: u64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.schedule.clear();
            client.outstanding.clear();
            client.state = QueryState::StoppedWaitingValidation;
        }
    }

    /// 终结移除：查询连同其调度一并消失
    pub fn remove(&mut self, client_id: u64) -> Option<ClientQuery> {
        self.clients.remove(&client_id)
    }

    /// 清空整表（关闭时），返回全部条目
    pub fn drain(&mut self) -> Vec<(u64, ClientQuery)> {
        self.clients.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::event::result_channel;
    use crate::types::{Message, QClass, RecordType};

    fn request() -> Message {
        Message::new_query("example.com", RecordType::A, QClass::IN)
    }

    fn sub(client_id: u64, msg_id: u16) -> SubQuery {
        SubQuery {
            server: "127.0.0.1:53".to_string(),
            msg_id,
            client_id,
            attempt: 0,
        }
    }

    #[test]
    fn test_duplicate_client_id_rejected() {
        let mut table = QueryTable::new();
        let (sink, _stream) = result_channel();
        table
            .insert(7, request(), sink.clone(), BTreeMap::new(), None)
            .unwrap();
        let result = table.insert(7, request(), sink, BTreeMap::new(), None);
        assert!(matches!(result, Err(DnsError::Argument(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_outstanding_lifecycle() {
        let mut table = QueryTable::new();
        let (sink, _stream) = result_channel();
        table
            .insert(1, request(), sink, BTreeMap::new(), None)
            .unwrap();

        let sub = sub(1, 42);
        table.record_outstanding(1, sub.clone());
        assert!(!table.nothing_left(1));
        assert!(table.clear_outstanding(1, &sub));
        // 第二次消费同一个子查询必须失败
        assert!(!table.clear_outstanding(1, &sub));
        assert!(table.nothing_left(1));
    }

    #[test]
    fn test_cancel_keeps_client_for_dedup() {
        let mut table = QueryTable::new();
        let (sink, _stream) = result_channel();
        table
            .insert(1, request(), sink, BTreeMap::new(), None)
            .unwrap();
        table.record_outstanding(1, sub(1, 1));

        table.cancel(1);
        assert!(table.contains(1));
        assert_eq!(table.state(1), Some(QueryState::StoppedWaitingValidation));
        assert!(table.nothing_left(1));
    }

    #[test]
    fn test_expired_respects_deadline() {
        let mut table = QueryTable::new();
        let (sink, _stream) = result_channel();
        let now = Instant::now();
        table
            .insert(1, request(), sink.clone(), BTreeMap::new(), Some(now))
            .unwrap();
        table
            .insert(2, request(), sink, BTreeMap::new(), None)
            .unwrap();

        let expired = table.expired(now + Duration::from_millis(1));
        assert_eq!(expired, vec![1]);
    }
}
