//! 上游服务器排序
//!
//! 有序的传输列表，按查询结果自适应调整：干净的成功把服务器
//! 前移一位，超时后移一位，硬错误直接沉底。排序跨客户端查询
//! 持续生效，是引擎对上游质量的长期记忆。

use crate::transport::SingleTransport;
use crate::{dns_debug, dns_info};
use std::sync::Arc;

/// 服务器排序表
#[derive(Debug)]
pub struct ServerRanking {
    transports: Vec<Arc<dyn SingleTransport>>,
}

impl ServerRanking {
    /// 按初始顺序创建排序表
    pub fn new(transports: Vec<Arc<dyn SingleTransport>>) -> Self {
        Self { transports }
    }

    /// 当前排序的快照（规划调度时使用）
    pub fn snapshot(&self) -> Vec<Arc<dyn SingleTransport>> {
        self.transports.clone()
    }

    /// 服务器数量
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// 当前排序下的服务器标签
    pub fn labels(&self) -> Vec<String> {
        self.transports
            .iter()
            .map(|t| t.server().to_string())
            .collect()
    }

    /// 整体替换（nameserver配置变更时）
    pub fn replace(&mut self, transports: Vec<Arc<dyn SingleTransport>>) {
        dns_info!("上游服务器列表替换，新数量: {}", transports.len());
        self.transports = transports;
    }

    /// 遍历全部传输（配置下发时使用）
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SingleTransport>> {
        self.transports.iter()
    }

    fn position(&self, server: &str) -> Option<usize> {
        self.transports.iter().position(|t| t.server() == server)
    }

    /// 成功：前移一位
    pub fn promote(&mut self, server: &str) {
        if let Some(pos) = self.position(server) {
            if pos > 0 {
                self.transports.swap(pos, pos - 1);
                dns_debug!("上游 {} 前移至第{}位", server, pos - 1);
            }
        }
    }

    /// 超时：后移一位
    pub fn demote(&mut self, server: &str) {
        if let Some(pos) = self.position(server) {
            if pos + 1 < self.transports.len() {
                self.transports.swap(pos, pos + 1);
                dns_debug!("上游 {} 后移至第{}位", server, pos + 1);
            }
        }
    }

    /// 硬错误：沉底
    pub fn sink_to_bottom(&mut self, server: &str) {
        if let Some(pos) = self.position(server) {
            if pos + 1 < self.transports.len() {
                let transport = self.transports.remove(pos);
                self.transports.push(transport);
                dns_debug!("上游 {} 沉底", server);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportOptions;
    use crate::types::Message;
    use crate::{DnsError, Result};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct LabelTransport(String);

    #[async_trait]
    impl SingleTransport for LabelTransport {
        fn server(&self) -> &str {
            &self.0
        }

        fn configure(&self, _options: &TransportOptions) {}

        async fn exchange(&self, _request: &Message) -> Result<Message> {
            Err(DnsError::Timeout)
        }
    }

    fn ranking(labels: &[&str]) -> ServerRanking {
        ServerRanking::new(
            labels
                .iter()
                .map(|l| Arc::new(LabelTransport(l.to_string())) as Arc<dyn SingleTransport>)
                .collect(),
        )
    }

    #[test]
    fn test_repeated_success_reaches_front() {
        let mut ranking = ranking(&["a", "b", "c", "d"]);
        for _ in 0..10 {
            ranking.promote("d");
        }
        assert_eq!(ranking.labels()[0], "d");
    }

    #[test]
    fn test_repeated_timeouts_drift_to_tail() {
        let mut ranking = ranking(&["a", "b", "c", "d"]);
        for _ in 0..10 {
            ranking.demote("a");
        }
        assert_eq!(ranking.labels().last().unwrap(), "a");
    }

    #[test]
    fn test_hard_error_sinks_to_bottom_in_one_step() {
        let mut ranking = ranking(&["a", "b", "c", "d"]);
        ranking.sink_to_bottom("a");
        assert_eq!(ranking.labels(), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_moves_on_unknown_label_are_ignored() {
        let mut ranking = ranking(&["a", "b"]);
        ranking.promote("nope");
        ranking.demote("nope");
        ranking.sink_to_bottom("nope");
        assert_eq!(ranking.labels(), vec!["a", "b"]);
    }

    #[test]
    fn test_edge_positions_are_stable() {
        let mut ranking = ranking(&["a", "b"]);
        ranking.promote("a");
        ranking.demote("b");
        assert_eq!(ranking.labels(), vec!["a", "b"]);
    }
}
