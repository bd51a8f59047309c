//! 重传调度规划
//!
//! 纯函数：给定服务器数、重试轮数、轮间名义延迟与基准时刻，
//! 产出绝对触发时刻到(服务器,轮次)的有序映射。第0轮在一个名义
//! 延迟内交错铺开所有服务器；之后每轮的延迟按 `D·2^k` 指数退避，
//! 轮内保持同样的交错。同一时刻出现两个槽位说明配置自相矛盾，
//! 按致命错误拒绝而不是静默覆盖。

use crate::{DnsError, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// 单个调度槽：第 `attempt` 轮发往排序中第 `server` 个服务器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireSlot {
    /// 服务器在排序快照中的下标
    pub server: usize,
    /// 重试轮次（从0开始）
    pub attempt: usize,
}

/// 规划一个客户端查询的全部触发时刻
pub fn plan(
    server_count: usize,
    retry_times: usize,
    retry_delay: Duration,
    base: Instant,
) -> Result<BTreeMap<Instant, FireSlot>> {
    if server_count == 0 {
        return Err(DnsError::NoUpstreamAvailable);
    }

    let stagger = retry_delay / server_count as u32;
    let mut schedule = BTreeMap::new();

    for attempt in 0..retry_times {
        let round_delay = if attempt == 0 {
            Duration::ZERO
        } else {
            retry_delay * 2u32.saturating_pow(attempt as u32)
        };

        for server in 0..server_count {
            let at = base + round_delay + stagger * server as u32;
            if schedule.insert(at, FireSlot { server, attempt }).is_some() {
                return Err(DnsError::Internal(format!(
                    "Duplicate fire time in schedule (round {}, server {})",
                    attempt, server
                )));
            }
        }
    }

    Ok(schedule)
}
