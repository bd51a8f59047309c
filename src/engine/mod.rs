//! 查询编排引擎
//!
//! 单任务协作式调度核心：一个select任务独占事件总线接收端与
//! 定时tick，负责派发到点的子查询、消化每包事件、维护服务器
//! 排序、调用验证器并保证每个客户端查询恰好得到一个终结元组。
//! 客户端线程只通过互斥保护的登记表与线程安全的结果通道与它
//! 交互，向结果通道的投递永不阻塞编排器。

pub mod event;
pub mod plan;
pub mod ranking;
pub mod table;

use crate::config::ResolverConfig;
use crate::transport::{self, SingleTransport, TransportOptions};
use crate::types::Message;
use crate::validator::Validator;
use crate::{dns_debug, dns_error, dns_info, dns_race, dns_timeout};
use crate::DnsError;
use event::{EventKind, EventReceiver, EventSender, QueryEvent, QueryOutcome, ResultSink, SubQuery};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use table::{QueryState, QueryTable, ScheduledFire};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 查询编排引擎
///
/// 拥有select任务的句柄；其余共享状态（登记表、排序、配置、
/// 事件总线发送端）由select任务与调用方线程共同持有。
#[derive(Debug)]
pub struct QueryEngine {
    shared: Arc<EngineShared>,
    select_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct EngineShared {
    /// 在途查询登记表（唯一事实来源）
    table: Mutex<QueryTable>,
    /// 服务器排序（跨查询持续生效）
    ranking: Mutex<ranking::ServerRanking>,
    /// 解析器配置
    config: RwLock<ResolverConfig>,
    /// 验证器
    validator: Arc<dyn Validator>,
    /// 事件总线发送端（分发给各传输）
    event_tx: EventSender,
    /// 立即tick的唤醒信号
    kick: Notify,
    /// 关闭标志
    closed: AtomicBool,
}

impl QueryEngine {
    /// 启动引擎：创建事件总线并派生select任务
    pub fn start(
        config: ResolverConfig,
        transports: Vec<Arc<dyn SingleTransport>>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let (event_tx, event_rx) = event::event_channel();
        let shared = Arc::new(EngineShared {
            table: Mutex::new(QueryTable::new()),
            ranking: Mutex::new(ranking::ServerRanking::new(transports)),
            config: RwLock::new(config),
            validator,
            event_tx,
            kick: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let select_task = tokio::spawn(run_select(shared.clone(), event_rx));

        Self {
            shared,
            select_task: Mutex::new(Some(select_task)),
        }
    }

    /// 登记一个异步查询，立即返回其 `client_id`
    ///
    /// 参数不合法、ID重复或引擎已关闭时，唯一的错误元组直接
    /// 推入 `sink`，不触碰任何传输。
    pub fn submit(&self, request: Message, sink: ResultSink, client_id: Option<u64>) -> u64 {
        if self.shared.closed.load(Ordering::SeqCst) {
            let id = client_id.unwrap_or(0);
            let _ = sink.send((id, None, Some(DnsError::ResolverClosed)));
            return id;
        }

        if request.is_response() || request.question().is_none() {
            let id = client_id.unwrap_or(0);
            let _ = sink.send((
                id,
                None,
                Some(DnsError::Argument(
                    "send_async requires a query message with a question".to_string(),
                )),
            ));
            return id;
        }

        let (retry_times, retry_delay, query_timeout) = {
            let config = self
                .shared
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            (config.retry_times, config.retry_delay, config.query_timeout)
        };

        let snapshot = self
            .shared
            .ranking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        if snapshot.is_empty() {
            let id = client_id.unwrap_or(0);
            let _ = sink.send((id, None, Some(DnsError::NoUpstreamAvailable)));
            return id;
        }

        let mut table = self
            .shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = client_id.unwrap_or_else(|| generate_client_id(&table));

        let base = Instant::now();
        let schedule = match plan::plan(snapshot.len(), retry_times, retry_delay, base) {
            Ok(slots) => slots
                .into_iter()
                .map(|(at, slot)| (at, ScheduledFire::resolve(slot, &snapshot)))
                .collect(),
            Err(e) => {
                let _ = sink.send((id, None, Some(e)));
                return id;
            }
        };

        let hard_deadline = if query_timeout.is_zero() {
            None
        } else {
            Some(base + query_timeout)
        };

        if let Err(e) = table.insert(id, request, sink.clone(), schedule, hard_deadline) {
            let _ = sink.send((id, None, Some(e)));
            return id;
        }
        drop(table);

        // 与close()竞争时补一次终结，维持"恰好一个元组"
        if self.shared.closed.load(Ordering::SeqCst) {
            let removed = self
                .shared
                .table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);
            if let Some(client) = removed {
                let _ = client
                    .sink
                    .send((id, None, Some(DnsError::ResolverClosed)));
            }
            return id;
        }

        dns_debug!("登记客户端查询 {}，触发立即tick", id);
        self.shared.kick.notify_one();
        id
    }

    /// 关闭引擎：每个在途查询收到一个 `ResolverClosed` 错误，
    /// 定时器停止，迟到事件随任务一起消亡
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = self
            .shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain();
        dns_info!("引擎关闭，终结 {} 个在途查询", drained.len());
        for (client_id, client) in drained {
            let _ = client
                .sink
                .send((client_id, None, Some(DnsError::ResolverClosed)));
        }

        self.shared.kick.notify_one();
        if let Some(handle) = self
            .select_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    /// 引擎是否已关闭
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// 下发新配置并推送到每个传输
    pub fn reconfigure(&self, config: ResolverConfig) {
        let options = TransportOptions::from_config(&config);
        {
            let mut current = self
                .shared
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *current = config;
        }
        let ranking = self
            .shared
            .ranking
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for transport in ranking.iter() {
            transport.configure(&options);
        }
    }

    /// 当前配置快照
    pub fn config(&self) -> ResolverConfig {
        self.shared
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 整体替换上游传输（nameserver配置变更）
    pub fn set_transports(&self, transports: Vec<Arc<dyn SingleTransport>>) {
        self.shared
            .ranking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(transports);
    }

    /// 当前排序下的服务器标签
    pub fn server_order(&self) -> Vec<String> {
        self.shared
            .ranking
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .labels()
    }

    /// 在途查询数
    pub fn pending_queries(&self) -> usize {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for QueryEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// 生成客户端ID：当前毫秒时间戳加一个小随机数，循环避开占用
fn generate_client_id(table: &QueryTable) -> u64 {
    loop {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let candidate = now_ms + rand::random::<u16>() as u64;
        if !table.contains(candidate) {
            return candidate;
        }
    }
}

/// select任务主循环：定时tick、事件总线与立即唤醒三路复用
async fn run_select(shared: Arc<EngineShared>, mut events: EventReceiver) {
    let tick_interval = shared
        .config
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .tick_interval;
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => tick(&shared),
            _ = shared.kick.notified() => tick(&shared),
            maybe_event = events.recv() => match maybe_event {
                Some(event) => {
                    handle_event(&shared, event);
                    // 事件到达同样算一次唤醒：顺带检查超时与到点的调度槽
                    tick(&shared);
                }
                None => break,
            },
        }

        if shared.closed.load(Ordering::SeqCst) {
            break;
        }
    }
}

/// 一次tick：先检查硬超时，再派发所有到点的子查询
///
/// 登记表锁每个tick只取一次；向结果通道的投递放在临界区外，
/// 但移除动作已在临界区内完成，同一客户端不会再有并发投递。
fn tick(shared: &EngineShared) {
    let now = Instant::now();
    let mut emissions: Vec<(ResultSink, QueryOutcome)> = Vec::new();
    let mut dispatches: Vec<(Arc<dyn SingleTransport>, Message, SubQuery)> = Vec::new();

    {
        let mut table = shared.table.lock().unwrap_or_else(PoisonError::into_inner);

        for client_id in table.expired(now) {
            if let Some(client) = table.remove(client_id) {
                dns_timeout!(client_id, client.hard_deadline);
                emissions.push((client.sink, (client_id, None, Some(DnsError::ClientTimeout))));
            }
        }

        for (client_id, fire) in table.pop_due(now) {
            let mut request = match table.get(client_id) {
                Some(client) => client.request.clone(),
                None => continue,
            };
            request.id = rand::random();
            let sub = SubQuery {
                server: fire.transport.server().to_string(),
                msg_id: request.id,
                client_id,
                attempt: fire.attempt,
            };
            table.record_outstanding(client_id, sub.clone());
            dispatches.push((fire.transport, request, sub));
        }
    }

    for (sink, outcome) in emissions {
        let _ = sink.send(outcome);
    }
    for (transport, request, sub) in dispatches {
        dns_race!(transport.server(), sub.attempt, sub.client_id);
        transport::send_async(transport, request, shared.event_tx.clone(), sub);
    }
}

/// 事件分发
fn handle_event(shared: &EngineShared, event: QueryEvent) {
    match event.kind {
        EventKind::Received | EventKind::Error => handle_received(shared, event),
        EventKind::Validated => handle_validated(shared, event),
    }
}

/// RECEIVED事件：一次子查询以响应或错误收场
///
/// ERROR事件（与具体响应无关的传输层故障）走完全相同的路径。
fn handle_received(shared: &EngineShared, event: QueryEvent) {
    let client_id = event.sub.client_id;
    let mut emission: Option<(ResultSink, QueryOutcome)> = None;
    let mut validation: Option<(Message, SubQuery)> = None;

    {
        let mut table = shared.table.lock().unwrap_or_else(PoisonError::into_inner);

        let state = match table.state(client_id) {
            Some(state) => state,
            None => {
                dns_debug!("丢弃过期事件: 客户端查询 {} 已不在表内", client_id);
                return;
            }
        };

        if state == QueryState::StoppedWaitingValidation {
            // 调度已停止，迟到的应答只消费在途记录
            table.clear_outstanding(client_id, &event.sub);
            return;
        }

        if !table.clear_outstanding(client_id, &event.sub) {
            // 在途集合里找不到的子查询说明传输合约被破坏
            dns_error!("在途集合缺少子查询: {:?}", event.sub);
            debug_assert!(false, "sub-query missing from outstanding set");
            return;
        }

        if let Some(error) = event.error {
            match error {
                DnsError::Timeout => {
                    shared
                        .ranking
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .demote(&event.sub.server);
                    if table.nothing_left(client_id) {
                        if let Some(client) = table.remove(client_id) {
                            emission =
                                Some((client.sink, (client_id, None, Some(DnsError::Timeout))));
                        }
                    }
                }
                DnsError::NxDomain => {
                    // 权威否定立即终结，不再等其余竞速者
                    if let Some(client) = table.remove(client_id) {
                        emission = Some((client.sink, (client_id, None, Some(DnsError::NxDomain))));
                    }
                }
                DnsError::ResourceExhausted(_) => {
                    // 本地资源耗尽是瞬时问题，保留该服务器的调度
                    if table.nothing_left(client_id) {
                        if let Some(client) = table.remove(client_id) {
                            emission = Some((client.sink, (client_id, None, Some(error))));
                        }
                    }
                }
                other => {
                    table.remove_server_schedule(client_id, &event.sub.server);
                    shared
                        .ranking
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .sink_to_bottom(&event.sub.server);
                    if table.nothing_left(client_id) {
                        if let Some(client) = table.remove(client_id) {
                            emission = Some((client.sink, (client_id, None, Some(other))));
                        }
                    }
                }
            }
        } else if let Some(message) = event.message {
            shared
                .ranking
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .promote(&event.sub.server);
            // 停止后续调度，客户端留在表内等验证器结论
            table.cancel(client_id);
            validation = Some((message, event.sub));
        } else {
            dns_error!("RECEIVED事件既无报文也无错误: {:?}", event.sub);
            debug_assert!(false, "RECEIVED event carries neither message nor error");
        }
    }

    if let Some((sink, outcome)) = emission {
        let _ = sink.send(outcome);
    }
    if let Some((message, sub)) = validation {
        spawn_validation(shared, message, sub);
    }
}

/// 把响应交给验证器，结论以VALIDATED事件回流
fn spawn_validation(shared: &EngineShared, message: Message, sub: SubQuery) {
    let validator = shared.validator.clone();
    let event_tx = shared.event_tx.clone();
    tokio::spawn(async move {
        let event = match validator.validate(message).await {
            Ok((mut message, level)) => {
                message.security_level = level;
                QueryEvent::validated(sub, Some(message), None)
            }
            Err(error) => QueryEvent::validated(sub, None, Some(error)),
        };
        let _ = event_tx.send(event);
    });
}

/// VALIDATED事件：验证器结论终结客户端查询
fn handle_validated(shared: &EngineShared, event: QueryEvent) {
    let client_id = event.sub.client_id;
    let emission: Option<(ResultSink, QueryOutcome)>;

    {
        let mut table = shared.table.lock().unwrap_or_else(PoisonError::into_inner);

        let client = match table.remove(client_id) {
            Some(client) => client,
            None => {
                dns_debug!("丢弃过期验证结论: 客户端查询 {} 已不在表内", client_id);
                return;
            }
        };

        if let Some(error) = event.error {
            emission = Some((client.sink, (client_id, None, Some(error))));
        } else if let Some(message) = event.message {
            let level = message.security_level;
            let reported_as_error = shared
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .error_levels
                .contains(&level);
            if reported_as_error {
                emission = Some((
                    client.sink,
                    (
                        client_id,
                        None,
                        Some(DnsError::Validation(format!(
                            "Validator classified response as {}",
                            level
                        ))),
                    ),
                ));
            } else {
                emission = Some((client.sink, (client_id, Some(message), None)));
            }
        } else {
            dns_error!("VALIDATED事件既无报文也无错误: {:?}", event.sub);
            debug_assert!(false, "VALIDATED event carries neither message nor error");
            emission = Some((
                client.sink,
                (
                    client_id,
                    None,
                    Some(DnsError::Internal(
                        "Empty VALIDATED event".to_string(),
                    )),
                ),
            ));
        }
    }

    if let Some((sink, outcome)) = emission {
        let _ = sink.send(outcome);
    }
}
