//! 解析器端到端测试套件
//!
//! 用脚本化的模拟传输驱动完整的编排引擎：竞速、重试、超时、
//! 取消、排序调整与验证器交接都在暂停时钟下确定性地验证。

use async_trait::async_trait;
use rat_stubdns::{
    result_channel, DnsError, Message, NullValidator, QClass, Record, RecordData, RecordType,
    ResolverConfig, Result, SecurityLevel, SingleTransport, StubResolver, TransportOptions,
    Validator,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// 模拟传输的单次行为
#[derive(Debug, Clone)]
enum Behavior {
    /// 延迟后应答
    Answer(Duration),
    /// 延迟后返回错误
    Fail(Duration, DnsError),
    /// 不应答（模拟静默的服务器）
    Silent,
}

/// 脚本化的模拟传输
///
/// 第N次exchange执行第N个行为，超出脚本长度后重复最后一个。
#[derive(Debug)]
struct MockTransport {
    label: String,
    behaviors: Vec<Behavior>,
    calls: AtomicUsize,
}

impl MockTransport {
    fn new(label: &str, behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            behaviors,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SingleTransport for MockTransport {
    fn server(&self) -> &str {
        &self.label
    }

    fn configure(&self, _options: &TransportOptions) {}

    async fn exchange(&self, request: &Message) -> Result<Message> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .get(index)
            .or_else(|| self.behaviors.last())
            .cloned()
            .unwrap_or(Behavior::Silent);

        match behavior {
            Behavior::Answer(delay) => {
                sleep(delay).await;
                Ok(answer_for(request))
            }
            Behavior::Fail(delay, error) => {
                sleep(delay).await;
                Err(error)
            }
            Behavior::Silent => {
                sleep(Duration::from_secs(3600)).await;
                Err(DnsError::Timeout)
            }
        }
    }
}

/// 按请求拼一个单A记录的应答
fn answer_for(request: &Message) -> Message {
    let mut response = request.clone();
    response.flags.qr = true;
    response.flags.ra = true;
    if let Some(question) = request.question() {
        response.answers.push(Record {
            name: question.name.clone(),
            rtype: RecordType::A,
            class: question.qclass,
            ttl: 300,
            data: RecordData::A([192, 0, 2, 1].into()),
        });
    }
    response
}

fn test_config() -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config.tick_interval = Duration::from_millis(10);
    config.retry_times = 1;
    config.retry_delay = Duration::from_secs(1);
    config
}

fn resolver_with(
    transports: Vec<Arc<dyn SingleTransport>>,
    config: ResolverConfig,
) -> StubResolver {
    StubResolver::with_transports(config, transports, Arc::new(NullValidator)).unwrap()
}

fn query() -> Message {
    Message::new_query("example.com", RecordType::A, QClass::IN)
}

/// 延迟固定时长后给出固定安全级别的验证器
#[derive(Debug)]
struct DelayValidator {
    delay: Duration,
    level: SecurityLevel,
}

#[async_trait]
impl Validator for DelayValidator {
    async fn validate(&self, message: Message) -> Result<(Message, SecurityLevel)> {
        sleep(self.delay).await;
        Ok((message, self.level))
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_server_success() {
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(5))]);
    let resolver = resolver_with(vec![a.clone()], test_config());

    let answer = resolver.send_message(query()).await.unwrap();

    assert_eq!(answer.answers.len(), 1);
    assert_eq!(answer.question().unwrap().name, "example.com");
    assert_eq!(a.calls(), 1);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_second_server_wins_race() {
    // A静默到单包超时，B在自己的交错触发点(500ms)之后50ms应答
    let a = MockTransport::new(
        "a",
        vec![Behavior::Fail(Duration::from_millis(300), DnsError::Timeout)],
    );
    let b = MockTransport::new("b", vec![Behavior::Answer(Duration::from_millis(50))]);
    let mut config = test_config();
    config.packet_timeout = Duration::from_millis(300);
    let resolver = resolver_with(vec![a.clone(), b.clone()], config);

    let start = Instant::now();
    let answer = resolver.send_message(query()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(answer.answers.len(), 1);
    assert!(
        elapsed >= Duration::from_millis(500) && elapsed <= Duration::from_millis(700),
        "unexpected completion time {:?}",
        elapsed
    );
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    // A超时后移，B成功前移
    assert_eq!(resolver.server_order(), vec!["b", "a"]);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_nxdomain_short_circuits() {
    let a = MockTransport::new(
        "a",
        vec![Behavior::Fail(Duration::from_millis(10), DnsError::NxDomain)],
    );
    let b = MockTransport::new("b", vec![Behavior::Answer(Duration::from_millis(5))]);
    let mut config = test_config();
    config.retry_delay = Duration::from_secs(5);
    let resolver = resolver_with(vec![a.clone(), b.clone()], config);

    let start = Instant::now();
    let result = resolver.send_message(query()).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(DnsError::NxDomain)));
    assert!(elapsed < Duration::from_millis(100));
    // 权威否定终结查询，B从未被问到
    assert_eq!(b.calls(), 0);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_client_timeout_overrides_retries() {
    let a = MockTransport::new("a", vec![Behavior::Silent]);
    let b = MockTransport::new("b", vec![Behavior::Silent]);
    let mut config = test_config();
    config.retry_times = 10;
    config.retry_delay = Duration::from_millis(100);
    config.query_timeout = Duration::from_millis(200);
    config.tick_interval = Duration::from_millis(50);
    let resolver = resolver_with(vec![a, b], config);

    let (sink, mut stream) = result_channel();
    let client_id = resolver.send_async(query(), sink, None);

    let start = Instant::now();
    let (id, message, error) = stream.recv().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(id, client_id);
    assert!(message.is_none());
    assert!(matches!(error, Some(DnsError::ClientTimeout)));
    assert!(
        elapsed >= Duration::from_millis(200) && elapsed <= Duration::from_millis(300),
        "client timeout fired at {:?}",
        elapsed
    );

    // 终结之后任何时间窗口内都不再有元组
    sleep(Duration::from_secs(2)).await;
    assert!(stream.try_recv().is_err());

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_all() {
    let a = MockTransport::new("a", vec![Behavior::Silent]);
    let resolver = resolver_with(vec![a], test_config());

    let (sink1, mut stream1) = result_channel();
    let (sink2, mut stream2) = result_channel();
    let id1 = resolver.send_async(query(), sink1, None);
    let id2 = resolver.send_async(query(), sink2, None);
    assert_ne!(id1, id2);

    sleep(Duration::from_millis(20)).await;
    resolver.close();

    let (got1, msg1, err1) = stream1.recv().await.unwrap();
    let (got2, msg2, err2) = stream2.recv().await.unwrap();
    assert_eq!(got1, id1);
    assert_eq!(got2, id2);
    assert!(msg1.is_none() && msg2.is_none());
    assert!(matches!(err1, Some(DnsError::ResolverClosed)));
    assert!(matches!(err2, Some(DnsError::ResolverClosed)));

    sleep(Duration::from_secs(1)).await;
    assert!(stream1.try_recv().is_err());
    assert!(stream2.try_recv().is_err());

    // 关闭后的新查询同步拿到ResolverClosed
    let (sink3, mut stream3) = result_channel();
    resolver.send_async(query(), sink3, Some(99));
    let (_, _, err3) = stream3.recv().await.unwrap();
    assert!(matches!(err3, Some(DnsError::ResolverClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_validation_handoff() {
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(10))]);
    let validator = Arc::new(DelayValidator {
        delay: Duration::from_millis(20),
        level: SecurityLevel::Secure,
    });
    let resolver =
        StubResolver::with_transports(test_config(), vec![a], validator).unwrap();

    let start = Instant::now();
    let answer = resolver.send_message(query()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(answer.security_level, SecurityLevel::Secure);
    assert!(elapsed >= Duration::from_millis(30));

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_bogus_reported_per_policy() {
    // 默认策略：BOGUS按错误上报
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(5))]);
    let validator = Arc::new(DelayValidator {
        delay: Duration::from_millis(5),
        level: SecurityLevel::Bogus,
    });
    let resolver =
        StubResolver::with_transports(test_config(), vec![a], validator).unwrap();
    let result = resolver.send_message(query()).await;
    assert!(matches!(result, Err(DnsError::Validation(_))));
    resolver.close();

    // 清空错误级别集合后，BOGUS附加在返回报文上
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(5))]);
    let validator = Arc::new(DelayValidator {
        delay: Duration::from_millis(5),
        level: SecurityLevel::Bogus,
    });
    let mut config = test_config();
    config.error_levels.clear();
    let resolver = StubResolver::with_transports(config, vec![a], validator).unwrap();
    let answer = resolver.send_message(query()).await.unwrap();
    assert_eq!(answer.security_level, SecurityLevel::Bogus);
    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_no_crosstalk_between_clients() {
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(5))]);
    let resolver = resolver_with(vec![a], test_config());

    let mut streams = Vec::new();
    for id in 10u64..14 {
        let (sink, stream) = result_channel();
        let got = resolver.send_async(query(), sink, Some(id));
        assert_eq!(got, id);
        streams.push((id, stream));
    }

    for (expected, stream) in streams.iter_mut() {
        let (id, message, error) = stream.recv().await.unwrap();
        assert_eq!(id, *expected);
        assert!(message.is_some());
        assert!(error.is_none());
    }

    // 每个通道恰好一个元组
    sleep(Duration::from_secs(1)).await;
    for (_, stream) in streams.iter_mut() {
        assert!(stream.try_recv().is_err());
    }

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_client_id_rejected() {
    let a = MockTransport::new("a", vec![Behavior::Silent]);
    let resolver = resolver_with(vec![a], test_config());

    let (sink1, mut stream1) = result_channel();
    let (sink2, mut stream2) = result_channel();
    resolver.send_async(query(), sink1, Some(42));
    resolver.send_async(query(), sink2, Some(42));

    let (id, message, error) = stream2.recv().await.unwrap();
    assert_eq!(id, 42);
    assert!(message.is_none());
    assert!(matches!(error, Some(DnsError::Argument(_))));

    // 第一个查询不受影响，仍在等待
    assert!(stream1.try_recv().is_err());
    assert_eq!(resolver.pending_queries(), 1);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_response_message_is_an_argument_error() {
    let a = MockTransport::new("a", vec![Behavior::Answer(Duration::from_millis(5))]);
    let resolver = resolver_with(vec![a.clone()], test_config());

    let mut bad = query();
    bad.flags.qr = true;
    let (sink, mut stream) = result_channel();
    resolver.send_async(bad, sink, Some(7));

    let (id, message, error) = stream.recv().await.unwrap();
    assert_eq!(id, 7);
    assert!(message.is_none());
    assert!(matches!(error, Some(DnsError::Argument(_))));
    // 参数错误同步上报，不触碰任何传输
    assert_eq!(a.calls(), 0);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_all_timeouts_yield_single_timeout_error() {
    let a = MockTransport::new(
        "a",
        vec![Behavior::Fail(Duration::from_millis(10), DnsError::Timeout)],
    );
    let resolver = resolver_with(vec![a.clone()], test_config());

    let (sink, mut stream) = result_channel();
    resolver.send_async(query(), sink, Some(1));

    let (_, message, error) = stream.recv().await.unwrap();
    assert!(message.is_none());
    assert!(matches!(error, Some(DnsError::Timeout)));

    sleep(Duration::from_secs(1)).await;
    assert!(stream.try_recv().is_err());

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_hard_error_cuts_server_from_schedule() {
    // 硬错误把该服务器从剩余调度中剔除：第二轮不再发生，立即终结
    let a = MockTransport::new(
        "a",
        vec![Behavior::Fail(Duration::from_millis(5), DnsError::Refused)],
    );
    let mut config = test_config();
    config.retry_times = 2;
    config.retry_delay = Duration::from_millis(100);
    let resolver = resolver_with(vec![a.clone()], config);

    let start = Instant::now();
    let result = resolver.send_message(query()).await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(DnsError::Refused)));
    assert!(elapsed < Duration::from_millis(100));
    assert_eq!(a.calls(), 1);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_resource_exhaustion_keeps_schedule() {
    // 文件描述符耗尽不剔除调度：同一台服务器第二轮重试后成功
    let a = MockTransport::new(
        "a",
        vec![
            Behavior::Fail(
                Duration::from_millis(5),
                DnsError::ResourceExhausted("out of fds".to_string()),
            ),
            Behavior::Answer(Duration::from_millis(5)),
        ],
    );
    let mut config = test_config();
    config.retry_times = 2;
    config.retry_delay = Duration::from_millis(100);
    let resolver = resolver_with(vec![a.clone()], config);

    let answer = resolver.send_message(query()).await.unwrap();
    assert_eq!(answer.answers.len(), 1);
    assert_eq!(a.calls(), 2);

    resolver.close();
}

#[tokio::test(start_paused = true)]
async fn test_ranking_persists_across_queries() {
    // 第一问：A硬错误沉底，B胜出；第二问直接从B开始，A不再被问
    let a = MockTransport::new(
        "a",
        vec![Behavior::Fail(Duration::from_millis(50), DnsError::Refused)],
    );
    let b = MockTransport::new("b", vec![Behavior::Answer(Duration::from_millis(50))]);
    let resolver = resolver_with(vec![a.clone(), b.clone()], test_config());

    resolver.send_message(query()).await.unwrap();
    assert_eq!(resolver.server_order(), vec!["b", "a"]);
    assert_eq!(a.calls(), 1);

    resolver.send_message(query()).await.unwrap();
    assert_eq!(a.calls(), 1);
    assert_eq!(resolver.server_order(), vec!["b", "a"]);

    resolver.close();
}
