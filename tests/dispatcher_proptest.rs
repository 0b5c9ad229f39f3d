//! Dispatcher 的随机事件序列性质测试
//!
//! 几个地址共用两个 IP，随机交错 Connected / Disconnected / NewMessage，
//! 时间单调递增。每一步之后检查注册唯一、封禁 IP 无在线客户端、连接至多释放一次、
//! 封禁期内的新连接不会注册。

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chatcast_server::security::RateLimitConfig;
use chatcast_server::{Connection, DispatchEvent, Dispatcher, DispatcherConfig, MockConnection};
use proptest::prelude::*;

const RATE_LIMIT: Duration = Duration::from_secs(1);
const STRIKE_THRESHOLD: u32 = 2;
const BAN_TIMEOUT: Duration = Duration::from_secs(5);

const ADDRS: [&str; 4] = [
    "10.0.0.1:40001",
    "10.0.0.1:40002",
    "10.0.0.2:40001",
    "10.0.0.2:40002",
];

#[derive(Debug, Clone)]
enum Step {
    /// 地址 i 上建立新连接
    Connect(usize),
    /// 地址 i 当前连接的读任务结束
    Disconnect(usize),
    /// 某个历史连接迟到的断开事件
    LateDisconnect(usize),
    /// 地址 i 当前连接发送一块数据（false 为非法 UTF-8）
    Send(usize, bool),
    /// 周期维护
    Maintain,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..ADDRS.len()).prop_map(Step::Connect),
        1 => (0..ADDRS.len()).prop_map(Step::Disconnect),
        1 => (0..64usize).prop_map(Step::LateDisconnect),
        6 => (0..ADDRS.len(), any::<bool>()).prop_map(|(i, valid)| Step::Send(i, valid)),
        1 => Just(Step::Maintain),
    ]
}

fn create_test_dispatcher() -> Dispatcher<MockConnection> {
    Dispatcher::new(DispatcherConfig {
        rate_limit: RateLimitConfig {
            min_interval: RATE_LIMIT,
            strike_threshold: STRIKE_THRESHOLD,
        },
        ban_timeout: BAN_TIMEOUT,
        sweep_interval: Duration::from_secs(60),
        debug_mode: true,
    })
}

fn addr(i: usize) -> SocketAddr {
    ADDRS[i]
        .parse()
        .unwrap_or_else(|e| panic!("invalid test address {}: {e}", ADDRS[i]))
}

fn ips() -> Vec<IpAddr> {
    let mut ips: Vec<IpAddr> = (0..ADDRS.len()).map(|i| addr(i).ip()).collect();
    ips.dedup();
    ips
}

/// 测试侧记录的状态
struct Model {
    dispatcher: Dispatcher<MockConnection>,
    /// 每个地址最近一次 Connected 的连接
    current: Vec<Option<MockConnection>>,
    /// 所有创建过的连接
    all: Vec<MockConnection>,
    /// Connected 时成功注册的连接
    registered: Vec<MockConnection>,
    /// 各 IP 最近一次被封禁的时间
    banned_at: HashMap<IpAddr, Instant>,
}

impl Model {
    fn new() -> Self {
        Self {
            dispatcher: create_test_dispatcher(),
            current: vec![None; ADDRS.len()],
            all: Vec::new(),
            registered: Vec::new(),
            banned_at: HashMap::new(),
        }
    }

    fn ban_active(&self, ip: IpAddr, now: Instant) -> bool {
        self.banned_at
            .get(&ip)
            .is_some_and(|banned_at| now < *banned_at + BAN_TIMEOUT)
    }

    async fn apply(&mut self, step: &Step, now: Instant) -> Result<(), TestCaseError> {
        match step {
            Step::Connect(i) => {
                let conn = MockConnection::new(addr(*i));
                let expect_registered = !self.ban_active(conn.peer_ip(), now);

                self.dispatcher
                    .handle(DispatchEvent::Connected(conn.clone()), now)
                    .await;

                prop_assert_eq!(
                    self.dispatcher.is_registered(&conn.client_id()),
                    expect_registered,
                    "connect from {} at ban state {:?}",
                    conn.client_id(),
                    self.banned_at.get(&conn.peer_ip())
                );
                if expect_registered {
                    self.registered.push(conn.clone());
                } else {
                    prop_assert_eq!(
                        conn.written_text(),
                        vec!["You are currently banned!\n".to_string()]
                    );
                    prop_assert_eq!(conn.release_count(), 1);
                }

                self.all.push(conn.clone());
                self.current[*i] = Some(conn);
            }
            Step::Disconnect(i) => {
                if let Some(conn) = self.current[*i].take() {
                    self.dispatcher
                        .handle(DispatchEvent::Disconnected(conn), now)
                        .await;
                }
            }
            Step::LateDisconnect(n) => {
                if !self.all.is_empty() {
                    let conn = self.all[n % self.all.len()].clone();
                    self.dispatcher
                        .handle(DispatchEvent::Disconnected(conn), now)
                        .await;
                }
            }
            Step::Send(i, valid) => {
                // 已关闭的连接不会再有读事件
                if let Some(conn) = self.current[*i].clone().filter(|c| !c.is_closed()) {
                    let payload: &'static [u8] = if *valid { b"hello" } else { b"\xff\xfe" };
                    self.dispatcher
                        .handle(
                            DispatchEvent::NewMessage(conn, Bytes::from_static(payload)),
                            now,
                        )
                        .await;
                }
            }
            Step::Maintain => self.dispatcher.maintain(now),
        }

        // 记录新产生的封禁
        for ip in ips() {
            if self.dispatcher.is_banned(ip, now) && !self.ban_active(ip, now) {
                self.banned_at.insert(ip, now);
            }
        }
        Ok(())
    }

    fn check_invariants(&self, now: Instant) -> Result<(), TestCaseError> {
        let mut registered_addrs = 0;
        for i in 0..ADDRS.len() {
            let address = addr(i);
            let registered = self.dispatcher.is_registered(&address.into());

            // 同一身份至多一个在线连接，且与注册表一致
            let live = self
                .registered
                .iter()
                .filter(|c| c.peer_addr() == address && c.release_count() == 0)
                .count();
            prop_assert!(live <= 1, "{} has {} live connections", address, live);
            prop_assert_eq!(live == 1, registered, "registry out of sync for {}", address);

            if registered {
                registered_addrs += 1;
                // 在线客户端的 IP 不在封禁期内
                prop_assert!(
                    !self.dispatcher.is_banned(address.ip(), now),
                    "{} registered while its IP is banned",
                    address
                );
            }
        }
        prop_assert_eq!(self.dispatcher.client_count(), registered_addrs);

        for conn in &self.all {
            prop_assert!(
                conn.release_count() <= 1,
                "{} released {} times",
                conn.id(),
                conn.release_count()
            );
        }
        Ok(())
    }
}

async fn run_steps(steps: Vec<(Step, u64)>) -> Result<(), TestCaseError> {
    let mut model = Model::new();
    let mut now = Instant::now();

    for (step, advance_ms) in &steps {
        now += Duration::from_millis(*advance_ms);
        model.apply(step, now).await?;
        model.check_invariants(now)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn registry_and_ban_invariants_hold(
        steps in proptest::collection::vec((step_strategy(), 1u64..1500), 1..80)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("failed to build runtime: {e}"));
        runtime.block_on(run_steps(steps))?;
    }
}
