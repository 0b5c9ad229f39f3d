use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::security::StrikeState;
use crate::transport::{ClientId, Connection, ConnectionId};

/// 已注册客户端
pub struct ClientRecord<C> {
    /// 客户端身份（远端地址）
    pub id: ClientId,
    /// 连接句柄，注册后归 Dispatcher 独占
    pub conn: C,
    /// 注册时间
    pub connected_at: Instant,
    /// 限流与违规积分
    pub strikes: StrikeState,
}

impl<C: Connection> ClientRecord<C> {
    /// 创建客户端记录：last_message_at = now，积分为 0
    pub fn new(conn: C, now: Instant) -> Self {
        Self {
            id: conn.client_id(),
            conn,
            connected_at: now,
            strikes: StrikeState::new(now),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// 自注册以来的在线时长
    pub fn session_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.connected_at)
    }
}

/// 客户端注册表
///
/// 以远端地址为键，每个身份至多一条记录。
/// 不带锁：只由 Dispatcher 任务持有和修改。
pub struct ClientRegistry<C> {
    clients: HashMap<ClientId, ClientRecord<C>>,
}

impl<C: Connection> ClientRegistry<C> {
    pub fn new() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// 注册客户端；同一身份已有记录时返回被替换的旧记录，由调用方负责释放
    pub fn register(&mut self, record: ClientRecord<C>) -> Option<ClientRecord<C>> {
        self.clients.insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &ClientId) -> Option<&ClientRecord<C>> {
        self.clients.get(id)
    }

    /// 查找属于指定连接的记录（身份相同但连接不同的旧事件视为不存在）
    pub fn get_for_connection_mut(
        &mut self,
        id: &ClientId,
        conn_id: ConnectionId,
    ) -> Option<&mut ClientRecord<C>> {
        self.clients
            .get_mut(id)
            .filter(|record| record.connection_id() == conn_id)
    }

    /// 仅当记录属于指定连接时移除
    pub fn remove_if_connection(
        &mut self,
        id: &ClientId,
        conn_id: ConnectionId,
    ) -> Option<ClientRecord<C>> {
        match self.clients.get(id) {
            Some(record) if record.connection_id() == conn_id => self.clients.remove(id),
            _ => None,
        }
    }

    /// 移除来自指定 IP 的全部记录
    pub fn remove_by_ip(&mut self, ip: IpAddr) -> Vec<ClientRecord<C>> {
        let ids: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, record)| record.conn.peer_ip() == ip)
            .map(|(id, _)| id.clone())
            .collect();

        ids.iter().filter_map(|id| self.clients.remove(id)).collect()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.contains_key(id)
    }

    /// 除发送者以外的所有接收者（快照，便于在遍历中移除失效对端）
    pub fn peers_except(&self, sender: &ClientId) -> Vec<(ClientId, C)> {
        self.clients
            .iter()
            .filter(|(id, _)| *id != sender)
            .map(|(id, record)| (id.clone(), record.conn.clone()))
            .collect()
    }

    /// 取出全部记录（关闭服务时使用）
    pub fn drain(&mut self) -> Vec<ClientRecord<C>> {
        self.clients.drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl<C: Connection> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnection;

    fn conn(addr: &str) -> MockConnection {
        MockConnection::new(addr.parse().unwrap())
    }

    #[test]
    fn test_register_is_unique_per_identity() {
        let mut registry = ClientRegistry::new();
        let now = Instant::now();

        let first = conn("10.0.0.1:5000");
        assert!(registry.register(ClientRecord::new(first.clone(), now)).is_none());

        // 同一地址再次注册会替换旧记录
        let second = conn("10.0.0.1:5000");
        let displaced = registry.register(ClientRecord::new(second.clone(), now));
        assert_eq!(displaced.map(|r| r.connection_id()), Some(first.id()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_if_connection_ignores_stale_connection() {
        let mut registry = ClientRegistry::new();
        let now = Instant::now();
        let current = conn("10.0.0.1:5000");
        let stale = conn("10.0.0.1:5000");
        registry.register(ClientRecord::new(current.clone(), now));

        assert!(registry
            .remove_if_connection(&stale.client_id(), stale.id())
            .is_none());
        assert!(registry.contains(&current.client_id()));

        assert!(registry
            .remove_if_connection(&current.client_id(), current.id())
            .is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_peers_except_sender() {
        let mut registry = ClientRegistry::new();
        let now = Instant::now();
        let a = conn("10.0.0.1:5000");
        let b = conn("10.0.0.2:5000");
        let c = conn("10.0.0.3:5000");
        for peer in [&a, &b, &c] {
            registry.register(ClientRecord::new(peer.clone(), now));
        }

        let peers = registry.peers_except(&a.client_id());
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|(id, _)| *id != a.client_id()));
    }

    #[test]
    fn test_remove_by_ip() {
        let mut registry = ClientRegistry::new();
        let now = Instant::now();
        for addr in ["10.0.0.1:5000", "10.0.0.1:5001", "10.0.0.2:5000"] {
            registry.register(ClientRecord::new(conn(addr), now));
        }

        let removed = registry.remove_by_ip("10.0.0.1".parse().unwrap());
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_session_duration_counts_from_registration() {
        let now = Instant::now();
        let record = ClientRecord::new(conn("10.0.0.1:5000"), now);

        assert_eq!(record.session_duration(now), Duration::ZERO);
        assert_eq!(
            record.session_duration(now + Duration::from_secs(90)),
            Duration::from_secs(90)
        );
        // 时间回拨不会 panic
        assert_eq!(
            ClientRecord::new(conn("10.0.0.2:5000"), now + Duration::from_secs(5))
                .session_duration(now),
            Duration::ZERO
        );
    }
}
