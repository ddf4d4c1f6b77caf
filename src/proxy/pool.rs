//! Client connections keyed by server address.

use {
    super::connector::Connector,
    crate::{
        client::McpClient,
        config::ClientConfig,
        error::{ClientError, ClientResult},
    },
    dashmap::DashMap,
    std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    tokio::sync::Mutex,
    tracing::{debug, info},
};

/// Pool entry for one address. `connecting` is held while that address
/// connects, so each address gets at most one client and other addresses
/// are never blocked by it.
#[derive(Default)]
struct Slot {
    connecting: Mutex<()>,
    client: parking_lot::Mutex<Option<Arc<McpClient>>>,
    last_used: AtomicU64,
}

impl Slot {
    fn live(&self) -> Option<Arc<McpClient>> {
        self.client
            .lock()
            .as_ref()
            .filter(|client| !client.is_closed())
            .cloned()
    }

    fn is_occupied(&self) -> bool {
        self.client.lock().is_some()
    }

    fn take(&self) -> Option<Arc<McpClient>> {
        self.client.lock().take()
    }
}

/// One client per address, shared by every proxy targeting it. Bounded
/// pools close the least recently used connection to admit a new address.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    max_connections: Option<usize>,
    slots: DashMap<String, Arc<Slot>>,
    clock: AtomicU64,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig, max_connections: Option<usize>) -> Self {
        Self {
            connector,
            config,
            max_connections,
            slots: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    fn slot(&self, address: &str) -> Arc<Slot> {
        self.slots.entry(address.to_string()).or_default().clone()
    }

    /// The live client for `address`, connecting if there is none or the
    /// previous one has closed.
    pub async fn get(&self, address: &str) -> ClientResult<Arc<McpClient>> {
        let slot = self.slot(address);
        slot.last_used
            .store(self.clock.fetch_add(1, Ordering::Relaxed) + 1, Ordering::Relaxed);
        if let Some(client) = slot.live() {
            return Ok(client);
        }

        let _connecting = slot.connecting.lock().await;
        // Someone else may have connected while we waited
        if let Some(client) = slot.live() {
            return Ok(client);
        }
        if slot.take().is_some() {
            debug!(address = %address, "Replacing closed pooled connection");
        }

        self.make_room(address).await;

        let transport = self
            .connector
            .connect(address)
            .await
            .map_err(|e| ClientError::Connection(format!("{address}: {e}")))?;
        let client = Arc::new(McpClient::connect(transport, self.config.clone()).await?);
        info!(address = %address, "Opened pooled connection");
        *slot.client.lock() = Some(client.clone());
        Ok(client)
    }

    /// Close least recently used connections until one more fits.
    async fn make_room(&self, address: &str) {
        let Some(max) = self.max_connections else {
            return;
        };
        loop {
            let occupied: Vec<(String, u64)> = self
                .slots
                .iter()
                .filter(|entry| entry.key() != address && entry.is_occupied())
                .map(|entry| (entry.key().clone(), entry.last_used.load(Ordering::Relaxed)))
                .collect();
            if occupied.len() < max.max(1) {
                return;
            }
            let Some((oldest, _)) = occupied.into_iter().min_by_key(|(_, used)| *used) else {
                return;
            };
            let evicted = self.slots.remove(&oldest).and_then(|(_, slot)| slot.take());
            if let Some(client) = evicted {
                info!(address = %oldest, "Evicting least recently used connection");
                client.close().await;
            }
        }
    }

    /// Close and forget the connection for `address`.
    pub async fn evict(&self, address: &str) -> bool {
        let removed = self.slots.remove(address).and_then(|(_, slot)| slot.take());
        match removed {
            Some(client) => {
                client.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.slots
            .get(address)
            .is_some_and(|slot| slot.is_occupied())
    }

    pub async fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn close_all(&self) {
        let addresses: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        for address in addresses {
            let removed = self.slots.remove(&address).and_then(|(_, slot)| slot.take());
            if let Some(client) = removed {
                debug!(address = %address, "Closing pooled connection");
                client.close().await;
            }
        }
    }
}
