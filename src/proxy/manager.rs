//! Round-robin with health tracking and one-step failover across servers
//! that expose the same capabilities.

use {
    super::{
        factory::McpProxyFactory, prompt::McpPromptProxy, resource::McpResourceProxy,
        tool::McpToolProxy,
    },
    crate::{
        config::ManagerConfig,
        error::{ClientError, ClientResult},
        logging,
        protocol::types::{CallToolResult, GetPromptResult, ResourceContents},
    },
    dashmap::DashMap,
    serde_json::{Map, Value},
    std::{
        future::Future,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
    },
    tokio::{task::JoinHandle, time::MissedTickBehavior},
    tracing::{debug, warn},
};

struct Endpoint {
    address: String,
    healthy: AtomicBool,
}

/// Failures that may not recur on another endpoint.
fn fails_over(error: &ClientError) -> bool {
    matches!(error, ClientError::Connection(_) | ClientError::Execution(_))
}

/// Only an unreachable endpoint leaves rotation. A tool failing remotely
/// says nothing about the endpoint's other tools.
fn marks_unhealthy(error: &ClientError) -> bool {
    matches!(error, ClientError::Connection(_))
}

pub struct McpProxyManager {
    factory: Arc<McpProxyFactory>,
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    config: ManagerConfig,
    tools: DashMap<(String, String), Arc<McpToolProxy>>,
    resources: DashMap<String, Arc<McpResourceProxy>>,
    prompts: DashMap<String, Arc<McpPromptProxy>>,
    health_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl McpProxyManager {
    pub fn new<I, S>(factory: Arc<McpProxyFactory>, addresses: I, config: ManagerConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            factory,
            endpoints: addresses
                .into_iter()
                .map(|address| Endpoint {
                    address: address.into(),
                    healthy: AtomicBool::new(true),
                })
                .collect(),
            cursor: AtomicUsize::new(0),
            config,
            tools: DashMap::new(),
            resources: DashMap::new(),
            prompts: DashMap::new(),
            health_task: parking_lot::Mutex::new(None),
        }
    }

    /// Every endpoint with its current health.
    pub fn endpoints(&self) -> Vec<(String, bool)> {
        self.endpoints
            .iter()
            .map(|e| (e.address.clone(), e.healthy.load(Ordering::Acquire)))
            .collect()
    }

    pub fn is_healthy(&self, address: &str) -> Option<bool> {
        self.endpoints
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.healthy.load(Ordering::Acquire))
    }

    fn mark(&self, index: usize, healthy: bool) {
        let endpoint = &self.endpoints[index];
        let was = endpoint.healthy.swap(healthy, Ordering::AcqRel);
        if was != healthy {
            logging::log_endpoint_health(&endpoint.address, healthy);
        }
    }

    /// Endpoint indices to try for one call, starting at the next
    /// round-robin position. Unhealthy endpoints are skipped unless all
    /// of them are unhealthy.
    fn rotation(&self) -> Vec<usize> {
        let n = self.endpoints.len();
        if n == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        let rotated: Vec<usize> = (0..n).map(|i| (start + i) % n).collect();
        let healthy: Vec<usize> = rotated
            .iter()
            .copied()
            .filter(|&i| self.endpoints[i].healthy.load(Ordering::Acquire))
            .collect();
        if healthy.is_empty() {
            debug!("No healthy endpoints, trying all");
            rotated
        } else {
            healthy
        }
    }

    /// Run `call` against the selected endpoint, and once more against the
    /// next one when the first fails with a connection or execution error.
    /// Only connection errors mark the endpoint unhealthy.
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> ClientResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut last_error = None;
        for index in self.rotation().into_iter().take(2) {
            let address = self.endpoints[index].address.clone();
            match call(address.clone()).await {
                Ok(value) => {
                    self.mark(index, true);
                    return Ok(value);
                }
                Err(e) if fails_over(&e) => {
                    warn!(operation, address = %address, error = %e, "Call failed, failing over");
                    if marks_unhealthy(&e) {
                        self.mark(index, false);
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ClientError::Connection("no endpoints configured".to_string())))
    }

    async fn tool_proxy(&self, address: &str, name: &str) -> ClientResult<Arc<McpToolProxy>> {
        let key = (address.to_string(), name.to_string());
        if let Some(proxy) = self.tools.get(&key) {
            return Ok(proxy.value().clone());
        }
        let proxy = Arc::new(self.factory.create_tool_proxy(address, name).await?);
        Ok(self.tools.entry(key).or_insert(proxy).value().clone())
    }

    async fn resource_proxy(&self, address: &str) -> ClientResult<Arc<McpResourceProxy>> {
        if let Some(proxy) = self.resources.get(address) {
            return Ok(proxy.value().clone());
        }
        let proxy = Arc::new(self.factory.create_resource_proxy(address, "managed").await?);
        Ok(self
            .resources
            .entry(address.to_string())
            .or_insert(proxy)
            .value()
            .clone())
    }

    async fn prompt_proxy(&self, address: &str) -> ClientResult<Arc<McpPromptProxy>> {
        if let Some(proxy) = self.prompts.get(address) {
            return Ok(proxy.value().clone());
        }
        let proxy = Arc::new(self.factory.create_prompt_proxy(address, "managed").await?);
        Ok(self
            .prompts
            .entry(address.to_string())
            .or_insert(proxy)
            .value()
            .clone())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<CallToolResult> {
        self.with_failover("tools/call", |address| {
            let arguments = arguments.clone();
            async move {
                let proxy = self.tool_proxy(&address, name).await?;
                proxy.execute(arguments).await
            }
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> ClientResult<ResourceContents> {
        self.with_failover("resources/read", |address| async move {
            let proxy = self.resource_proxy(&address).await?;
            proxy.read(uri).await
        })
        .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ClientResult<GetPromptResult> {
        self.with_failover("prompts/get", |address| {
            let arguments = arguments.clone();
            async move {
                let proxy = self.prompt_proxy(&address).await?;
                proxy.render(name, arguments).await
            }
        })
        .await
    }

    /// Ping every endpoint within the health-check timeout. Failed
    /// endpoints leave rotation and lose their pooled connection; answering
    /// ones rejoin. Returns each address with its new health.
    pub async fn check_health(&self) -> Vec<(String, bool)> {
        let mut report = Vec::with_capacity(self.endpoints.len());
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            let pool = self.factory.pool();
            let ping = async {
                let client = pool.get(&endpoint.address).await?;
                client.ping().await
            };
            let healthy = matches!(
                tokio::time::timeout(self.config.health_check_timeout, ping).await,
                Ok(Ok(()))
            );
            if !healthy {
                pool.evict(&endpoint.address).await;
            }
            self.mark(index, healthy);
            report.push((endpoint.address.clone(), healthy));
        }
        report
    }

    /// Run [`check_health`](Self::check_health) every
    /// `health_check_interval` until stopped or the manager is dropped.
    pub fn start_health_checks(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let interval = self.config.health_check_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let report = manager.check_health().await;
                debug!(?report, "Health check finished");
            }
        });
        if let Some(previous) = self.health_task.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn stop_health_checks(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.abort();
        }
    }

    /// Stop health checks and close every pooled connection.
    pub async fn close(&self) {
        self.stop_health_checks();
        self.tools.clear();
        self.resources.clear();
        self.prompts.clear();
        self.factory.close().await;
    }
}

impl Drop for McpProxyManager {
    fn drop(&mut self) {
        if let Some(task) = self.health_task.get_mut().take() {
            task.abort();
        }
    }
}
