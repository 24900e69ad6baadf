/// 自适应域名检查器
///
/// 结合静态域名列表与后台连通性探测，判定目标主机走代理还是直连。
/// 静态列表启动时加载，此后只读；探测计数由后台任务异步累积，
/// 路由判定同步读取当前计数，不等待探测完成。
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 探测停止阈值：成功或失败累计到该值后按规则停止探测
const MIN_PROBE_COUNT: u32 = 5;

/// 检查器配置
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// 被墙域名列表文件
    pub blocked_file: Option<PathBuf>,
    /// 直连域名列表文件
    pub direct_file: Option<PathBuf>,
    /// 重新探测间隔
    pub probe_interval: Duration,
    /// 探测拨号超时
    pub dial_timeout: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            blocked_file: None,
            direct_file: None,
            probe_interval: Duration::from_secs(5),
            dial_timeout: Duration::from_millis(3000),
        }
    }
}

/// 一个被跟踪主机的探测状态
#[derive(Debug, Clone)]
pub struct CheckerEntry {
    /// 是否为 CONNECT 隧道请求
    pub is_https: bool,
    /// 首次看到的请求方法
    pub method: String,
    /// 首次看到的请求 URL（明文探测目标）
    pub url: String,
    /// 不含端口的主机名
    pub domain: String,
    /// host:port，作为跟踪键
    pub host: String,
    /// 首次看到的请求体（仅作记录）
    pub payload: Vec<u8>,
    /// 探测成功次数
    pub success_count: u32,
    /// 探测失败次数
    pub fail_count: u32,
}

/// 域名集合，从文件加载后只读
///
/// 文件为 UTF-8 文本，一行一个域名，空行与首尾空白忽略
pub struct DomainSet {
    domains: HashSet<String>,
}

impl DomainSet {
    /// 创建空集合
    pub fn empty() -> Self {
        Self {
            domains: HashSet::new(),
        }
    }

    /// 从文件加载；文件缺失或不可读时记录日志并返回空集合
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to load domain list {:?}: {}", path, e);
                return Self::empty();
            }
        };

        let domains: HashSet<String> = content
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect();

        Self { domains }
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// 后缀匹配：从可注册域名开始逐级向左加宽
    ///
    /// 例如 host 为 a.b.example.com 时依次检查 example.com、
    /// b.example.com、a.b.example.com，命中即返回 true。
    /// 少于两段的主机名不参与匹配；无法解析的 host 视为命中。
    pub fn matches_host(&self, host: &str) -> bool {
        let hostname = match url::Url::parse(&format!("http://{}", host)) {
            Ok(u) => match u.host_str() {
                Some(h) => h.to_string(),
                None => return true,
            },
            Err(e) => {
                warn!("Domain check, host parse err: {}", e);
                return true;
            }
        };

        let labels: Vec<&str> = hostname.split('.').collect();
        if labels.len() < 2 {
            return false;
        }

        let mut candidate = labels[labels.len() - 1].to_string();
        for label in labels[..labels.len() - 1].iter().rev() {
            candidate = format!("{}.{}", label, candidate);
            if self.domains.contains(&candidate) {
                return true;
            }
        }
        false
    }
}

/// 探测接口：拨号与 HTTP GET 检查
#[async_trait]
pub trait Prober: Send + Sync {
    /// 对 host:port 做一次 TCP 连通性检查，连上即断开
    async fn probe_connect(&self, host: &str, timeout: Duration) -> Result<()>;

    /// 对 URL 做一次 HTTP GET，只关心传输层是否成功
    async fn probe_get(&self, url: &str, timeout: Duration) -> Result<()>;
}

/// 基于真实网络的探测实现
pub struct NetProber {
    client: reqwest::Client,
}

impl NetProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for NetProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn probe_connect(&self, host: &str, timeout: Duration) -> Result<()> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(host))
            .await
            .with_context(|| format!("Connect probe timeout for {}", host))?
            .with_context(|| format!("Connect probe failed for {}", host))?;
        drop(stream);
        Ok(())
    }

    async fn probe_get(&self, url: &str, timeout: Duration) -> Result<()> {
        // 任何 HTTP 状态码都算连通，只有传输层错误算失败
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET probe failed for {}", url))?;
        Ok(())
    }
}

/// 自适应域名检查器
pub struct DomainChecker {
    entries: RwLock<HashMap<String, CheckerEntry>>,
    blocked: DomainSet,
    direct: DomainSet,
    probe_interval: Duration,
    dial_timeout: Duration,
    prober: Arc<dyn Prober>,
    shutdown: CancellationToken,
}

impl DomainChecker {
    /// 创建检查器并加载静态域名列表
    pub fn new(config: &CheckerConfig, prober: Arc<dyn Prober>) -> Self {
        let blocked = config
            .blocked_file
            .as_deref()
            .map(DomainSet::load)
            .unwrap_or_else(DomainSet::empty);
        let direct = config
            .direct_file
            .as_deref()
            .map(DomainSet::load)
            .unwrap_or_else(DomainSet::empty);

        if !blocked.is_empty() {
            info!("Blocked file loaded, domains: {}", blocked.len());
        }
        if !direct.is_empty() {
            info!("Direct file loaded, domains: {}", direct.len());
        }

        Self {
            entries: RwLock::new(HashMap::new()),
            blocked,
            direct,
            probe_interval: config.probe_interval,
            dial_timeout: config.dial_timeout,
            prober,
            shutdown: CancellationToken::new(),
        }
    }

    /// 启动后台探测循环
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.probe_interval);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => self.clone().sweep(),
                }
            }
            debug!("Domain checker probe loop exited");
        });
    }

    /// 停止后台探测循环
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// 登记新看到的主机，等待后台探测
    ///
    /// 静态列表命中的主机不登记；非隧道请求只跟踪 GET；
    /// 同一主机只保留第一次登记的条目
    pub fn add(&self, host: &str, is_https: bool, method: &str, url: &str, payload: &[u8]) {
        if self.direct.matches_host(host) || self.blocked.matches_host(host) {
            return;
        }
        if !is_https && !method.eq_ignore_ascii_case("get") {
            return;
        }

        let domain = host.split(':').next().unwrap_or(host).to_string();
        let mut entries = self.entries.write();
        entries.entry(host.to_string()).or_insert_with(|| {
            debug!("Tracking new host {}", host);
            CheckerEntry {
                is_https,
                method: method.to_string(),
                url: url.to_string(),
                domain,
                host: host.to_string(),
                payload: payload.to_vec(),
                success_count: 0,
                fail_count: 0,
            }
        });
    }

    /// 判定主机是否走代理
    ///
    /// 返回 (blocked, fail_count, success_count)；
    /// 未知主机默认走代理
    pub fn is_blocked(&self, host: &str) -> (bool, u32, u32) {
        if self.blocked.matches_host(host) {
            return (true, 0, 0);
        }
        if self.direct.matches_host(host) {
            return (false, 0, 0);
        }

        let entries = self.entries.read();
        match entries.get(host) {
            Some(entry) => (
                entry.fail_count >= entry.success_count,
                entry.fail_count,
                entry.success_count,
            ),
            None => (true, 0, 0),
        }
    }

    /// 读取某主机的跟踪条目快照
    pub fn entry(&self, host: &str) -> Option<CheckerEntry> {
        self.entries.read().get(host).cloned()
    }

    /// 当前跟踪主机数
    pub fn tracked_count(&self) -> usize {
        self.entries.read().len()
    }

    /// 条目是否还需要探测
    ///
    /// 成功或失败累计到阈值且成功占优时停止；
    /// 主机已被静态分类时停止；其余情况无限期继续
    fn needs_probe(&self, entry: &CheckerEntry) -> bool {
        if (entry.success_count >= MIN_PROBE_COUNT && entry.success_count > entry.fail_count)
            || (entry.fail_count >= MIN_PROBE_COUNT && entry.success_count > entry.fail_count)
            || self.direct.matches_host(&entry.host)
            || self.blocked.matches_host(&entry.host)
        {
            return false;
        }
        true
    }

    /// 一轮探测：对所有待探测条目各启动一个独立探测任务
    fn sweep(self: Arc<Self>) {
        let due: Vec<CheckerEntry> = {
            let entries = self.entries.read();
            entries
                .values()
                .filter(|e| self.needs_probe(e))
                .cloned()
                .collect()
        };

        for entry in due {
            let checker = self.clone();
            tokio::spawn(async move {
                let result = if entry.is_https {
                    checker
                        .prober
                        .probe_connect(&entry.host, checker.dial_timeout)
                        .await
                } else {
                    checker.prober.probe_get(&entry.url, checker.dial_timeout).await
                };

                let mut entries = checker.entries.write();
                if let Some(e) = entries.get_mut(&entry.host) {
                    match result {
                        Ok(()) => e.success_count += 1,
                        Err(err) => {
                            debug!("Probe failed for {}: {}", entry.host, err);
                            e.fail_count += 1;
                        }
                    }
                }
            });
        }
    }
}
