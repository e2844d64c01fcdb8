//! Shared browser engine pool.
//!
//! At most one engine runs per pool. The first callers share one in-flight
//! launch; later requests reuse the engine through isolated contexts. A
//! reaper shuts the engine down after it has been idle for the configured
//! timeout, and the next request launches a fresh one.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> IdleClosing -> Uninitialized
//!        \______________\____________\______________\___> Closed
//! ```

use crate::config::{BrowserConfig, PoolConfig};
use crate::error::PoolError;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NoopRenderer, RenderContext, Renderer};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Launches one engine instance.
pub type EngineLauncher =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<dyn Renderer>>> + Send + Sync>;

type LaunchFuture = Shared<BoxFuture<'static, Result<Arc<dyn Renderer>, PoolError>>>;

enum PoolState {
    Uninitialized,
    Initializing(LaunchFuture),
    Ready(Engine),
    IdleClosing,
    Closed,
}

/// What a checkout does once the state lock is released.
enum Checkout<'a> {
    Join(LaunchFuture),
    Wait(tokio::sync::futures::Notified<'a>),
}

struct Engine {
    renderer: Arc<dyn Renderer>,
    active: usize,
    last_used: Instant,
}

/// Observable pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Uninitialized,
    Initializing,
    Ready { active: usize },
    IdleClosing,
    Closed,
}

/// Lazily launched, idle-reaped browser engine.
pub struct EnginePool {
    state: Mutex<PoolState>,
    changed: Notify,
    launcher: EngineLauncher,
    config: PoolConfig,
}

impl EnginePool {
    pub fn new(config: PoolConfig, launcher: EngineLauncher) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState::Uninitialized),
            changed: Notify::new(),
            launcher,
            config,
        })
    }

    /// A pool launching headless Chromium.
    pub fn chromium(browser: BrowserConfig, config: PoolConfig) -> Arc<Self> {
        let launcher: EngineLauncher = Arc::new(move || {
            let browser = browser.clone();
            async move {
                let renderer = ChromiumRenderer::launch(&browser).await?;
                Ok(Arc::new(renderer) as Arc<dyn Renderer>)
            }
            .boxed()
        });
        Self::new(config, launcher)
    }

    /// A pool for hosts without a browser. Every lease fails with a context
    /// error, so live scans report failure instead of hanging on a launch.
    pub fn without_browser(config: PoolConfig) -> Arc<Self> {
        let launcher: EngineLauncher =
            Arc::new(|| async { Ok(Arc::new(NoopRenderer) as Arc<dyn Renderer>) }.boxed());
        Self::new(config, launcher)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // State transitions never panic mid-update, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> PoolStatus {
        match &*self.lock() {
            PoolState::Uninitialized => PoolStatus::Uninitialized,
            PoolState::Initializing(_) => PoolStatus::Initializing,
            PoolState::Ready(engine) => PoolStatus::Ready {
                active: engine.active,
            },
            PoolState::IdleClosing => PoolStatus::IdleClosing,
            PoolState::Closed => PoolStatus::Closed,
        }
    }

    /// Open an isolated context on the shared engine, launching it if needed.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledContext, PoolError> {
        let renderer = self.checkout().await?;
        match renderer.new_context().await {
            Ok(context) => Ok(PooledContext {
                context: Some(context),
                pool: Arc::clone(self),
            }),
            Err(e) => {
                self.release();
                Err(PoolError::Context(format!("{e:#}")))
            }
        }
    }

    /// Reserve the engine for one lease.
    async fn checkout(&self) -> Result<Arc<dyn Renderer>, PoolError> {
        loop {
            let mut launched_here = false;
            let step = {
                let mut state = self.lock();
                match &mut *state {
                    PoolState::Closed => return Err(PoolError::Closed),
                    PoolState::Ready(engine) => {
                        engine.active += 1;
                        engine.last_used = Instant::now();
                        return Ok(Arc::clone(&engine.renderer));
                    }
                    PoolState::Initializing(launch) => Checkout::Join(launch.clone()),
                    PoolState::IdleClosing => Checkout::Wait(self.changed.notified()),
                    PoolState::Uninitialized => {
                        info!("launching browser engine");
                        let launch = (self.launcher)()
                            .map(|result| result.map_err(|e| PoolError::Launch(format!("{e:#}"))))
                            .boxed()
                            .shared();
                        *state = PoolState::Initializing(launch.clone());
                        launched_here = true;
                        Checkout::Join(launch)
                    }
                }
            };

            let launch = match step {
                Checkout::Join(launch) => launch,
                Checkout::Wait(notified) => {
                    notified.await;
                    continue;
                }
            };

            let outcome = launch.await;
            let mut state = self.lock();
            match outcome {
                Ok(renderer) => match &mut *state {
                    PoolState::Initializing(_) => {
                        *state = PoolState::Ready(Engine {
                            renderer: Arc::clone(&renderer),
                            active: 1,
                            last_used: Instant::now(),
                        });
                        drop(state);
                        self.changed.notify_waiters();
                        return Ok(renderer);
                    }
                    PoolState::Ready(engine) if same_engine(&engine.renderer, &renderer) => {
                        engine.active += 1;
                        engine.last_used = Instant::now();
                        return Ok(renderer);
                    }
                    PoolState::Closed if !launched_here => return Err(PoolError::Closed),
                    PoolState::Closed => {
                        drop(state);
                        // The pool no longer tracks this engine; its launcher shuts it down.
                        tokio::spawn(async move {
                            if let Err(e) = renderer.shutdown().await {
                                warn!("failed to shut down engine launched after close: {e:#}");
                            }
                        });
                        return Err(PoolError::Closed);
                    }
                    _ => continue,
                },
                Err(e) => {
                    if matches!(&*state, PoolState::Initializing(_)) {
                        *state = PoolState::Uninitialized;
                    }
                    drop(state);
                    self.changed.notify_waiters();
                    return Err(e);
                }
            }
        }
    }

    fn release(&self) {
        if let PoolState::Ready(engine) = &mut *self.lock() {
            engine.active = engine.active.saturating_sub(1);
            engine.last_used = Instant::now();
        }
    }

    /// Shut the engine down if it has no leases and has been idle past the
    /// timeout. Returns whether an engine was closed.
    pub async fn reap_idle(&self) -> bool {
        let renderer = {
            let mut state = self.lock();
            let renderer = match &*state {
                PoolState::Ready(engine)
                    if engine.active == 0
                        && engine.last_used.elapsed() >= self.config.idle_timeout() =>
                {
                    Arc::clone(&engine.renderer)
                }
                _ => return false,
            };
            *state = PoolState::IdleClosing;
            renderer
        };

        info!(
            idle_ms = self.config.idle_timeout_ms,
            "shutting down idle browser engine"
        );
        if let Err(e) = renderer.shutdown().await {
            warn!("idle engine shutdown failed: {e:#}");
        }

        {
            let mut state = self.lock();
            if matches!(&*state, PoolState::IdleClosing) {
                *state = PoolState::Uninitialized;
            }
        }
        self.changed.notify_waiters();
        true
    }

    /// Spawn the periodic idle check. The task ends once the pool is closed
    /// or dropped.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = self.config.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                if pool.status() == PoolStatus::Closed {
                    break;
                }
                pool.reap_idle().await;
            }
        })
    }

    /// Close the pool for good, shutting down a running engine.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock(), PoolState::Closed);
        self.changed.notify_waiters();

        if let PoolState::Ready(engine) = previous {
            if engine.active > 0 {
                warn!(active = engine.active, "closing engine with open contexts");
            }
            if let Err(e) = engine.renderer.shutdown().await {
                warn!("engine shutdown failed: {e:#}");
            }
        }
    }
}

fn same_engine(a: &Arc<dyn Renderer>, b: &Arc<dyn Renderer>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// One leased context. Close it with [`PooledContext::close`]; a lease that
/// is dropped instead (for example when its scan is cancelled) still returns
/// to the pool and its context is closed in the background.
pub struct PooledContext {
    context: Option<Box<dyn RenderContext>>,
    pool: Arc<EnginePool>,
}

impl PooledContext {
    pub fn context_mut(&mut self) -> &mut dyn RenderContext {
        self.context
            .as_deref_mut()
            .expect("lease holds its context until closed")
    }

    /// Close the context and return the lease.
    pub async fn close(mut self) -> anyhow::Result<()> {
        match self.context.take() {
            Some(context) => context.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        self.pool.release();

        let Some(context) = self.context.take() else {
            return;
        };
        debug!("lease dropped before close, closing its context");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = context.close().await {
                        warn!("failed to close abandoned context: {e:#}");
                    }
                });
            }
            Err(_) => warn!("no runtime left to close abandoned context"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{LiveDocument, Locator, NavigationResult, ResolvedElement};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeEngine {
        shutdowns: Arc<AtomicUsize>,
    }

    struct FakeContext;

    #[async_trait]
    impl LiveDocument for FakeContext {
        async fn url(&self) -> anyhow::Result<String> {
            Ok("about:blank".into())
        }
        async fn content(&self) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn resolve(&self, _: &Locator, _: Duration) -> anyhow::Result<ResolvedElement> {
            Ok(ResolvedElement::default())
        }
    }

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn navigate(&mut self, url: &str, _: Duration) -> anyhow::Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.into(),
                load_time_ms: 0,
            })
        }
        async fn title(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
        async fn screenshot(&self, _: i64, _: Duration) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn as_document(&self) -> &dyn LiveDocument {
            self
        }
        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Renderer for FakeEngine {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            Ok(Box::new(FakeContext))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    struct Counters {
        launches: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    fn fake_pool(fail_first: bool) -> (Arc<EnginePool>, Counters) {
        let launches = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let counters = Counters {
            launches: Arc::clone(&launches),
            shutdowns: Arc::clone(&shutdowns),
        };
        let launcher: EngineLauncher = Arc::new(move || {
            let launches = Arc::clone(&launches);
            let shutdowns = Arc::clone(&shutdowns);
            async move {
                let n = launches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                if fail_first && n == 0 {
                    anyhow::bail!("no chromium");
                }
                Ok(Arc::new(FakeEngine { shutdowns }) as Arc<dyn Renderer>)
            }
            .boxed()
        });
        (EnginePool::new(PoolConfig::default(), launcher), counters)
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_launch() {
        let (pool, counters) = fake_pool(false);

        let leases = futures::future::join_all((0..8).map(|_| pool.acquire())).await;
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status(), PoolStatus::Ready { active: 8 });

        for lease in leases {
            lease.unwrap().close().await.unwrap();
        }
        assert_eq!(pool.status(), PoolStatus::Ready { active: 0 });
    }

    #[tokio::test]
    async fn test_failed_launch_retries_next_time() {
        let (pool, counters) = fake_pool(true);

        assert!(matches!(pool.acquire().await, Err(PoolError::Launch(_))));
        assert_eq!(pool.status(), PoolStatus::Uninitialized);

        let lease = pool.acquire().await.unwrap();
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
        lease.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_engine_is_reaped_and_relaunched() {
        let (pool, counters) = fake_pool(false);

        let lease = pool.acquire().await.unwrap();
        assert!(!pool.reap_idle().await, "busy engine must stay up");
        lease.close().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!pool.reap_idle().await, "not idle long enough");

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert!(pool.reap_idle().await);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status(), PoolStatus::Uninitialized);

        pool.acquire().await.unwrap().close().await.unwrap();
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_closes_idle_engine() {
        let (pool, counters) = fake_pool(false);
        let reaper = pool.start_reaper();

        pool.acquire().await.unwrap().close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(6 * 60)).await;

        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(reaper.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scan_returns_its_lease() {
        let (pool, counters) = fake_pool(false);
        let scan = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move {
                let _lease = pool.acquire().await.unwrap();
                std::future::pending::<()>().await;
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.status(), PoolStatus::Ready { active: 1 });

        scan.abort();
        assert!(scan.await.unwrap_err().is_cancelled());
        assert_eq!(pool.status(), PoolStatus::Ready { active: 0 });

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        assert!(pool.reap_idle().await);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_launch_shuts_engine_down_once() {
        let (pool, counters) = fake_pool(false);
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
            })
            .collect();

        tokio::task::yield_now().await;
        assert_eq!(pool.status(), PoolStatus::Initializing);
        pool.shutdown().await;

        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_browserless_pool_fails_leases_and_stays_usable() {
        let pool = EnginePool::without_browser(PoolConfig::default());

        for _ in 0..2 {
            assert!(matches!(pool.acquire().await, Err(PoolError::Context(_))));
        }
        assert_eq!(pool.status(), PoolStatus::Ready { active: 0 });
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_leases() {
        let (pool, counters) = fake_pool(false);
        pool.acquire().await.unwrap().close().await.unwrap();

        pool.shutdown().await;
        assert_eq!(pool.status(), PoolStatus::Closed);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
