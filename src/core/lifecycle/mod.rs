use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Start,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_init(&self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Drives attached components through init and start in attach order, and
/// shuts them down in reverse.
pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Arc<dyn LifecycleComponent>>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Init,
            components: Vec::new(),
        }
    }

    pub fn attach(&mut self, component: Arc<dyn LifecycleComponent>) {
        self.components.push(component);
    }

    #[cfg(test)]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.on_init().await?;
        }

        info!("Lifecycle Phase: Start");
        self.state = LifecycleState::Start;
        for comp in &self.components {
            comp.on_start().await?;
        }

        info!("Lifecycle Phase: Ready");
        self.state = LifecycleState::Ready;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        if self.state == LifecycleState::Shutdown {
            return Ok(());
        }
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in self.components.iter().rev() {
            if let Err(e) = comp.on_shutdown().await {
                warn!(component = comp.name(), "Component shutdown error: {}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn on_init(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:init", self.name));
            if self.fail_init {
                bail!("init failed");
            }
            Ok(())
        }
        async fn on_start(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:start", self.name));
            Ok(())
        }
        async fn on_shutdown(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:shutdown", self.name));
            bail!("ignored")
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail_init: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            fail_init,
        })
    }

    #[tokio::test]
    async fn phases_run_in_order_and_shutdown_reverses() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        manager.attach(recorder("a", &log, false));
        manager.attach(recorder("b", &log, false));

        manager.start().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Ready);
        manager.shutdown().await.unwrap();
        manager.shutdown().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Shutdown);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:init", "b:init", "a:start", "b:start", "b:shutdown", "a:shutdown"
            ]
        );
    }

    #[tokio::test]
    async fn failed_init_stops_startup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        manager.attach(recorder("a", &log, true));
        manager.attach(recorder("b", &log, false));

        assert!(manager.start().await.is_err());
        assert_eq!(*log.lock().unwrap(), vec!["a:init"]);
    }
}
