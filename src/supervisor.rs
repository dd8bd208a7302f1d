//! Owns all mock server instances and coordinates their shutdown.

use crate::config::ServerConfig;
use crate::error::Error;
use crate::instance::MockServerInstance;
use crate::logging::LogHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How often [`Supervisor::wait_until_done`] checks the instances.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How waiting for the instances ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every instance closed on its own or by control command.
    Completed,
    /// The shutdown signal fired; remaining instances were force-closed.
    Interrupted,
}

/// Starts one [`MockServerInstance`] per configured server and owns them.
pub struct Supervisor {
    instances: Vec<Arc<MockServerInstance>>,
    tasks: Vec<JoinHandle<Result<(), Error>>>,
    log: LogHandle,
    poll_interval: Duration,
}

impl Supervisor {
    /// Bind every configured server, then start their accept loops.
    ///
    /// All sockets are bound before any instance starts serving, so an
    /// unbindable port fails the whole start without side effects.
    pub async fn start(configs: &[ServerConfig], log: LogHandle) -> Result<Self, Error> {
        let mut bound = Vec::with_capacity(configs.len());
        for config in configs {
            bound.push(MockServerInstance::bind(config, log.clone()).await?);
        }

        let mut instances = Vec::with_capacity(bound.len());
        let mut tasks = Vec::with_capacity(bound.len());
        for (instance, listener) in bound {
            let serving = Arc::clone(&instance).serve(listener);
            let fault_log = log.clone();
            tasks.push(tokio::spawn(async move {
                let result = serving.await;
                if let Err(e) = &result {
                    fault_log.log(format!("*** Error: {}", e));
                }
                result
            }));
            instances.push(instance);
        }

        info!(servers = instances.len(), "Mock servers started");
        Ok(Self {
            instances,
            tasks,
            log,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn instances(&self) -> &[Arc<MockServerInstance>] {
        &self.instances
    }

    pub fn all_closed(&self) -> bool {
        self.instances.iter().all(|instance| instance.is_closed())
    }

    /// Force-close every instance that is still open. Returns how many
    /// were closed by this sweep.
    pub fn close_all(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.close())
            .count()
    }

    /// Poll until every instance is closed or `shutdown` completes.
    ///
    /// On shutdown, all still-open instances are closed before returning.
    pub async fn wait_until_done<F>(&self, shutdown: F) -> Outcome
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if self.all_closed() {
                self.log.log("All servers have finished...");
                return Outcome::Completed;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    self.log.log("Shutting down...");
                    let closed = self.close_all();
                    debug!(closed, "Forced close sweep done");
                    return Outcome::Interrupted;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Wait for the accept loops to exit.
    pub async fn join(self) {
        for (instance, task) in self.instances.iter().zip(self.tasks) {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    server = %instance.name(),
                    error = %e,
                    kind = e.as_label(),
                    "Server failed"
                ),
                Err(e) => error!(server = %instance.name(), error = %e, "Server task panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogSink;

    fn server(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            port: 0,
            address: "127.0.0.1".to_string(),
            schema: "http".to_string(),
            requests: vec![],
            requests_in_order: true,
        }
    }

    #[tokio::test]
    async fn test_completes_when_all_closed() {
        let sink = LogSink::spawn(tokio::io::sink());
        let supervisor = Supervisor::start(&[server("a"), server("b")], sink.handle())
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        assert_eq!(supervisor.instances().len(), 2);
        assert!(!supervisor.all_closed());

        for instance in supervisor.instances() {
            let instance = Arc::clone(instance);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                instance.close();
            });
        }

        let outcome = supervisor.wait_until_done(std::future::pending()).await;
        assert_eq!(outcome, Outcome::Completed);
        assert!(supervisor.all_closed());
        supervisor.join().await;
        sink.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let sink = LogSink::open(&path).await.unwrap();
        let supervisor = Supervisor::start(&[server("a"), server("b")], sink.handle())
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));

        supervisor.instances()[0].close();
        let outcome = supervisor
            .wait_until_done(tokio::time::sleep(Duration::from_millis(30)))
            .await;
        assert_eq!(outcome, Outcome::Interrupted);
        assert!(supervisor.all_closed());
        assert_eq!(supervisor.close_all(), 0);

        supervisor.join().await;
        sink.shutdown().await.unwrap();

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.contains("Shutting down..."));
        assert_eq!(log.matches("'a': Closing socket.").count(), 1);
        assert_eq!(log.matches("'b': Closing socket.").count(), 1);
    }

    #[tokio::test]
    async fn test_start_fails_on_taken_port() {
        let sink = LogSink::spawn(tokio::io::sink());
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut conflicting = server("b");
        conflicting.port = taken.local_addr().unwrap().port();

        let err = Supervisor::start(&[server("a"), conflicting], sink.handle())
            .await
            .err()
            .unwrap();
        assert_eq!(err.as_label(), "bind");
        sink.shutdown().await.unwrap();
    }
}
