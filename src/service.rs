//! Whole-process run: log sink, supervisor, wait, sentinel.

use crate::config::ServiceConfig;
use crate::error::Error;
use crate::logging::LogSink;
use crate::supervisor::{Outcome, Supervisor};
use std::future::Future;
use std::time::Duration;
use tracing::error;

/// Run every configured server until all are closed or `shutdown` fires.
///
/// The log sink is stopped last, after the closing lines have been queued,
/// on the error path as well.
pub async fn run<F>(
    config: &ServiceConfig,
    poll_interval: Duration,
    shutdown: F,
) -> Result<Outcome, Error>
where
    F: Future<Output = ()>,
{
    let sink = LogSink::open(&config.logfile).await?;
    let log = sink.handle();
    log.log("*** Starting log for server mock-server run...");

    let supervisor = match Supervisor::start(&config.servers, log.clone()).await {
        Ok(supervisor) => supervisor.with_poll_interval(poll_interval),
        Err(e) => {
            log.log(e.to_string());
            stop_log(sink).await;
            return Err(e);
        }
    };

    let outcome = supervisor.wait_until_done(shutdown).await;
    supervisor.join().await;
    log.log("Done!");
    stop_log(sink).await;
    Ok(outcome)
}

async fn stop_log(sink: LogSink) {
    if let Err(e) = sink.shutdown().await {
        error!(error = %e, "Log writer failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio::sync::oneshot;

    const POLL: Duration = Duration::from_millis(20);

    /// Distinct ports that were free a moment ago.
    fn free_ports(n: usize) -> Vec<u16> {
        let listeners: Vec<_> = (0..n)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        listeners
            .iter()
            .map(|l| l.local_addr().unwrap().port())
            .collect()
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap()
    }

    fn config(logfile: &Path, servers: &str) -> ServiceConfig {
        let json = format!(
            r#"{{"logfile": {}, "servers": [{}]}}"#,
            serde_json::to_string(logfile).unwrap(),
            servers
        );
        ServiceConfig::from_json_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_single_ordered_server_completes() {
        let dir = tempfile::tempdir().unwrap();
        let logfile = dir.path().join("x.log");
        let port = free_ports(1)[0];
        let config = config(
            &logfile,
            &format!(
                r#"{{"name": "s1", "port": {}, "requests_in_order": true,
                     "requests": [{{"request": {{"req": "GET /a"}},
                                    "response": {{"status": 200, "body": ["ok"]}}}}]}}"#,
                port
            ),
        );

        let running = tokio::spawn(async move {
            run(&config, POLL, std::future::pending()).await
        });

        let url = format!("http://127.0.0.1:{}/a", port);
        let client = client();
        let mut response = None;
        for _ in 0..50 {
            match client.get(&url).send().await {
                Ok(res) => {
                    response = Some(res);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let res = response.expect("server never came up");
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "ok");

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(client.get(&url).send().await.is_err());

        let log = std::fs::read_to_string(&logfile).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert!(lines[0].ends_with("*** Starting log for server mock-server run..."));
        assert!(log.contains("'s1': [GET /a] - Resp: 200 (2)"));
        assert!(lines[lines.len() - 2].ends_with("All servers have finished..."));
        assert!(lines[lines.len() - 1].ends_with("Done!"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupt_with_concurrent_servers() {
        let dir = tempfile::tempdir().unwrap();
        let logfile = dir.path().join("x.log");
        let ports = free_ports(3);
        let servers: Vec<String> = ports
            .iter()
            .enumerate()
            .map(|(i, port)| {
                format!(
                    r#"{{"name": "u{}", "port": {}, "requests_in_order": false,
                         "requests": [{{"request": {{"req": "GET /ping"}},
                                        "response": {{"body": ["pong"]}}}}]}}"#,
                    i, port
                )
            })
            .collect();
        let config = config(&logfile, &servers.join(","));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(async move {
            run(&config, POLL, async move {
                let _ = stop_rx.await;
            })
            .await
        });

        let clients: Vec<_> = ports
            .iter()
            .map(|port| {
                let url = format!("http://127.0.0.1:{}/ping", port);
                tokio::spawn(async move {
                    let client = client();
                    let mut answered = 0;
                    while answered < 20 {
                        match client.get(&url).send().await {
                            Ok(res) => {
                                assert_eq!(res.status(), 200);
                                assert_eq!(res.text().await.unwrap(), "pong");
                                answered += 1;
                            }
                            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                        }
                    }
                })
            })
            .collect();
        for c in clients {
            c.await.unwrap();
        }

        stop_tx.send(()).unwrap();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Interrupted);

        let log = std::fs::read_to_string(&logfile).unwrap();
        let mut responses = 0;
        for line in log.lines() {
            let stamp: String = line.splitn(3, ' ').take(2).collect::<Vec<_>>().join(" ");
            assert!(
                chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.6f").is_ok(),
                "broken line: {:?}",
                line
            );
            if line.ends_with("[GET /ping] - Resp: 200 (4)") {
                responses += 1;
            }
        }
        assert_eq!(responses, 60);
        assert!(log.contains("Shutting down..."));
        for i in 0..3 {
            assert_eq!(log.matches(&format!("'u{}': Terminated.", i)).count(), 1);
        }
        assert!(log.trim_end().ends_with("Done!"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let logfile = dir.path().join("x.log");
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = config(
            &logfile,
            &format!(r#"{{"name": "s1", "port": {}, "requests": []}}"#, port),
        );

        let err = run(&config, POLL, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));

        let log = std::fs::read_to_string(&logfile).unwrap();
        assert!(log.contains("'s1': cannot listen on"));
    }

    #[tokio::test]
    async fn test_unwritable_logfile_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let logfile = dir.path().join("no-such-dir").join("x.log");
        let config = config(&logfile, r#"{"name": "s1", "port": 0, "requests": []}"#);

        let err = run(&config, POLL, std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::LogFile { .. }));
    }
}
