//! Shared test helpers: a scripted upstream that plays one behavior per
//! accepted connection and counts how many connections it saw.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::fetcher::{FetcherConfig, StatsFetcher};

/// One scripted upstream behavior per accepted connection.
pub(crate) enum Step {
    /// Accept, then close without responding (transport failure).
    Hangup,
    /// Respond 200 with the given JSON body.
    Json(&'static str),
    /// Respond with a non-2xx status and body.
    Status(u16, &'static str),
    /// Respond 200 with a body that is not valid JSON.
    Garbage,
}

/// Start a scripted upstream. Anything past the end of the script gets a
/// hangup. Returns the bound address and the connection counter.
pub(crate) async fn scripted_upstream(steps: Vec<Step>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let script = Arc::new(Mutex::new(VecDeque::from(steps)));

    let hits_srv = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            hits_srv.fetch_add(1, Ordering::SeqCst);
            let step = script.lock().await.pop_front();
            match step {
                None | Some(Step::Hangup) => {
                    drop(stream);
                }
                Some(Step::Json(body)) => {
                    respond(&mut stream, 200, "OK", body).await;
                }
                Some(Step::Status(code, body)) => {
                    respond(&mut stream, code, "Error", body).await;
                }
                Some(Step::Garbage) => {
                    respond(&mut stream, 200, "OK", "not json").await;
                }
            }
        }
    });

    (addr, hits)
}

async fn respond(stream: &mut tokio::net::TcpStream, code: u16, reason: &str, body: &str) {
    let mut buf = [0u8; 4096];
    let _ = stream.read(&mut buf).await;
    let resp = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Fetcher pointed at a scripted upstream, with near-zero backoff so retry
/// tests run fast.
pub(crate) fn test_fetcher(addr: SocketAddr) -> StatsFetcher {
    let mut cfg = FetcherConfig::new(format!("http://{addr}"));
    cfg.timeout = Duration::from_secs(2);
    cfg.backoff_base = Duration::from_millis(1);
    cfg.backoff_cap = Duration::from_millis(4);
    StatsFetcher::new(cfg)
}
