//! In-process mock PostgreSQL backend for integration tests.
//!
//! Grounded on the teacher's `tests/bdd` mock-backend helpers (a listener
//! thread replaying a scripted response sequence per accepted connection),
//! adapted to this crate's plain `#[tokio::test]` harness: one
//! `tokio::net::TcpListener` on an OS-assigned loopback port, one spawned
//! task per server, no BDD/cucumber feature surface since this crate has
//! none to exercise.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Replies `connect_response` to the client's StartupMessage (trust-style
/// auth only — no password round trip), then replies with each of
/// `query_responses` in order to successive simple-query dispatches. After
/// the script is exhausted the connection is left open until the client
/// disconnects. Shared by both the in-runtime (`MockServer::start`) and
/// dedicated-thread (`MockServer::spawn_thread`) variants below.
async fn serve(listener: TcpListener, connect_response: Vec<u8>, query_responses: Vec<Vec<u8>>) {
    let Ok((mut stream, _)) = listener.accept().await else {
        return;
    };

    // StartupMessage has no leading type byte: just a length then body.
    let mut len_buf = [0u8; 4];
    if stream.read_exact(&mut len_buf).await.is_err() {
        return;
    }
    let len = i32::from_be_bytes(len_buf);
    let mut body = vec![0u8; (len - 4).max(0) as usize];
    if stream.read_exact(&mut body).await.is_err() {
        return;
    }

    if stream.write_all(&connect_response).await.is_err() {
        return;
    }
    if stream.flush().await.is_err() {
        return;
    }

    for response in query_responses {
        let mut code = [0u8; 1];
        if stream.read_exact(&mut code).await.is_err() {
            break;
        }
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = i32::from_be_bytes(len_buf);
        let mut body = vec![0u8; (len - 4).max(0) as usize];
        if stream.read_exact(&mut body).await.is_err() {
            break;
        }
        if stream.write_all(&response).await.is_err() {
            break;
        }
        if stream.flush().await.is_err() {
            break;
        }
    }

    let mut sink = [0u8; 1];
    let _ = stream.read(&mut sink).await;
}

/// A running mock backend, driven as a task on the caller's own Tokio
/// runtime. Use this from `#[tokio::test] async fn` tests that only ever
/// `.await` the driver's async API.
pub struct MockServer {
    pub addr: std::net::SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(connect_response: Vec<u8>, query_responses: Vec<Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock backend listener");
        let addr = listener.local_addr().expect("mock backend has no local addr");

        let task = tokio::spawn(serve(listener, connect_response, query_responses));

        MockServer { addr, _task: task }
    }

    pub fn connect_string(&self, extra: &str) -> String {
        format!(
            "host={} port={} {extra}",
            self.addr.ip(),
            self.addr.port()
        )
    }
}

/// A mock backend driven on its own dedicated OS thread with its own private
/// Tokio runtime, entirely independent of whatever runtime (if any) the
/// calling test thread is using.
///
/// `Connection::query_s`/`connect_s`/`Transaction::commit_s` each build and
/// block on a private single-threaded Tokio runtime (spec.md §5's "spin a
/// private event loop inside the calling thread"), and Tokio forbids
/// entering a runtime from a thread that is already inside one. A plain
/// `#[tokio::test]` function's body runs on a worker thread of the outer
/// test runtime, so calling `query_s` directly from one would itself trip
/// that restriction — tests exercising the synchronous API must run as plain
/// `#[test]` functions on an ordinary OS thread, with the mock backend's
/// runtime kept strictly separate on its own thread, exactly as this type
/// provides.
pub struct BlockingMockServer {
    pub addr: std::net::SocketAddr,
    _thread: std::thread::JoinHandle<()>,
}

impl BlockingMockServer {
    pub fn spawn_thread(connect_response: Vec<u8>, query_responses: Vec<Vec<u8>>) -> Self {
        let std_listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind mock backend listener");
        let addr = std_listener.local_addr().expect("mock backend has no local addr");
        std_listener
            .set_nonblocking(true)
            .expect("failed to set mock backend listener nonblocking");

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build mock backend runtime");
            runtime.block_on(async move {
                let listener = TcpListener::from_std(std_listener)
                    .expect("failed to adopt mock backend listener into Tokio");
                serve(listener, connect_response, query_responses).await;
            });
        });

        BlockingMockServer { addr, _thread: thread }
    }

    /// Spawn a mock backend that serves one connection script, then a second
    /// connection script, on two separate `accept()`s — for tests that drive
    /// a reconnect. `script` receives the plain `std::net::TcpListener` and
    /// runs entirely on the dedicated thread's own runtime.
    pub fn spawn_thread_with<F>(script: F) -> Self
    where
        F: FnOnce(std::net::TcpListener) + Send + 'static,
    {
        let std_listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind mock backend listener");
        let addr = std_listener.local_addr().expect("mock backend has no local addr");
        // `tokio::net::TcpListener::from_std` requires the socket already be
        // in non-blocking mode.
        std_listener
            .set_nonblocking(true)
            .expect("failed to set mock backend listener nonblocking");

        let thread = std::thread::spawn(move || script(std_listener));

        BlockingMockServer { addr, _thread: thread }
    }

    pub fn connect_string(&self, extra: &str) -> String {
        format!(
            "host={} port={} {extra}",
            self.addr.ip(),
            self.addr.port()
        )
    }
}

/// Backend message encoders — the inverse of `pgsql_driver::messages::wire`'s
/// parsers, kept test-local since production code never needs to *build*
/// backend messages.
pub mod backend_messages {
    fn framed(code: u8, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(code);
        out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    pub fn authentication_ok() -> Vec<u8> {
        framed(b'R', &0i32.to_be_bytes())
    }

    pub fn parameter_status(key: &str, value: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(key.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        framed(b'S', &body)
    }

    pub fn backend_key_data(process_id: i32, secret_key: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&process_id.to_be_bytes());
        body.extend_from_slice(&secret_key.to_be_bytes());
        framed(b'K', &body)
    }

    pub fn ready_for_query(status: u8) -> Vec<u8> {
        framed(b'Z', &[status])
    }

    pub fn row_description(names: &[&str]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(names.len() as i16).to_be_bytes());
        for name in names {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0i32.to_be_bytes()); // table oid
            body.extend_from_slice(&0i16.to_be_bytes()); // column attno
            body.extend_from_slice(&25i32.to_be_bytes()); // type oid (text)
            body.extend_from_slice(&(-1i16).to_be_bytes()); // type size
            body.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
            body.extend_from_slice(&0i16.to_be_bytes()); // format code
        }
        framed(b'T', &body)
    }

    pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(values.len() as i16).to_be_bytes());
        for value in values {
            match value {
                Some(v) => {
                    body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    body.extend_from_slice(v.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        framed(b'D', &body)
    }

    pub fn command_complete(tag: &str) -> Vec<u8> {
        let mut body = tag.as_bytes().to_vec();
        body.push(0);
        framed(b'C', &body)
    }

    pub fn error_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(b'S');
        body.extend_from_slice(severity.as_bytes());
        body.push(0);
        body.push(b'C');
        body.extend_from_slice(code.as_bytes());
        body.push(0);
        body.push(b'M');
        body.extend_from_slice(message.as_bytes());
        body.push(0);
        body.push(0); // terminator
        framed(b'E', &body)
    }

    /// Concatenates several framed backend messages into one scripted reply,
    /// for steps that need more than one message before the next read.
    pub fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
        parts.iter().flat_map(|p| p.iter().copied()).collect()
    }
}
