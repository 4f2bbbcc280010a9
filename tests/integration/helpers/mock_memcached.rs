//! Mock memcached server for probe tests
//!
//! Answers the text `version` command and the binary Version and SASL
//! PLAIN StartAuth requests, which is all a connection probe sends.
//! It can also drop connections, delay answers and record what it saw.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

pub const MOCK_VERSION: &str = "1.6.21-mock";

const REQUEST_MAGIC: u8 = 0x80;
const RESPONSE_MAGIC: u8 = 0x81;
const OPCODE_VERSION: u8 = 0x0b;
const OPCODE_START_AUTH: u8 = 0x21;
const STATUS_AUTH_ERROR: u16 = 0x20;
const STATUS_UNKNOWN_COMMAND: u16 = 0x81;

/// How the mock answers
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum ResponseMode {
    Normal,
    /// Close the connection without answering
    Failure,
    /// Wait before every answer
    Slow(Duration),
    /// Reply to text commands with this raw line
    Custom(String),
}

#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub connections: usize,
    pub text_versions: usize,
    pub binary_versions: usize,
    pub auth_attempts: usize,
}

/// Request as seen by the mock, e.g. `version` or `binary:auth PLAIN user`
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub command: String,
}

#[derive(Clone)]
struct Shared {
    response_mode: Arc<Mutex<ResponseMode>>,
    credentials: Option<(String, String)>,
    stats: Arc<Mutex<MockStats>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockMemcached {
    addr: String,
    shared: Shared,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockMemcached {
    pub async fn new() -> std::io::Result<Self> {
        MockMemcachedBuilder::new().build().await
    }

    /// `host:port` the mock listens on
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// DSN pointing at this mock, with optional `user:pass@` userinfo
    pub fn dsn(&self, userinfo: Option<&str>) -> String {
        match userinfo {
            Some(userinfo) => format!("memcached://{}@{}", userinfo, self.addr),
            None => format!("memcached://{}", self.addr),
        }
    }

    #[allow(dead_code)]
    pub fn set_response_mode(&self, mode: ResponseMode) {
        *self.shared.response_mode.lock().unwrap() = mode;
    }

    pub fn stats(&self) -> MockStats {
        self.shared.stats.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn shutdown(self) {
        if let Some(tx) = self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}

pub struct MockMemcachedBuilder {
    bind_addr: String,
    response_mode: ResponseMode,
    credentials: Option<(String, String)>,
}

impl MockMemcachedBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            response_mode: ResponseMode::Normal,
            credentials: None,
        }
    }

    pub fn response_mode(mut self, mode: ResponseMode) -> Self {
        self.response_mode = mode;
        self
    }

    /// Require these SASL PLAIN credentials
    pub fn sasl(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub async fn build(self) -> std::io::Result<MockMemcached> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let addr = listener.local_addr()?.to_string();

        let shared = Shared {
            response_mode: Arc::new(Mutex::new(self.response_mode)),
            credentials: self.credentials,
            stats: Arc::new(Mutex::new(MockStats::default())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _)) => {
                                accept_shared.stats.lock().unwrap().connections += 1;
                                let shared = accept_shared.clone();
                                tokio::spawn(async move {
                                    let _ = handle_connection(stream, shared).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        Ok(MockMemcached {
            addr,
            shared,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

impl Default for MockMemcachedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn record(shared: &Shared, command: String) {
    shared
        .requests
        .lock()
        .unwrap()
        .push(RecordedRequest { command });
}

async fn handle_connection(stream: TcpStream, shared: Shared) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);

    loop {
        let first = match stream.fill_buf().await {
            Ok([]) | Err(_) => break,
            Ok(buf) => buf[0],
        };

        let mode = shared.response_mode.lock().unwrap().clone();
        match mode {
            ResponseMode::Failure => break,
            ResponseMode::Slow(delay) => sleep(delay).await,
            _ => {}
        }

        if first == REQUEST_MAGIC {
            handle_binary(&mut stream, &shared).await?;
        } else {
            let mut line = String::new();
            if stream.read_line(&mut line).await? == 0 {
                break;
            }
            let command = line.trim().to_string();
            record(&shared, command.clone());

            let response = match mode {
                ResponseMode::Custom(response) => response,
                _ => text_response(&command, &shared),
            };
            stream.get_mut().write_all(response.as_bytes()).await?;

            if command.eq_ignore_ascii_case("quit") {
                break;
            }
        }
    }

    Ok(())
}

fn text_response(command: &str, shared: &Shared) -> String {
    match command.split_whitespace().next().map(str::to_uppercase).as_deref() {
        Some("VERSION") => {
            shared.stats.lock().unwrap().text_versions += 1;
            format!("VERSION {}\r\n", MOCK_VERSION)
        }
        Some("QUIT") => String::new(),
        _ => "ERROR\r\n".to_string(),
    }
}

async fn handle_binary(stream: &mut BufReader<TcpStream>, shared: &Shared) -> std::io::Result<()> {
    let mut header = [0u8; 24];
    stream.read_exact(&mut header).await?;
    let opcode = header[1];
    let key_length = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_length = header[4] as usize;
    let body_length = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;

    let mut body = vec![0u8; body_length];
    stream.read_exact(&mut body).await?;
    let key = body
        .get(extras_length..extras_length + key_length)
        .unwrap_or_default();
    let value = body.get(extras_length + key_length..).unwrap_or_default();

    let (status, reply) = match opcode {
        OPCODE_VERSION => {
            record(shared, "binary:version".to_string());
            shared.stats.lock().unwrap().binary_versions += 1;
            (0, MOCK_VERSION.as_bytes().to_vec())
        }
        OPCODE_START_AUTH => {
            // PLAIN payload is "authzid\0username\0password"
            let payload = String::from_utf8_lossy(value).to_string();
            let mut parts = payload.split('\0').skip(1);
            let username = parts.next().unwrap_or_default().to_string();
            let password = parts.next().unwrap_or_default().to_string();

            record(
                shared,
                format!("binary:auth {} {}", String::from_utf8_lossy(key), username),
            );
            shared.stats.lock().unwrap().auth_attempts += 1;

            let accepted = match &shared.credentials {
                Some((user, pass)) => *user == username && *pass == password,
                None => true,
            };
            if accepted {
                (0, b"Authenticated".to_vec())
            } else {
                (STATUS_AUTH_ERROR, b"Auth failure".to_vec())
            }
        }
        other => {
            record(shared, format!("binary:{:#04x}", other));
            (STATUS_UNKNOWN_COMMAND, b"Unknown command".to_vec())
        }
    };

    let mut response = Vec::with_capacity(24 + reply.len());
    response.push(RESPONSE_MAGIC);
    response.push(opcode);
    response.extend_from_slice(&0u16.to_be_bytes());
    response.push(0);
    response.push(0);
    response.extend_from_slice(&status.to_be_bytes());
    response.extend_from_slice(&(reply.len() as u32).to_be_bytes());
    response.extend_from_slice(&header[12..16]);
    response.extend_from_slice(&0u64.to_be_bytes());
    response.extend_from_slice(&reply);

    stream.get_mut().write_all(&response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_text_version() {
        let mock = MockMemcached::new().await.unwrap();
        let mut stream = TcpStream::connect(mock.addr()).await.unwrap();
        stream.write_all(b"version\r\n").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], format!("VERSION {}\r\n", MOCK_VERSION).as_bytes());
        mock.shutdown();
    }
}
