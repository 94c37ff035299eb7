//! 集成测试用的最小 HTTP 范围服务器
//!
//! 支持 HEAD（报告 Content-Length）和带 Range 头的 GET（206 + Content-Range），
//! 可注入两类故障：首次范围请求短读、限速写出。
//! 记录所有范围请求，测试用它断言续传只抓取剩余分片。

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// 故障注入与行为开关
#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// 每个范围的第一次请求只返回一半字节（Content-Length 同步缩短，
    /// 客户端侧表现为干净的短读而不是连接错误）
    pub short_read_first_attempt: bool,
    /// 每写出 16KB 暂停一次，用来把下载拖慢到可以中途取消/暂停
    pub throttle_per_16k: Option<Duration>,
}

/// 运行中的测试服务器句柄
pub struct RangeServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<(String, u64, u64)>>>,
}

impl RangeServer {
    /// 所有已收到的范围请求 (路径, start, end_incl)
    pub fn range_requests(&self) -> Vec<(String, u64, u64)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

/// 启动单文件服务器，路径为 `/file.bin`
#[allow(dead_code)]
pub fn start(body: Vec<u8>) -> RangeServer {
    start_multi(vec![("/file.bin", body)], RangeServerOptions::default())
}

/// 启动多文件服务器，每个路径一份内容
pub fn start_multi(files: Vec<(&str, Vec<u8>)>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();

    let bodies: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        files
            .into_iter()
            .map(|(path, body)| (path.to_string(), body))
            .collect(),
    );
    let requests: Arc<Mutex<Vec<(String, u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let attempts: Arc<Mutex<HashMap<(String, u64, u64), u32>>> =
        Arc::new(Mutex::new(HashMap::new()));

    {
        let bodies = bodies.clone();
        let requests = requests.clone();
        let attempts = attempts.clone();
        let opts = opts.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let bodies = bodies.clone();
                let requests = requests.clone();
                let attempts = attempts.clone();
                let opts = opts.clone();
                thread::spawn(move || {
                    handle_connection(stream, &bodies, &requests, &attempts, &opts);
                });
            }
        });
    }

    RangeServer {
        base_url: format!("http://127.0.0.1:{}", port),
        requests,
    }
}

fn handle_connection(
    mut stream: TcpStream,
    bodies: &HashMap<String, Vec<u8>>,
    requests: &Mutex<Vec<(String, u64, u64)>>,
    attempts: &Mutex<HashMap<(String, u64, u64), u32>>,
    opts: &RangeServerOptions,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(30)));

    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };

    let (method, path, range) = parse_request(request);
    let Some(body) = bodies.get(&path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n");
        return;
    };
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nLast-Modified: Tue, 05 Aug 2025 00:00:00 GMT\r\nETag: \"rs-test\"\r\nConnection: close\r\n\r\n",
            total
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    match range {
        Some((start, end_incl)) => {
            let start = start.min(total);
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                let _ =
                    stream.write_all(b"HTTP/1.1 416 Range Not Satisfiable\r\nConnection: close\r\n\r\n");
                return;
            }

            requests
                .lock()
                .unwrap()
                .push((path.clone(), start, end_incl));

            let slice = &body[start as usize..=end_incl as usize];

            // 首次请求短读：Content-Length 与实际写出同步缩短，
            // 客户端收到的是干净结束的不完整流
            let attempt = {
                let mut map = attempts.lock().unwrap();
                let count = map.entry((path.clone(), start, end_incl)).or_insert(0);
                *count += 1;
                *count
            };
            let truncated = opts.short_read_first_attempt && attempt == 1 && slice.len() > 1;
            let payload = if truncated {
                &slice[..slice.len() / 2]
            } else {
                slice
            };

            let headers = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nAccept-Ranges: bytes\r\nLast-Modified: Tue, 05 Aug 2025 00:00:00 GMT\r\nETag: \"rs-test\"\r\nConnection: close\r\n\r\n",
                payload.len(),
                start,
                end_incl,
                total
            );
            if stream.write_all(headers.as_bytes()).is_err() {
                return;
            }
            write_payload(&mut stream, payload, opts);
        }
        None => {
            let headers = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nLast-Modified: Tue, 05 Aug 2025 00:00:00 GMT\r\nETag: \"rs-test\"\r\nConnection: close\r\n\r\n",
                total
            );
            if stream.write_all(headers.as_bytes()).is_err() {
                return;
            }
            write_payload(&mut stream, body, opts);
        }
    }
}

fn write_payload(stream: &mut TcpStream, payload: &[u8], opts: &RangeServerOptions) {
    for piece in payload.chunks(16 * 1024) {
        if stream.write_all(piece).is_err() {
            return;
        }
        if let Some(delay) = opts.throttle_per_16k {
            thread::sleep(delay);
        }
    }
    let _ = stream.flush();
}

/// 解析请求行和 Range 头，返回 (方法, 路径, 范围)
fn parse_request(request: &str) -> (String, String, Option<(u64, u64)>) {
    let mut method = String::new();
    let mut path = String::new();
    let mut range = None;

    for (i, line) in request.lines().enumerate() {
        if i == 0 {
            let mut parts = line.split_whitespace();
            method = parts.next().unwrap_or("").to_string();
            path = parts.next().unwrap_or("/").to_string();
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("range:") {
            let value = value.trim();
            if let Some(window) = value.strip_prefix("bytes=") {
                if let Some((a, b)) = window.split_once('-') {
                    if let (Ok(start), Ok(end)) = (a.parse::<u64>(), b.parse::<u64>()) {
                        range = Some((start, end));
                    }
                }
            }
        }
    }

    (method, path, range)
}

/// 确定性伪随机内容，崩溃续传测试用它校验逐字节一致
pub fn pseudo_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}
