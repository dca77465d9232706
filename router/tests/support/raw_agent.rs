//! API 1.16のエンジンと同じ方法でattachとexec startに応答するエージェント
//!
//! raw-streamのContent-Typeで `200 OK` を返し、その後ソケットをそのままエコーする

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// エージェントが受け取ったリクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct SeenRequest {
    /// `METHOD target`
    pub line: String,
    /// `Host` header
    pub host: String,
    /// Body announced by `Content-Length`
    pub body: String,
}

/// 起動中のraw-streamエージェント
pub struct RawStreamAgent {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl RawStreamAgent {
    /// 空きポートで起動する
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(session(socket, log.clone()));
            }
        });
        Self { addr, seen }
    }

    /// ルーターに登録する `host:port`
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// これまでに受け取ったリクエスト
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

async fn session(mut socket: TcpStream, seen: Arc<Mutex<Vec<SeenRequest>>>) {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 1024];
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let line = lines
        .next()
        .unwrap_or_default()
        .rsplit_once(' ')
        .map(|(line, _)| line.to_string())
        .unwrap_or_default();
    let mut host = String::new();
    let mut length = 0usize;
    for header in lines {
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "host" => host = value.trim().to_string(),
                "content-length" => length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let mut chunk = [0u8; 1024];
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }
    let stdin = body.split_off(length);
    seen.lock().unwrap().push(SeenRequest {
        line,
        host,
        body: String::from_utf8_lossy(&body).to_string(),
    });

    if socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/vnd.docker.raw-stream\r\n\r\n")
        .await
        .is_err()
    {
        return;
    }
    if !stdin.is_empty() && socket.write_all(&stdin).await.is_err() {
        return;
    }
    let (mut reader, mut writer) = socket.split();
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}
