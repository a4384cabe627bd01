//! 测试用的本地 HTTP 服务器
//!
//! 只接受一个连接，记录请求头，然后以 chunked 编码逐块写回响应。
//! 每块之间短暂停顿，让客户端按块读到数据。

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// 已启动的单次服务器
pub(crate) struct OneShotServer {
    pub base_url: String,
    /// 收到的请求头（请求行 + 头部）
    pub request: oneshot::Receiver<String>,
}

/// 启动服务器，`status` 形如 `"200 OK"`
pub(crate) async fn serve_once(status: &'static str, chunks: Vec<Vec<u8>>) -> OneShotServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (request_tx, request_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_request(&mut socket).await;
        let _ = request_tx.send(head);
        write_chunked(&mut socket, status, &chunks).await;
    });

    OneShotServer {
        base_url: format!("http://{}", addr),
        request: request_rx,
    }
}

/// 读完请求头和请求体，返回请求头文本
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break buffer.len();
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body_read = buffer.len() - head_end;
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        body_read += n;
    }
    head
}

async fn write_chunked(socket: &mut TcpStream, status: &str, chunks: &[Vec<u8>]) {
    let header = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        status
    );
    socket.write_all(header.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();

    for chunk in chunks {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
        frame.extend_from_slice(chunk);
        frame.extend_from_slice(b"\r\n");
        // 客户端提前断开时停止写入
        if socket.write_all(&frame).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}
