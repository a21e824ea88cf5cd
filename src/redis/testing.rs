//! In-process stand-in for a Redis server

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `+OK` to every command and hang up when `hang_up_on` arrives
///
/// Returns the server URL. Every accepted socket is handled the same way, so
/// a client can reconnect after the hang-up.
pub(crate) async fn spawn_fake_server(hang_up_on: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut last = b'\n';
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let chunk = &buf[..n];
                    if chunk
                        .windows(hang_up_on.len())
                        .any(|w| w == hang_up_on.as_bytes())
                    {
                        return;
                    }
                    // One reply per RESP array header
                    let mut commands = 0;
                    for &byte in chunk {
                        if byte == b'*' && last == b'\n' {
                            commands += 1;
                        }
                        last = byte;
                    }
                    for _ in 0..commands {
                        if socket.write_all(b"+OK\r\n").await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    format!("redis://{}", addr)
}
