//! The built binary in shared-port mode: a supervisor forking one worker per
//! CPU, all answering on one port, stopped with SIGTERM.

#![cfg(unix)]

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

async fn get(addr: SocketAddr, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

fn free_port() -> u16 {
    let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_supervisor_serves_and_stops_workers() {
    let dir = TempDir::new().unwrap();
    let port = free_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let mut supervisor = Command::new(env!("CARGO_BIN_EXE_vectorindex-server"))
        .arg("--multiprocess")
        .args(["--host", "127.0.0.1"])
        .arg("--port")
        .arg(port.to_string())
        .args(["--dim", "3"])
        .arg("--save-path")
        .arg(dir.path().join("test.index"))
        .arg("--scratch-dir")
        .arg(dir.path().join("scratch"))
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        match get(addr, "/health").await {
            Ok(response) if response.starts_with("HTTP/1.1 200") => break,
            _ if Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await
            }
            other => panic!("workers never became healthy: {:?}", other),
        }
    }

    // Every worker was configured with the same dimension.
    for _ in 0..8 {
        let response = get(addr, "/dimension").await.unwrap();
        assert!(response.contains(r#""dim":3"#), "{}", response);
    }

    let pid = supervisor.id().unwrap() as libc::pid_t;
    // SAFETY: signals the child spawned above.
    assert_eq!(unsafe { libc::kill(pid, libc::SIGTERM) }, 0);

    let status = tokio::time::timeout(Duration::from_secs(30), supervisor.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success(), "{}", status);
    assert!(TcpStream::connect(addr).await.is_err());
}
