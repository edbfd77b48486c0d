// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end forwarding tests against an in-process SSH echo mock.

mod common;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use tunneld::config::{GatewayConfig, KeyFile};
use tunneld::gateway::Gateway;
use tunneld::keys::KeyMaterial;
use tunneld::ssh::HostKeyPolicy;
use tunneld::tunnel::Tunnel;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn test_gateway(server_addr: SocketAddr, key_path: &Path) -> Arc<Gateway> {
    let keys = Arc::new(
        KeyMaterial::load(&[KeyFile {
            path: key_path.to_string_lossy().into_owned(),
            passphrase: None,
        }])
        .await
        .expect("load key material"),
    );
    let config = GatewayConfig {
        server: format!("tester@{server_addr}"),
        proxy_command: None,
        tunnels: vec![],
    };
    Arc::new(Gateway::new(&config, keys, HostKeyPolicy::AcceptAny).expect("build gateway"))
}

/// Retry until the tunnel's listener is accepting.
async fn tcp_connect_with_retry(addr: &str) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("listener on {addr} never came up");
}

async fn ping_pong<S>(stream: &mut S)
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    stream.write_all(b"ping\n").await.expect("write ping");
    let mut buf = [0u8; 5];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("echo within deadline")
        .expect("read echo");
    assert_eq!(&buf, b"ping\n");
}

#[tokio::test]
async fn forwards_bytes_end_to_end() {
    std::env::remove_var("SSH_AUTH_SOCK");
    let server_addr = common::spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519");
    common::write_client_key(&key_path);

    let gateway = test_gateway(server_addr, &key_path).await;
    let tunnel = Tunnel::new(gateway, "echo.local:7 -> 127.0.0.1:17007").unwrap();

    let token = CancellationToken::new();
    let forward_token = token.clone();
    let forward = tokio::spawn(async move { tunnel.forward(forward_token).await });

    let mut client = tcp_connect_with_retry("127.0.0.1:17007").await;
    ping_pong(&mut client).await;
    drop(client);

    token.cancel();
    timeout(TEST_TIMEOUT, forward)
        .await
        .expect("forward loop exits after cancel")
        .expect("join")
        .expect("clean exit");
}

#[tokio::test]
async fn two_tunnels_share_one_gateway() {
    std::env::remove_var("SSH_AUTH_SOCK");
    let server_addr = common::spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519");
    common::write_client_key(&key_path);

    let gateway = test_gateway(server_addr, &key_path).await;
    let first = Tunnel::new(Arc::clone(&gateway), "a:1 -> 127.0.0.1:17101").unwrap();
    let second = Tunnel::new(gateway, "b:2 -> 127.0.0.1:17102").unwrap();

    let token = CancellationToken::new();
    let t1 = token.clone();
    let t2 = token.clone();
    let f1 = tokio::spawn(async move { first.forward(t1).await });
    let f2 = tokio::spawn(async move { second.forward(t2).await });

    let mut c1 = tcp_connect_with_retry("127.0.0.1:17101").await;
    let mut c2 = tcp_connect_with_retry("127.0.0.1:17102").await;
    tokio::join!(ping_pong(&mut c1), ping_pong(&mut c2));

    // closing one client does not affect the other tunnel
    drop(c1);
    let mut c1b = TcpStream::connect("127.0.0.1:17101").await.unwrap();
    ping_pong(&mut c1b).await;
    ping_pong(&mut c2).await;

    token.cancel();
    let _ = timeout(TEST_TIMEOUT, f1).await.expect("first exits");
    let _ = timeout(TEST_TIMEOUT, f2).await.expect("second exits");
}

#[tokio::test]
async fn unix_socket_tunnel_replaces_stale_file() {
    std::env::remove_var("SSH_AUTH_SOCK");
    let server_addr = common::spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519");
    common::write_client_key(&key_path);

    let sock_path = dir.path().join("t.sock");
    std::fs::write(&sock_path, "stale").unwrap();

    let gateway = test_gateway(server_addr, &key_path).await;
    let rule = format!("echo.local:7 -> {}", sock_path.display());
    let tunnel = Tunnel::new(gateway, &rule).unwrap();

    let token = CancellationToken::new();
    let forward_token = token.clone();
    let forward = tokio::spawn(async move { tunnel.forward(forward_token).await });

    let mut client = loop {
        match UnixStream::connect(&sock_path).await {
            Ok(stream) => break stream,
            Err(_) => sleep(Duration::from_millis(20)).await,
        }
    };
    ping_pong(&mut client).await;

    token.cancel();
    let _ = timeout(TEST_TIMEOUT, forward).await.expect("forward exits");
}

#[tokio::test]
async fn gateway_redials_after_session_loss() {
    std::env::remove_var("SSH_AUTH_SOCK");
    let server_addr = common::spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519");
    common::write_client_key(&key_path);

    let gateway = test_gateway(server_addr, &key_path).await;
    let token = CancellationToken::new();

    let channel = gateway.dial(&token, "echo.local:7").await.expect("first dial");
    drop(channel);

    // simulate the session dying under us
    gateway.close().await;

    let channel = gateway
        .dial(&token, "echo.local:7")
        .await
        .expect("dial after session loss reconnects");
    drop(channel);
    gateway.close().await;
}

#[tokio::test]
async fn relay_survives_large_transfers() {
    std::env::remove_var("SSH_AUTH_SOCK");
    let server_addr = common::spawn_echo_server().await;
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("id_ed25519");
    common::write_client_key(&key_path);

    let gateway = test_gateway(server_addr, &key_path).await;
    let tunnel = Tunnel::new(gateway, "bulk:9 -> 127.0.0.1:17103").unwrap();

    let token = CancellationToken::new();
    let forward_token = token.clone();
    let forward = tokio::spawn(async move { tunnel.forward(forward_token).await });

    let client = tcp_connect_with_retry("127.0.0.1:17103").await;
    let (mut read_half, mut write_half) = tokio::io::split(client);

    // several copy-buffer lengths worth of data, echoed back verbatim;
    // read concurrently so neither side stalls on flow control
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    tokio::join!(
        async move {
            write_half.write_all(&payload).await.expect("write payload");
            write_half.flush().await.expect("flush");
        },
        async move {
            let mut received = vec![0u8; expected.len()];
            timeout(TEST_TIMEOUT, read_half.read_exact(&mut received))
                .await
                .expect("bulk echo within deadline")
                .expect("read echo");
            assert_eq!(received, expected);
        }
    );

    token.cancel();
    let _ = timeout(TEST_TIMEOUT, forward).await.expect("forward exits");
}
