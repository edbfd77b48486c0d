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

//! In-process SSH mock for the forwarding tests: accepts any public key
//! and echoes every byte written to a direct-tcpip channel.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use russh::keys::{Algorithm, PrivateKey, PublicKey};
use russh::server::{Auth, Msg, Server, Session};
use russh::{Channel, ChannelMsg};
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct EchoSshServer;

pub struct EchoHandler;

impl Server for EchoSshServer {
    type Handler = EchoHandler;

    fn new_client(&mut self, _peer: Option<SocketAddr>) -> EchoHandler {
        EchoHandler
    }
}

impl russh::server::Handler for EchoHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(Auth::Accept)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tokio::spawn(echo_channel(channel));
        Ok(true)
    }
}

async fn echo_channel(mut channel: Channel<Msg>) {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                if channel.data(&data[..]).await.is_err() {
                    break;
                }
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }
    let _ = channel.close().await;
}

/// Bind on an ephemeral port and serve in the background. Returns the
/// bound address.
pub async fn spawn_echo_server() -> SocketAddr {
    let host_key =
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).expect("generate host key");
    let config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind echo server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let mut server = EchoSshServer;
        let _ = server.run_on_socket(config, &listener).await;
    });

    addr
}

/// Write a throwaway OpenSSH-format client key and return nothing; the
/// server accepts any public key.
pub fn write_client_key(path: &Path) {
    let key =
        PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519).expect("generate key");
    let encoded = key.to_openssh(Default::default()).expect("encode key");
    std::fs::write(path, encoded.as_bytes()).expect("write key file");
}
