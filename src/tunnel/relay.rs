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

use std::io;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const COPY_BUFFER_SIZE: usize = 8192;

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Pump bytes both ways between an accepted client and its upstream
/// channel until either direction finishes.
///
/// EOF on either side is normal termination. Both ends are closed on the
/// way out, so the opposite direction never stays blocked in a read.
pub async fn run<S>(
    mut client: S,
    mut upstream: Channel<Msg>,
    token: CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let result = loop {
        tokio::select! {
            read = client.read(&mut buf) => match read {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(err) = upstream.data(&buf[..n]).await {
                        break Err(anyhow::anyhow!("write to gateway channel: {err}"));
                    }
                }
                Err(err) if is_disconnect(err.kind()) => break Ok(()),
                Err(err) => break Err(anyhow::anyhow!("read from client: {err}")),
            },
            msg = upstream.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if let Err(err) = client.write_all(&data).await {
                        if is_disconnect(err.kind()) {
                            break Ok(());
                        }
                        break Err(anyhow::anyhow!("write to client: {err}"));
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break Ok(()),
                Some(_) => {}
            },
            _ = token.cancelled() => break Ok(()),
        }
    };

    let _ = upstream.eof().await;
    let _ = upstream.close().await;
    let _ = client.shutdown().await;

    result
}
