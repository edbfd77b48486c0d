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

//! SSH transport layer: dialing gateways and owning live sessions.
//!
//! The pieces here wrap russh into the shape the forwarding engine needs:
//! a [`Dialer`] that produces authenticated sessions (directly over TCP or
//! through a ProxyCommand subprocess), the [`SshSession`] wrapper owning one
//! live session plus any subprocess feeding it, and the [`ClientHandler`]
//! carrying the host-key policy for the handshake.

mod dialer;
mod error;
mod handler;
mod session;

pub use dialer::{Dialer, GatewayAddr};
pub use error::Error;
pub use handler::{default_known_hosts_path, ClientHandler, HostKeyPolicy};
pub use session::SshSession;
