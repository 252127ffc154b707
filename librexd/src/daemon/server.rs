// Copyright 2023 Google LLC
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

//! The supervisor: accepts connections, performs the ssh handshake on
//! each, tracks the live sessions, and pushes their lifecycle events
//! into the presence sink. One connection misbehaving never takes the
//! supervisor down.

use std::{net::SocketAddr, sync::Arc, time};

use anyhow::Context;
use russh::server::{self as ssh_server};
use russh::{Disconnect, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, instrument};

use super::{
    handler,
    session::{EventKind, Session, SessionEvent},
};
use crate::{config, consts, host::Host};

pub struct Server {
    settings: config::Settings,
    host_keys: Vec<KeyPair>,
    authorized_keys: Arc<Vec<PublicKey>>,
    host: Host,
}

impl Server {
    pub fn new(
        settings: config::Settings,
        host_keys: Vec<KeyPair>,
        authorized_keys: Vec<PublicKey>,
        host: Host,
    ) -> Arc<Self> {
        Arc::new(Server {
            settings,
            host_keys,
            authorized_keys: Arc::new(authorized_keys),
            host,
        })
    }

    fn ssh_config(&self) -> Arc<ssh_server::Config> {
        Arc::new(ssh_server::Config {
            methods: MethodSet::PUBLICKEY,
            keys: self.host_keys.clone(),
            auth_rejection_time: time::Duration::from_secs(1),
            auth_rejection_time_initial: Some(time::Duration::ZERO),
            ..Default::default()
        })
    }

    /// The run loop. Returns once the presence sink reports that it is
    /// no longer idle; on the way out every remaining session gets
    /// closed.
    #[instrument(skip_all)]
    pub async fn serve(server: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr().context("resolving listen address")?;
        let listening_msg = format!("Listening: {local_addr}...");
        info!("listening on {}", local_addr);

        let ssh_config = server.ssh_config();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let (register_tx, mut register_rx) = mpsc::unbounded_channel::<Session>();
        let mut sessions: Vec<Session> = vec![];

        server.host.presence.set_text(&listening_msg);

        // The pump makes sure a quiet loop still consults idle() so a
        // front-end quitting (or a term signal) gets noticed promptly.
        let mut pump = tokio::time::interval(consts::PRESENCE_PUMP_INTERVAL);
        pump.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while server.host.presence.idle() {
            tokio::select! {
                _ = pump.tick() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("connected: addr={:?}", peer);
                        let conn = Connection {
                            server: Arc::clone(&server),
                            ssh_config: Arc::clone(&ssh_config),
                            event_tx: event_tx.clone(),
                            register_tx: register_tx.clone(),
                        };
                        tokio::spawn(async move {
                            if let Err(e) = conn.run(stream, peer).await {
                                error!("handling connection from {}: {:?}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accepting connection: {:?}", e);
                    }
                },
                Some(session) = register_rx.recv() => {
                    debug!("session '{}' registered", session.name());
                    sessions.push(session);
                }
                Some(event) = event_rx.recv() => {
                    server.handle_event(event, &mut sessions, &listening_msg).await;
                }
            }
        }

        info!("presence sink stopped being idle, draining sessions");
        while let Ok(session) = register_rx.try_recv() {
            sessions.push(session);
        }
        while let Some(mut session) = sessions.pop() {
            session.close().await;
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        event: SessionEvent,
        sessions: &mut Vec<Session>,
        listening_msg: &str,
    ) {
        match event.kind {
            EventKind::Open => {
                info!("session '{}' opened", event.session);
                self.update_text(listening_msg, sessions.len());
                self.host.presence.notify("Connected", &event.session);
                self.host.presence.set_busy(true);
            }
            EventKind::Closing => {
                if let Some(pos) = sessions.iter().position(|s| s.name() == event.session) {
                    let mut session = sessions.remove(pos);
                    session.close().await;
                } else {
                    debug!("closing event for unknown session '{}'", event.session);
                }
                self.update_text(listening_msg, sessions.len());
                self.host.presence.notify("Disconnected", &event.session);
                if sessions.is_empty() {
                    self.host.presence.set_busy(false);
                }
            }
            EventKind::Timeout => {
                // dropped without ceremony: no notifications for a
                // client that never got a session going
                if let Some(pos) = sessions.iter().position(|s| s.name() == event.session) {
                    sessions.remove(pos);
                }
            }
            EventKind::Closed => {
                debug!("session '{}' closed", event.session);
            }
        }
    }

    fn update_text(&self, listening_msg: &str, count: usize) {
        if count > 0 {
            self.host.presence.set_text(&format!("{listening_msg}\n(Clients: {count})"));
        } else {
            self.host.presence.set_text(listening_msg);
        }
    }
}

/// One accepted tcp connection on its way to becoming a session.
struct Connection {
    server: Arc<Server>,
    ssh_config: Arc<ssh_server::Config>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    register_tx: mpsc::UnboundedSender<Session>,
}

impl Connection {
    /// Handshake, then wait for the client to open its one session
    /// channel. Transports that produce no channel within the window
    /// get torn down; any error here affects this connection only.
    #[instrument(skip_all, fields(peer = %peer))]
    async fn run(self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let name = format!("Session-{}-{}", peer.ip(), peer.port());
        let policy = Arc::new(handler::Policy::new(
            self.server.settings.username.clone(),
            self.server.settings.codec,
        ));
        let (channel_tx, channel_rx) = oneshot::channel();
        let conn_handler = handler::ConnHandler::new(
            Arc::clone(&policy),
            Arc::clone(&self.server.authorized_keys),
            channel_tx,
        );

        // The transport runs in its own task from here on; we keep the
        // handle, which is the write half of any channel it produces.
        let running = ssh_server::run_stream(self.ssh_config, stream, conn_handler)
            .await
            .context("ssh handshake")?;
        let handle = running.handle();

        let channel =
            match tokio::time::timeout(consts::CHANNEL_ACCEPT_TIMEOUT, channel_rx).await {
                Ok(Ok(channel)) => channel,
                // either the window elapsed or the transport died
                // (auth failure, client gave up) before a channel came
                Ok(Err(_)) | Err(_) => {
                    info!("no session channel from {}, closing transport", peer);
                    let _ = handle
                        .disconnect(
                            Disconnect::ByApplication,
                            String::from("no session channel"),
                            String::new(),
                        )
                        .await;
                    return Ok(());
                }
            };

        let (session, registered) = Session::spawn(
            name,
            channel,
            handle,
            policy,
            self.server.settings.clone(),
            self.server.host.clone(),
            self.event_tx.clone(),
        );
        if self.register_tx.send(session).is_err() {
            debug!("supervisor is gone, dropping session");
        }
        // now the driver may start reporting events
        let _ = registered.send(());
        Ok(())
    }
}
