// Application routing layer.
//
// Turns each inbound `ClientMessage` into work for exactly one session actor
// (or a direct reply), and serves the read-only endpoints: a session's
// timeline and the shuffled candidate catalog.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogListing};
use crate::config::Config;
use crate::draft::state::TimelineEntry;
use crate::error::DraftError;
use crate::protocol::{ClientMessage, Outbox, ServerEvent};
use crate::session::{SessionCommand, SessionHandle, SessionRegistry, SessionSettings};

/// One client connection as seen by the router: its outbox plus the rooms
/// it has been attached to, so they can be left on disconnect.
#[derive(Debug)]
pub struct Connection {
    outbox: Outbox,
    rooms: HashSet<String>,
}

impl Connection {
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn rooms(&self) -> &HashSet<String> {
        &self.rooms
    }
}

pub struct App {
    registry: SessionRegistry,
    catalog: Arc<Catalog>,
    next_conn_id: AtomicU64,
}

impl App {
    pub fn new(config: &Config, catalog: Catalog) -> Self {
        Self::with_registry(
            |catalog| SessionRegistry::new(catalog, SessionSettings::from(config)),
            catalog,
        )
    }

    /// Build around a custom registry (seeded RNG, shortened timers).
    pub fn with_registry(
        make_registry: impl FnOnce(Arc<Catalog>) -> SessionRegistry,
        catalog: Catalog,
    ) -> Self {
        let catalog = Arc::new(catalog);
        App {
            registry: make_registry(Arc::clone(&catalog)),
            catalog,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a new client connection and hand back its event queue.
    pub fn connect(&self) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, rx) = Outbox::new(id);
        debug!("Connection {id} opened");
        (
            Connection {
                outbox,
                rooms: HashSet::new(),
            },
            rx,
        )
    }

    /// Detach a closed connection from every room it joined.
    pub async fn disconnect(&self, conn: Connection) {
        let conn_id = conn.outbox.id();
        for session_id in &conn.rooms {
            if let Some(handle) = self.registry.get(session_id) {
                let _ = handle.send(SessionCommand::Detach { conn_id }).await;
            }
        }
        debug!("Connection {conn_id} closed");
    }

    /// Route one inbound message. Failures are replied to the sender only.
    pub async fn dispatch(&self, conn: &mut Connection, msg: ClientMessage) {
        if let Some(session_id) = msg.session_id() {
            debug!("Connection {} -> session {session_id}", conn.outbox.id());
        }
        if let Err(e) = self.route(conn, msg).await {
            warn!("Connection {}: {e}", conn.outbox.id());
            conn.outbox.send(ServerEvent::from(&e));
        }
    }

    async fn route(&self, conn: &mut Connection, msg: ClientMessage) -> Result<(), DraftError> {
        match msg {
            ClientMessage::CreateSession { host_id } => {
                let handle = self.registry.create(&host_id)?;
                let cmd = SessionCommand::Attach {
                    conn: conn.outbox.clone(),
                    participant: Some(host_id),
                };
                self.attach(conn, &handle, cmd).await?;
                conn.outbox.send(ServerEvent::SessionCreated {
                    session_id: handle.id().to_string(),
                });
            }
            ClientMessage::JoinSession {
                session_id,
                participant_id,
            } => {
                let handle = self.session(&session_id)?;
                let cmd = SessionCommand::Join {
                    participant: participant_id,
                    conn: conn.outbox.clone(),
                    page: false,
                };
                self.attach(conn, &handle, cmd).await?;
            }
            ClientMessage::JoinSessionPage {
                session_id,
                participant_id,
            } => {
                let handle = self.session(&session_id)?;
                let cmd = SessionCommand::Join {
                    participant: participant_id,
                    conn: conn.outbox.clone(),
                    page: true,
                };
                self.attach(conn, &handle, cmd).await?;
            }
            ClientMessage::JoinLesPage {
                session_id,
                participant_id,
            } => {
                let handle = self.session(&session_id)?;
                let cmd = SessionCommand::JoinLesPage {
                    participant: participant_id,
                    conn: conn.outbox.clone(),
                };
                self.attach(conn, &handle, cmd).await?;
            }
            ClientMessage::StartGame { session_id } => {
                self.session(&session_id)?
                    .send(SessionCommand::StartGame)
                    .await?;
            }
            ClientMessage::BeginDraft { session_id } => {
                self.session(&session_id)?
                    .send(SessionCommand::BeginDraft {
                        conn: conn.outbox.clone(),
                    })
                    .await?;
            }
            ClientMessage::MakePick {
                session_id,
                participant_id,
                item_name,
            } => {
                self.session(&session_id)?
                    .send(SessionCommand::MakePick {
                        participant: participant_id,
                        item_name,
                        conn: conn.outbox.clone(),
                    })
                    .await?;
            }
            ClientMessage::GetDraftState { session_id } => {
                self.session(&session_id)?
                    .send(SessionCommand::GetDraftState {
                        conn: conn.outbox.clone(),
                    })
                    .await?;
            }
            ClientMessage::CalculateWinner { session_id } => {
                self.session(&session_id)?
                    .send(SessionCommand::CalculateWinner)
                    .await?;
            }
            ClientMessage::SendRanking {
                session_id,
                participant_id,
                ranking,
            } => {
                self.session(&session_id)?
                    .send(SessionCommand::SendRanking {
                        participant: participant_id,
                        ranking,
                    })
                    .await?;
            }
            ClientMessage::PlayerMoved {
                session_id,
                owner,
                swaps,
            } => {
                self.session(&session_id)?
                    .send(SessionCommand::PlayerMoved {
                        owner,
                        swaps,
                        conn: conn.outbox.clone(),
                    })
                    .await?;
            }
            ClientMessage::GetTimeline { session_id } => {
                let entries = self.timeline(&session_id).await?;
                conn.outbox.send(ServerEvent::Timeline {
                    session_id,
                    entries,
                });
            }
            ClientMessage::GetCatalog => {
                let listing = self.catalog_listing();
                conn.outbox.send(ServerEvent::Catalog {
                    primary_column: listing.primary_column,
                    entries: listing.entries,
                });
            }
        }
        Ok(())
    }

    fn session(&self, session_id: &str) -> Result<SessionHandle, DraftError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| DraftError::SessionNotFound(session_id.to_string()))
    }

    async fn attach(
        &self,
        conn: &mut Connection,
        handle: &SessionHandle,
        cmd: SessionCommand,
    ) -> Result<(), DraftError> {
        handle.send(cmd).await?;
        conn.rooms.insert(handle.id().to_string());
        Ok(())
    }

    /// The committed picks of a session's draft, oldest first.
    pub async fn timeline(&self, session_id: &str) -> Result<Vec<TimelineEntry>, DraftError> {
        self.session(session_id)?.timeline().await
    }

    /// The whole catalog in a fresh random order.
    pub fn catalog_listing(&self) -> CatalogListing {
        self.catalog.shuffled(&mut rand::rng())
    }

    /// Periodically forget expired sessions.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let app = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = app.registry.sweep();
                if removed > 0 {
                    info!("{} sessions remain after sweep", app.registry.len());
                }
            }
        })
    }
}
