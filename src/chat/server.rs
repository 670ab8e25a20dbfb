//! Chat server: login, room fanout, direct messages. Built only against the
//! public transport API (`Endpoint`/`ConnHandle`) — no transport internals
//! are reached into from here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::info;

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::err::Error;
use crate::stream::ConnHandle;

use super::proto::{ClientMessage, ServerMessage};
use super::room::RoomManager;

const DEFAULT_ROOM: &str = "general";

struct Session {
    username: String,
    conn: Arc<ConnHandle>,
}

pub struct ChatServer {
    endpoint: Endpoint,
    rooms: Arc<RoomManager>,
    sessions: Arc<Mutex<HashMap<u32, Session>>>,
    usernames: Arc<Mutex<HashMap<String, u32>>>,
}

impl ChatServer {
    pub fn bind(addr: SocketAddr, config: Config) -> Result<Self, Error> {
        let endpoint = Endpoint::listen(addr, config)?;
        Ok(ChatServer {
            endpoint,
            rooms: Arc::new(RoomManager::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            usernames: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn spawn_metrics_reporter(&self, interval: Duration) -> thread::JoinHandle<()> {
        let endpoint = self.endpoint.clone();
        let sessions = self.sessions.clone();
        super::metrics::spawn_metrics_reporter(
            endpoint,
            move || sessions.lock().unwrap().keys().copied().collect(),
            interval,
        )
    }

    /// Accepts connections forever, spawning one handler thread per client.
    pub fn run(&self) -> Result<(), Error> {
        loop {
            let conn = Arc::new(self.endpoint.accept()?);
            let rooms = self.rooms.clone();
            let sessions = self.sessions.clone();
            let usernames = self.usernames.clone();
            thread::spawn(move || handle_client(conn, rooms, sessions, usernames));
        }
    }
}

fn handle_client(
    conn: Arc<ConnHandle>,
    rooms: Arc<RoomManager>,
    sessions: Arc<Mutex<HashMap<u32, Session>>>,
    usernames: Arc<Mutex<HashMap<String, u32>>>,
) {
    let conn_id = conn.conn_id();

    let Some(username) = login(&conn, &usernames, conn_id) else {
        return;
    };

    info!("{username} connected (conn {conn_id:#x})");
    sessions.lock().unwrap().insert(
        conn_id,
        Session {
            username: username.clone(),
            conn: conn.clone(),
        },
    );

    join_room(&conn, &rooms, conn_id, DEFAULT_ROOM);

    loop {
        let msg = match conn.recv() {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(_) => break,
        };

        let Ok(client_msg) = ClientMessage::decode(&msg) else {
            let _ = send(
                &conn,
                &ServerMessage::Error {
                    reason: "malformed message".into(),
                },
            );
            continue;
        };

        match client_msg {
            ClientMessage::Login { .. } => {
                let _ = send(
                    &conn,
                    &ServerMessage::Error {
                        reason: "already logged in".into(),
                    },
                );
            }
            ClientMessage::Join { room } => join_room(&conn, &rooms, conn_id, &room),
            ClientMessage::Leave { room } => {
                rooms.leave(&room, conn_id);
                let _ = send(&conn, &ServerMessage::Left { room });
            }
            ClientMessage::Room { room, body } => {
                let line = format!("{username}: {body}");
                let targets = rooms.publish(&room, conn_id, line);
                let sessions = sessions.lock().unwrap();
                for target in targets {
                    if let Some(session) = sessions.get(&target) {
                        let _ = send(
                            &session.conn,
                            &ServerMessage::RoomMessage {
                                room: room.clone(),
                                from: username.clone(),
                                body: body.clone(),
                            },
                        );
                    }
                }
            }
            ClientMessage::Direct { to, body } => {
                let target_id = usernames.lock().unwrap().get(&to).copied();
                let target_conn =
                    target_id.and_then(|id| sessions.lock().unwrap().get(&id).map(|s| s.conn.clone()));
                match target_conn {
                    Some(target_conn) => {
                        let _ = send(
                            &target_conn,
                            &ServerMessage::Direct {
                                from: username.clone(),
                                body,
                            },
                        );
                    }
                    None => {
                        let _ = send(
                            &conn,
                            &ServerMessage::Error {
                                reason: format!("{to} is offline"),
                            },
                        );
                    }
                }
            }
            ClientMessage::Quit => break,
        }
    }

    rooms.leave_all(conn_id);
    sessions.lock().unwrap().remove(&conn_id);
    usernames.lock().unwrap().remove(&username);
    let _ = conn.close();
    info!("{username} disconnected (conn {conn_id:#x})");
}

fn join_room(conn: &ConnHandle, rooms: &RoomManager, conn_id: u32, room: &str) {
    let history = rooms.join(room, conn_id);
    let _ = send(
        conn,
        &ServerMessage::Joined {
            room: room.to_string(),
        },
    );
    if !history.is_empty() {
        let _ = send(
            conn,
            &ServerMessage::History {
                room: room.to_string(),
                lines: history,
            },
        );
    }
}

fn login(conn: &ConnHandle, usernames: &Mutex<HashMap<String, u32>>, conn_id: u32) -> Option<String> {
    let first = match conn.recv() {
        Ok(Some(bytes)) => bytes,
        _ => return None,
    };

    let username = match ClientMessage::decode(&first) {
        Ok(ClientMessage::Login { username }) if !username.trim().is_empty() => username,
        _ => {
            let _ = send(
                conn,
                &ServerMessage::Error {
                    reason: "expected login".into(),
                },
            );
            let _ = conn.close();
            return None;
        }
    };

    let mut usernames_guard = usernames.lock().unwrap();
    if usernames_guard.contains_key(&username) {
        drop(usernames_guard);
        let _ = send(
            conn,
            &ServerMessage::Error {
                reason: "username taken".into(),
            },
        );
        let _ = conn.close();
        return None;
    }
    usernames_guard.insert(username.clone(), conn_id);
    drop(usernames_guard);

    let _ = send(
        conn,
        &ServerMessage::Welcome {
            username: username.clone(),
        },
    );
    Some(username)
}

fn send(conn: &ConnHandle, msg: &ServerMessage) -> Result<(), Error> {
    conn.send(msg.encode())
}
