//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Carrot.
//
// Carrot is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Carrot is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Carrot. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};
use std::sync::Arc;

use log::info;

use crate::protocol::Connection;
use crate::support::cow_list::CowList;

/// Identifies a connection in server events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: u64,
    pub protocol: String,
    pub peer: SocketAddr,
}

impl ClientInfo {
    pub fn of(connection: &Connection) -> Self {
        ClientInfo {
            id: connection.id(),
            protocol: connection.protocol().to_owned(),
            peer: connection.peer_addr(),
        }
    }
}

/// Something that happened to a server or one of its clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// The server is accepting connections.
    Started { protocol: String, port: u16 },
    /// The server has stopped and all its connections have been closed.
    Stopped { protocol: String, port: u16 },
    ClientConnected(ClientInfo),
    /// A connection ended and was removed from the server.
    ClientDisconnected(ClientInfo),
    /// A connection was closed for being idle too long. It is followed by
    /// `ClientDisconnected` once the server notices.
    ClientTimeout(ClientInfo),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerEvent::Started { ref protocol, port } => {
                write!(f, "{} server started on port {}", protocol, port)
            }
            ServerEvent::Stopped { ref protocol, port } => {
                write!(f, "{} server on port {} stopped", protocol, port)
            }
            ServerEvent::ClientConnected(ref c) => {
                write!(f, "{}:{} connected (#{})", c.protocol, c.peer, c.id)
            }
            ServerEvent::ClientDisconnected(ref c) => {
                write!(f, "{}:{} disconnected (#{})", c.protocol, c.peer, c.id)
            }
            ServerEvent::ClientTimeout(ref c) => {
                write!(f, "{}:{} timed out (#{})", c.protocol, c.peer, c.id)
            }
        }
    }
}

/// Receives server events.
///
/// Events are delivered synchronously on whichever server thread noticed
/// them, so listeners should return quickly.
pub trait ServerListener: Send + Sync {
    fn handle(&self, event: &ServerEvent);
}

impl<F: Fn(&ServerEvent) + Send + Sync> ServerListener for F {
    fn handle(&self, event: &ServerEvent) {
        self(event)
    }
}

/// Writes every event to the log.
pub struct LoggingListener;

impl ServerListener for LoggingListener {
    fn handle(&self, event: &ServerEvent) {
        info!("{}", event);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventDispatcher {
    listeners: CowList<(ListenerId, Arc<dyn ServerListener>)>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ServerListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, SeqCst));
        self.listeners.push((id, listener));
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove(&self, id: ListenerId) -> bool {
        !self.listeners.remove_where(|&(i, _)| id == i).is_empty()
    }

    pub fn dispatch(&self, event: &ServerEvent) {
        for &(_, ref listener) in self.listeners.snapshot().iter() {
            listener.handle(event);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn dispatch_to_listeners() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = Arc::clone(&seen);
        let a = dispatcher.add(Arc::new(move |e: &ServerEvent| {
            seen2.lock().unwrap().push(format!("a {}", e))
        }));
        let seen2 = Arc::clone(&seen);
        dispatcher.add(Arc::new(move |e: &ServerEvent| {
            seen2.lock().unwrap().push(format!("b {}", e))
        }));

        let started = ServerEvent::Started {
            protocol: "echo".to_owned(),
            port: 7,
        };
        dispatcher.dispatch(&started);
        assert!(dispatcher.remove(a));
        assert!(!dispatcher.remove(a));
        dispatcher.dispatch(&ServerEvent::Stopped {
            protocol: "echo".to_owned(),
            port: 7,
        });

        assert_eq!(
            vec![
                "a echo server started on port 7",
                "b echo server started on port 7",
                "b echo server on port 7 stopped",
            ],
            *seen.lock().unwrap()
        );
    }
}
