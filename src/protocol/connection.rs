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

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;

use crate::support::log_prefix::LogPrefix;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// The state of one client connection that is shared between the thread
/// serving it and the server supervising it.
///
/// Any thread may stop or close the connection. Closing shuts the socket
/// down, which makes the serving thread's next read or write fail so that
/// it winds down on its own.
pub struct Connection {
    id: u64,
    protocol: String,
    peer: SocketAddr,
    local: SocketAddr,
    socket: TcpStream,
    running: AtomicBool,
    closed: AtomicBool,
    last_active: Mutex<Instant>,
    log_prefix: LogPrefix,
}

impl Connection {
    pub fn new(protocol: &str, socket: &TcpStream) -> io::Result<Self> {
        let peer = socket.peer_addr()?;
        let local = socket.local_addr()?;
        let log_prefix = LogPrefix::new(protocol.to_owned());
        log_prefix.set_peer(peer.to_string());

        Ok(Connection {
            id: NEXT_ID.fetch_add(1, SeqCst),
            protocol: protocol.to_owned(),
            peer,
            local,
            socket: socket.try_clone()?,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
            log_prefix,
        })
    }

    /// A process-wide unique id for this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    /// Mark the connection as being served. Has no effect once closed.
    pub fn start(&self) {
        if !self.is_closed() {
            self.running.store(true, SeqCst);
            self.reset_idle_timer();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(SeqCst)
    }

    /// Ask the serving thread to finish after the line it is handling.
    pub fn stop(&self) {
        self.running.store(false, SeqCst);
    }

    /// Forcibly end the connection.
    ///
    /// Returns whether this call was the one that closed it.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            return false;
        }

        self.running.store(false, SeqCst);
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            // Already gone if the client hung up first
            if io::ErrorKind::NotConnected != e.kind() {
                debug!("{} Error shutting down socket: {}", self.log_prefix, e);
            }
        }
        true
    }

    pub fn reset_idle_timer(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    /// How long since the connection last did something.
    pub fn idle_time(&self) -> Duration {
        self.last_active.lock().unwrap().elapsed()
    }
}
