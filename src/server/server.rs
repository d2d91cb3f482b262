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

use std::convert::TryFrom;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use nix::poll::{poll, PollFd, PollFlags};

use super::events::*;
use crate::protocol::{Connection, ProtocolFactory};
use crate::support::cow_list::CowList;
use crate::support::error::Error;
use crate::support::threading::ConnectionPool;

/// How long the accept loop waits for a connection before checking whether
/// it should stop, in milliseconds.
const ACCEPT_POLL_MS: nix::libc::c_int = 500;
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
/// How long shutdown waits for connection threads to exit.
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
struct Settings {
    port: i64,
    bind: IpAddr,
    timeout: Duration,
}

struct Inner {
    factory: Arc<dyn ProtocolFactory>,
    settings: Mutex<Settings>,
    bound_port: AtomicU16,
    running: AtomicBool,
    connections: CowList<Arc<Connection>>,
    events: EventDispatcher,
}

#[derive(Default)]
struct Threads {
    accept: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

/// Serves one protocol on one port.
///
/// Every accepted connection is handled on a thread of its own by a handler
/// from the protocol's factory. The server keeps track of the live
/// connections, optionally closes ones that sit idle for too long, and
/// reports what happens to its listeners.
///
/// A server can be started again after it has been closed.
pub struct Server {
    inner: Arc<Inner>,
    threads: Mutex<Threads>,
}

impl Server {
    pub fn new(factory: Arc<dyn ProtocolFactory>, port: i64) -> Self {
        Server {
            inner: Arc::new(Inner {
                factory,
                settings: Mutex::new(Settings {
                    port,
                    bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    timeout: Duration::from_secs(0),
                }),
                bound_port: AtomicU16::new(0),
                running: AtomicBool::new(false),
                connections: CowList::new(),
                events: EventDispatcher::new(),
            }),
            threads: Mutex::new(Threads::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.factory.name()
    }

    /// The port being listened on while running, or the configured port
    /// otherwise.
    pub fn port(&self) -> i64 {
        let bound = self.inner.bound_port.load(SeqCst);
        if self.is_running() && 0 != bound {
            i64::from(bound)
        } else {
            self.inner.settings.lock().unwrap().port
        }
    }

    pub fn set_port(&self, port: i64) {
        self.update_settings(|s| s.port = port);
    }

    pub fn set_bind_address(&self, bind: IpAddr) {
        self.update_settings(|s| s.bind = bind);
    }

    /// Close connections which have been idle for longer than `timeout`. A
    /// zero timeout disables this.
    pub fn set_connection_timeout(&self, timeout: Duration) {
        self.update_settings(|s| s.timeout = timeout);
    }

    pub fn connection_timeout(&self) -> Duration {
        self.inner.settings.lock().unwrap().timeout
    }

    fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        // Hold the thread lock so a concurrent start() can't read half of it
        let _threads = self.threads.lock().unwrap();
        if self.is_running() {
            warn!(
                "{} Settings can't be changed while the server is running",
                self.name()
            );
            return;
        }

        f(&mut self.inner.settings.lock().unwrap());
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(SeqCst)
    }

    pub fn add_listener(
        &self,
        listener: impl ServerListener + 'static,
    ) -> ListenerId {
        self.inner.events.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.events.remove(id)
    }

    /// A snapshot of the live connections.
    pub fn connections(&self) -> Arc<Vec<Arc<Connection>>> {
        self.inner.connections.snapshot()
    }

    /// Start accepting connections.
    ///
    /// The listening socket is bound before this returns, so `port()` gives
    /// the real port even if port 0 was requested. Does nothing if the
    /// server is already running.
    pub fn start(&self) -> Result<(), Error> {
        let mut threads = self.threads.lock().unwrap();
        if self.is_running() {
            return Ok(());
        }

        // If restarting, the old threads must be gone before the connection
        // set is reused.
        join_threads(&mut threads);

        let settings = self.inner.settings.lock().unwrap().clone();
        let port = match u16::try_from(settings.port) {
            Ok(port) => port,
            Err(_) => {
                warn!(
                    "Port number {} for server {} out of range",
                    settings.port,
                    self.name()
                );
                return Err(Error::PortOutOfRange(settings.port));
            }
        };

        let listener = TcpListener::bind(SocketAddr::new(settings.bind, port))
            .map_err(|e| {
                error!(
                    "{} Unable to listen on {}:{}: {}",
                    self.name(),
                    settings.bind,
                    port,
                    e
                );
                e
            })?;
        listener.set_nonblocking(true)?;
        self.inner
            .bound_port
            .store(listener.local_addr()?.port(), SeqCst);

        self.inner.factory.start()?;
        self.inner.connections.clear();
        self.inner.running.store(true, SeqCst);

        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name(format!("{}-accept", self.name()))
            .spawn(move || inner.accept_loop(listener))
        {
            Ok(handle) => threads.accept = Some(handle),
            Err(e) => {
                self.inner.running.store(false, SeqCst);
                return Err(e.into());
            }
        }

        if settings.timeout > Duration::from_secs(0) {
            let inner = Arc::clone(&self.inner);
            let timeout = settings.timeout;
            match thread::Builder::new()
                .name(format!("{}-timeout", self.name()))
                .spawn(move || inner.sweep_timeouts(timeout))
            {
                Ok(handle) => threads.sweeper = Some(handle),
                Err(e) => {
                    error!(
                        "{} Unable to start timeout supervision: {}",
                        self.name(),
                        e
                    );
                }
            }
        }

        Ok(())
    }

    /// Stop the server.
    ///
    /// This only signals the server threads; they close all connections and
    /// exit shortly after. Use `join()` to wait for that.
    pub fn close(&self) {
        self.inner.running.store(false, SeqCst);
    }

    /// Wait for the server threads to exit.
    pub fn join(&self) {
        join_threads(&mut self.threads.lock().unwrap());
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
        self.join();
    }
}

fn join_threads(threads: &mut Threads) {
    let handles =
        threads.accept.take().into_iter().chain(threads.sweeper.take());
    for handle in handles {
        if handle.join().is_err() {
            error!("A server thread panicked");
        }
    }
}

impl Inner {
    fn name(&self) -> &str {
        self.factory.name()
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let port = self.bound_port.load(SeqCst);
        let pool = ConnectionPool::new();

        self.events.dispatch(&ServerEvent::Started {
            protocol: self.name().to_owned(),
            port,
        });

        let fd = listener.as_raw_fd();
        while self.running.load(SeqCst) {
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            match poll(&mut fds, ACCEPT_POLL_MS) {
                Ok(0) => (),
                Ok(_) => {
                    if let Err(e) = self.accept_pending(&listener, &pool) {
                        error!("{} Failed to accept: {}", self.name(), e);
                        break;
                    }
                }
                Err(nix::Error::Sys(nix::errno::Errno::EINTR)) => (),
                Err(e) => {
                    error!("{} Failed to poll listener: {}", self.name(), e);
                    break;
                }
            }

            self.remove_closed();
        }

        self.running.store(false, SeqCst);
        drop(listener);

        for connection in self.connections.clear().iter() {
            connection.close();
            self.events
                .dispatch(&ServerEvent::ClientDisconnected(ClientInfo::of(
                    connection,
                )));
        }

        if !pool.await_termination(TERMINATION_TIMEOUT) {
            warn!(
                "{} {} connection thread(s) did not exit in time",
                self.name(),
                pool.active()
            );
        }

        self.events.dispatch(&ServerEvent::Stopped {
            protocol: self.name().to_owned(),
            port,
        });
    }

    /// Accept every connection currently waiting.
    fn accept_pending(
        &self,
        listener: &TcpListener,
        pool: &ConnectionPool,
    ) -> io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if io::ErrorKind::WouldBlock == e.kind() => {
                    return Ok(())
                }
                Err(e)
                    if io::ErrorKind::Interrupted == e.kind()
                        || io::ErrorKind::ConnectionAborted == e.kind() =>
                {
                    continue
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = stream.set_nonblocking(false) {
                warn!("{} {}: {}", self.name(), peer, e);
                continue;
            }

            let handler = match self.factory.create(stream) {
                Ok(handler) => handler,
                Err(e) => {
                    warn!(
                        "{} Failed to set up connection from {}: {}",
                        self.name(),
                        peer,
                        e
                    );
                    continue;
                }
            };

            let connection = Arc::clone(handler.connection());
            self.connections.push(Arc::clone(&connection));
            if let Err(e) = pool.spawn(
                format!("{}-{}", self.name(), connection.id()),
                move || handler.run(),
            ) {
                error!(
                    "{} Failed to start connection thread: {}",
                    self.name(),
                    e
                );
                connection.close();
                self.connections
                    .remove_where(|c| c.id() == connection.id());
                continue;
            }

            info!("{} Accepted connection from {}", self.name(), peer);
            self.events
                .dispatch(&ServerEvent::ClientConnected(ClientInfo::of(
                    &connection,
                )));
        }
    }

    fn remove_closed(&self) {
        for connection in self.connections.remove_where(|c| c.is_closed()) {
            self.events
                .dispatch(&ServerEvent::ClientDisconnected(ClientInfo::of(
                    &connection,
                )));
        }
    }

    fn sweep_timeouts(self: Arc<Self>, timeout: Duration) {
        while self.running.load(SeqCst) {
            thread::sleep(TIMEOUT_SWEEP_INTERVAL);

            for connection in self.connections.snapshot().iter() {
                if connection.is_running()
                    && connection.idle_time() > timeout
                    && connection.close()
                {
                    info!("{} Idle timeout", connection.log_prefix());
                    self.events.dispatch(&ServerEvent::ClientTimeout(
                        ClientInfo::of(connection),
                    ));
                }
            }
        }
    }
}
