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

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use nix::sys::signal::{SigSet, Signal};

use crate::protocol::ProtocolRegistry;
use crate::server::{LoggingListener, Server};
use crate::support::system_config::{CarrotConfig, SystemConfig};

// Log the error rather than printing it, so it ends up wherever the rest of
// the log goes
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub(super) fn serve(config: SystemConfig, carrot: CarrotConfig) {
    let config = Arc::new(config);

    let bind: IpAddr = match carrot.bind.parse() {
        Ok(bind) => bind,
        Err(e) => fatal!(
            EX_CONFIG,
            "Bad bind address '{}': {}",
            carrot.bind,
            e
        ),
    };

    let selected = match ProtocolRegistry::builtin().select(&config) {
        Ok(selected) => selected,
        Err(e) => fatal!(EX_CONFIG, "Unable to set up protocols: {}", e),
    };
    if selected.is_empty() {
        fatal!(EX_CONFIG, "No known protocol is configured to be served");
    }

    // Block the signals before any thread is spawned so that every thread
    // inherits the mask and only the wait below sees them.
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    if let Err(e) = signals.thread_block() {
        fatal!(EX_OSERR, "Unable to block signals: {}", e);
    }

    let timeout = Duration::from_millis(carrot.timeout);
    let servers = selected
        .into_iter()
        .map(|protocol| {
            let server = Server::new(protocol.factory, protocol.port);
            server.set_bind_address(bind);
            server.set_connection_timeout(timeout);
            server.add_listener(LoggingListener);
            server
        })
        .collect::<Vec<_>>();

    let mut started = 0;
    for server in &servers {
        match server.start() {
            Ok(()) => {
                info!(
                    "{} Listening on {}:{}",
                    server.name(),
                    bind,
                    server.port()
                );
                started += 1;
            }
            Err(e) => error!("{} Failed to start: {}", server.name(), e),
        }
    }

    if 0 == started {
        fatal!(EX_UNAVAILABLE, "No server could be started");
    }

    match signals.wait() {
        Ok(signal) => info!("Received {:?}, shutting down", signal),
        Err(e) => error!("Failed to wait for signals, shutting down: {}", e),
    }

    for server in &servers {
        server.close();
    }
    for server in &servers {
        server.join();
    }

    info!("All servers stopped");
}
