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

//! The POP3 server.

#[cfg(test)]
mod integration_tests;
mod server;

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use log::info;

use self::server::Pop3;
use crate::maildrop::MaildropFactory;
use crate::protocol::{
    Channel, Commands, LineHandler, ProtocolFactory, ProtocolHandler,
};
use crate::support::error::Error;
use crate::support::system_config::{Pop3Config, SystemConfig};

pub const NAME: &str = "pop3";

pub struct Pop3Factory {
    config: Arc<SystemConfig>,
    pop3: Pop3Config,
    host: String,
    maildrops: MaildropFactory,
}

impl Pop3Factory {
    pub fn new(config: Arc<SystemConfig>) -> Result<Self, Error> {
        let carrot = config.carrot()?;
        let pop3 = config.section(NAME)?;
        Ok(Pop3Factory {
            maildrops: MaildropFactory::from_config(&carrot),
            host: carrot.host,
            pop3,
            config,
        })
    }

    pub fn maildrops(&self) -> &MaildropFactory {
        &self.maildrops
    }
}

impl ProtocolFactory for Pop3Factory {
    fn name(&self) -> &str {
        NAME
    }

    /// Clear out locks left over from an earlier run, and restore the trash
    /// if so configured.
    fn start(&self) -> Result<(), Error> {
        let stale = self.maildrops.remove_stale_locks()?;
        if stale > 0 {
            info!("{} Removed {} stale maildrop lock(s)", NAME, stale);
        }

        if self.pop3.restore_trash_on_start {
            let users = self.config.user_names();
            let restored = self
                .maildrops
                .restore_trash(users.iter().map(String::as_str))?;
            info!("{} Restored {} message(s) from trash", NAME, restored);
        }

        Ok(())
    }

    fn create(
        &self,
        stream: TcpStream,
    ) -> io::Result<Box<dyn ProtocolHandler>> {
        let channel = Channel::open(stream, NAME)?;
        Ok(Box::new(LineHandler::new(
            channel,
            Commands(Pop3::new(
                Arc::clone(&self.config),
                self.pop3.clone(),
                self.host.clone(),
                self.maildrops.clone(),
            )),
        )))
    }
}

pub fn factory(
    config: &Arc<SystemConfig>,
) -> Result<Arc<dyn ProtocolFactory>, Error> {
    Ok(Arc::new(Pop3Factory::new(Arc::clone(config))?))
}
