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

//! The SMTP server.
//!
//! Accepted mail is handed to a `DeliveryQueue`, which by default is a
//! `TransmissionQueue` storing it in the maildrops of local users.

pub mod codes;
mod server;
pub mod syntax;
pub mod transmission;

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use self::server::Smtp;
pub use self::transmission::{DeliveryQueue, Envelope, TransmissionQueue};
use crate::maildrop::MaildropFactory;
use crate::protocol::{
    Channel, Commands, LineHandler, ProtocolFactory, ProtocolHandler,
};
use crate::support::error::Error;
use crate::support::system_config::{SmtpConfig, SystemConfig};

pub const NAME: &str = "smtp";

pub struct SmtpFactory {
    config: Arc<SystemConfig>,
    smtp: SmtpConfig,
    host: String,
    queue: Arc<dyn DeliveryQueue>,
}

impl SmtpFactory {
    /// Create a factory whose sessions submit their mail to `queue`.
    pub fn new(
        config: Arc<SystemConfig>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Result<Self, Error> {
        let smtp = config.section(NAME)?;
        let host = config.carrot()?.host;
        Ok(SmtpFactory {
            config,
            smtp,
            host,
            queue,
        })
    }
}

impl ProtocolFactory for SmtpFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn create(
        &self,
        stream: TcpStream,
    ) -> io::Result<Box<dyn ProtocolHandler>> {
        let channel = Channel::open(stream, NAME)?;
        let local_ip = Some(channel.connection.local_addr().ip());
        Ok(Box::new(LineHandler::new(
            channel,
            Commands(Smtp::new(
                Arc::clone(&self.config),
                self.smtp.clone(),
                self.host.clone(),
                local_ip,
                Arc::clone(&self.queue),
            )),
        )))
    }
}

/// Build an SMTP factory delivering through a new `TransmissionQueue`.
pub fn factory(
    config: &Arc<SystemConfig>,
) -> Result<Arc<dyn ProtocolFactory>, Error> {
    let carrot = config.carrot()?;
    let smtp: SmtpConfig = config.section(NAME)?;
    let queue = TransmissionQueue::new(
        Arc::clone(config),
        &smtp,
        carrot.host.clone(),
        MaildropFactory::from_config(&carrot),
    );

    Ok(Arc::new(SmtpFactory::new(
        Arc::clone(config),
        Arc::new(queue),
    )?))
}
