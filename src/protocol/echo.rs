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

//! The echo protocol: every line is sent straight back.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use super::line::{Channel, LineHandler, LineProtocol, Session};
use super::registry::ProtocolFactory;
use super::ProtocolHandler;
use crate::support::error::Error;
use crate::support::system_config::{EchoConfig, SystemConfig};

pub const NAME: &str = "echo";

struct Echo {
    message_format: String,
}

impl LineProtocol for Echo {
    fn handle_message(
        &mut self,
        line: String,
        session: &mut Session,
    ) -> io::Result<()> {
        if self.message_format.is_empty() {
            session.send(&line)
        } else {
            session.send(&self.message_format.replace("{}", &line))
        }
    }
}

pub struct EchoFactory {
    config: EchoConfig,
}

impl EchoFactory {
    pub fn new(config: EchoConfig) -> Self {
        EchoFactory { config }
    }
}

impl ProtocolFactory for EchoFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn create(
        &self,
        stream: TcpStream,
    ) -> io::Result<Box<dyn ProtocolHandler>> {
        let channel = Channel::open(stream, NAME)?;
        Ok(Box::new(LineHandler::new(
            channel,
            Echo {
                message_format: self.config.message_format.clone(),
            },
        )))
    }
}

pub fn factory(
    config: &Arc<SystemConfig>,
) -> Result<Arc<dyn ProtocolFactory>, Error> {
    Ok(Arc::new(EchoFactory::new(config.section(NAME)?)))
}
