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

//! A minimal chat room.
//!
//! Everyone connected to the chat server is in the same room. A client
//! picks a nickname with `NAME <nick>`, after which every line it sends is
//! relayed to everyone else as `<nick>: <line>`. `QUIT` leaves.

use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use log::debug;

use super::command::{CommandLine, CommandProtocol, Commands};
use super::connection::Connection;
use super::error::{CommandResult, ProtocolError};
use super::line::{Channel, LineHandler, Outbound, Session};
use super::registry::ProtocolFactory;
use super::ProtocolHandler;
use crate::support::cow_list::CowList;
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

pub const NAME: &str = "chat";

struct Member {
    connection: Arc<Connection>,
    outbound: Outbound,
    nickname: Mutex<Option<String>>,
}

impl Member {
    fn has_nickname(&self, nickname: &str) -> bool {
        self.nickname
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |n| n.eq_ignore_ascii_case(nickname))
    }
}

/// The clients connected to one chat server.
#[derive(Default)]
pub struct ChatRoom {
    members: CowList<Arc<Member>>,
    naming: Mutex<()>,
}

impl ChatRoom {
    pub fn new() -> Self {
        Self::default()
    }

    fn join(&self, connection: Arc<Connection>, outbound: Outbound) {
        self.members.push(Arc::new(Member {
            connection,
            outbound,
            nickname: Mutex::new(None),
        }));
    }

    fn leave(&self, id: u64) {
        self.members.remove_where(|m| id == m.connection.id());
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Give member `id` the nickname `nickname`, unless someone else
    /// already has it (ignoring case).
    fn claim_nickname(&self, id: u64, nickname: &str) -> bool {
        let _naming = self.naming.lock().unwrap();
        let members = self.members.snapshot();
        if members.iter().any(|m| m.has_nickname(nickname)) {
            return false;
        }

        if let Some(member) = members.iter().find(|m| id == m.connection.id()) {
            *member.nickname.lock().unwrap() = Some(nickname.to_owned());
        }
        true
    }

    /// Send `<nickname>: <message>` to every member except `source`.
    fn broadcast_others(&self, source: u64, nickname: &str, message: &str) {
        self.members.remove_where(|m| m.connection.is_closed());

        let line = format!("{}: {}", nickname, message);
        for member in self.members.snapshot().iter() {
            if source == member.connection.id() {
                continue;
            }

            if let Err(e) = member.outbound.send(&line) {
                debug!(
                    "{} Failed to relay chat message: {}",
                    member.connection.log_prefix(),
                    e
                );
            }
        }
    }
}

struct Chat {
    room: Arc<ChatRoom>,
    nickname: Option<String>,
}

impl Chat {
    fn id(session: &Session) -> u64 {
        session.connection().id()
    }
}

impl CommandProtocol for Chat {
    fn handle_connect(&mut self, session: &mut Session) -> io::Result<()> {
        session
            .send("Welcome to the chat. Please set a nickname with NAME first.")
    }

    fn handle_command(
        &mut self,
        command: CommandLine,
        session: &mut Session,
    ) -> CommandResult {
        if command.is("QUIT") {
            session.stop();
        } else if command.is("NAME") {
            if self.nickname.is_some() {
                return Err(ProtocolError::message(
                    "You already set a nickname that can't be changed.",
                )
                .into());
            }

            let nickname = command.value;
            if nickname.is_empty() {
                return Err(
                    ProtocolError::message("Nickname must not be empty.").into()
                );
            }

            if !self.room.claim_nickname(Self::id(session), &nickname) {
                return Err(
                    ProtocolError::message("Nickname already in use.").into()
                );
            }

            session.connection().log_prefix().set_user(nickname.clone());
            session.send(&format!("+ Hello {}", nickname))?;
            self.room.broadcast_others(
                Self::id(session),
                &nickname,
                &format!("{} joined the chat", nickname),
            );
            self.nickname = Some(nickname);
        } else {
            match self.nickname {
                None => {
                    return Err(ProtocolError::message(
                        "You need to set a nickname with NAME before \
                         sending messages.",
                    )
                    .into())
                }
                Some(ref nickname) => self.room.broadcast_others(
                    Self::id(session),
                    nickname,
                    &command.raw,
                ),
            }
        }

        Ok(())
    }

    fn handle_disconnect(&mut self, session: &mut Session) {
        let _ = session.send("Goodbye. Hope you enjoyed your chat.");
        self.room.leave(Self::id(session));
        if let Some(ref nickname) = self.nickname {
            self.room.broadcast_others(
                Self::id(session),
                nickname,
                &format!("{} left the chat", nickname),
            );
        }
    }

    fn send_error(
        &mut self,
        error: &ProtocolError,
        session: &mut Session,
    ) -> io::Result<()> {
        session.send(&format!("- {}", error.text()))
    }
}

#[derive(Default)]
pub struct ChatFactory {
    room: Arc<ChatRoom>,
}

impl ChatFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self) -> &Arc<ChatRoom> {
        &self.room
    }
}

impl ProtocolFactory for ChatFactory {
    fn name(&self) -> &str {
        NAME
    }

    fn create(
        &self,
        stream: TcpStream,
    ) -> io::Result<Box<dyn ProtocolHandler>> {
        let channel = Channel::open(stream, NAME)?;
        self.room
            .join(Arc::clone(&channel.connection), channel.outbound.clone());
        Ok(Box::new(LineHandler::new(
            channel,
            Commands(Chat {
                room: Arc::clone(&self.room),
                nickname: None,
            }),
        )))
    }
}

pub fn factory(
    _config: &Arc<SystemConfig>,
) -> Result<Arc<dyn ProtocolFactory>, Error> {
    Ok(Arc::new(ChatFactory::new()))
}
