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
use std::mem;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, info};

use super::codes::*;
use super::syntax::{self, PathArg};
use super::transmission::{DeliveryQueue, Envelope};
use crate::maildrop::MailAddress;
use crate::protocol::line::unstuff_dot;
use crate::protocol::{CommandLine, CommandProtocol, CommandResult, Session};
use crate::support::system_config::{SmtpConfig, SystemConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    Rcpt,
    Data,
    Quit,
}

/// One SMTP session.
pub(super) struct Smtp {
    config: Arc<SystemConfig>,
    smtp: SmtpConfig,
    host: String,
    local_ip: Option<IpAddr>,
    queue: Arc<dyn DeliveryQueue>,

    state: State,
    from: Option<MailAddress>,
    recipients: Vec<MailAddress>,
    data: String,
    /// Whether a message is in progress, from MAIL (or the first RCPT of a
    /// follow-up message) until the terminating `.`.
    envelope_open: bool,
}

impl Smtp {
    pub(super) fn new(
        config: Arc<SystemConfig>,
        smtp: SmtpConfig,
        host: String,
        local_ip: Option<IpAddr>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Smtp {
            config,
            smtp,
            host,
            local_ip,
            queue,
            state: State::Init,
            from: None,
            recipients: Vec::new(),
            data: String::new(),
            envelope_open: false,
        }
    }

    fn cmd_helo(&self, origin: String, session: &Session) -> CommandResult {
        session.connection().log_prefix().set_helo(origin);
        session.send(&pc::Ok.reply(&self.host))?;
        Ok(())
    }

    fn cmd_mail(&mut self, value: &str, session: &Session) -> CommandResult {
        if self.envelope_open {
            return Err(pc::BadSequenceOfCommands.error("sender already given"));
        }

        let from = match syntax::reverse_path(value) {
            PathArg::Malformed => {
                return Err(
                    pc::ActionNotTakenPermanent.error("malformed command")
                )
            }
            PathArg::Empty => None,
            PathArg::Path(addr) if addr.is_fully_qualified() => Some(addr),
            PathArg::Path(_) => None,
        };
        let from = match from {
            Some(from) => from,
            None => {
                return Err(pc::ParameterSyntaxError
                    .error("malformed <reverse-path>"))
            }
        };

        info!("{} Mail from {}", session.connection().log_prefix(), from);
        self.from = Some(from);
        self.recipients.clear();
        self.data.clear();
        self.state = State::Rcpt;
        self.envelope_open = true;
        session.send(&pc::Ok.reply("OK"))?;
        Ok(())
    }

    fn cmd_rcpt(&mut self, value: &str, session: &Session) -> CommandResult {
        if State::Rcpt != self.state {
            return Err(pc::BadSequenceOfCommands
                .error("no source mailbox given yet"));
        }

        let recipient = match syntax::forward_path(value) {
            PathArg::Malformed => {
                return Err(
                    pc::ActionNotTakenPermanent.error("malformed command")
                )
            }
            PathArg::Empty => MailAddress::new("", ""),
            PathArg::Path(addr) => addr,
        };

        if self.smtp.accept_any_rcpt || self.is_local_user(&recipient) {
            info!(
                "{} Recipient {}",
                session.connection().log_prefix(),
                recipient
            );
            self.recipients.push(recipient);
            self.envelope_open = true;
            session.send(&pc::Ok.reply("OK"))?;
            Ok(())
        } else {
            Err(pc::ActionNotTakenPermanent.error("Unknown recipient"))
        }
    }

    fn cmd_data(&mut self, session: &Session) -> CommandResult {
        if State::Rcpt != self.state {
            return Err(pc::BadSequenceOfCommands
                .error("no source mailbox given yet"));
        }
        if self.recipients.is_empty() {
            return Err(
                pc::BadSequenceOfCommands.error("no valid recipients given")
            );
        }

        self.data.clear();
        self.state = State::Data;
        session.send(
            &pc::StartMailInput
                .reply("Ready to receive data; end with <CRLF>.<CRLF>"),
        )?;
        Ok(())
    }

    fn data_line(&mut self, line: &str, session: &Session) -> CommandResult {
        if "." != line {
            self.data.push_str(unstuff_dot(line));
            self.data.push_str("\r\n");
            return Ok(());
        }

        self.state = State::Rcpt;
        self.envelope_open = false;
        let from = match self.from {
            Some(ref from) => from.clone(),
            // DATA can't be entered without a sender
            None => return Ok(()),
        };

        let id = self.queue.submit(Envelope {
            from,
            recipients: mem::take(&mut self.recipients),
            content: mem::take(&mut self.data),
            local_ip: self.local_ip,
        });
        info!(
            "{} Message queued as {}",
            session.connection().log_prefix(),
            id
        );
        session.send(
            &pc::Ok.reply(&format!("mail queued for transmission at {}", id)),
        )?;
        Ok(())
    }

    fn cmd_reset(&mut self, session: &Session) -> CommandResult {
        self.state = State::Init;
        self.from = None;
        self.recipients.clear();
        self.data.clear();
        self.envelope_open = false;
        session.send(&pc::Ok.reply("OK"))?;
        Ok(())
    }

    fn cmd_quit(&mut self, session: &Session) -> CommandResult {
        self.state = State::Quit;
        session.send(&pc::ServiceClosing.reply("bye"))?;
        session.stop();
        Ok(())
    }

    fn is_local_user(&self, address: &MailAddress) -> bool {
        address.is_local(&self.host, self.local_ip)
            && self.config.has_user(address.mailbox())
    }
}

impl CommandProtocol for Smtp {
    fn handle_connect(&mut self, session: &mut Session) -> io::Result<()> {
        session.send(&pc::ServiceReady.reply(&format!(
            "{} SMTP ready on Carrot (v{})",
            self.host,
            env!("CARGO_PKG_VERSION")
        )))
    }

    fn handle_command(
        &mut self,
        command: CommandLine,
        session: &mut Session,
    ) -> CommandResult {
        if State::Data == self.state {
            return self.data_line(&command.raw, session);
        }

        match command.command.to_ascii_uppercase().as_str() {
            "HELO" | "EHLO" => self.cmd_helo(command.value, session),
            "MAIL" => self.cmd_mail(&command.value, session),
            "RCPT" => self.cmd_rcpt(&command.value, session),
            "DATA" => self.cmd_data(session),
            "RSET" => self.cmd_reset(session),
            "NOOP" => {
                session.send(&pc::Ok.reply("OK"))?;
                Ok(())
            }
            "QUIT" => self.cmd_quit(session),
            _ => Err(pc::CommandSyntaxError.error("Unknown command")),
        }
    }

    fn handle_disconnect(&mut self, session: &mut Session) {
        if State::Quit != self.state && !session.connection().is_closed() {
            if let Err(e) = session.send(
                &pc::ServiceNotAvailableClosing
                    .reply("connection interrupted, closing down"),
            ) {
                debug!(
                    "{} Failed to send goodbye: {}",
                    session.connection().log_prefix(),
                    e
                );
            }
        }
    }

    fn parse_commands(&self) -> bool {
        State::Data != self.state
    }
}
