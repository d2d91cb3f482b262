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
use std::sync::Arc;

use chrono::prelude::*;
use log::{error, info, warn};

use crate::maildrop::{Maildrop, MaildropFactory};
use crate::protocol::line::stuff_dot;
use crate::protocol::{
    CommandError, CommandLine, CommandProtocol, CommandResult, ProtocolError,
    Session,
};
use crate::support::digest::md5_hex;
use crate::support::error::Error;
use crate::support::system_config::{Pop3Config, SystemConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Authorization,
    Transaction,
    Update,
}

fn err(message: &str) -> CommandError {
    ProtocolError::message(message).into()
}

fn operation_failed() -> CommandError {
    err("operation failed with an error")
}

/// Parse a message number argument.
fn message_number(arg: &str) -> Result<usize, CommandError> {
    if arg.is_empty() {
        Err(err("missing argument"))
    } else {
        arg.parse().map_err(|_| err("no such message"))
    }
}

/// One POP3 session.
pub(super) struct Pop3 {
    config: Arc<SystemConfig>,
    pop3: Pop3Config,
    host: String,
    maildrops: MaildropFactory,

    state: State,
    /// The APOP challenge sent in the greeting.
    challenge: String,
    username: Option<String>,
    maildrop: Option<Maildrop>,
}

impl Pop3 {
    pub(super) fn new(
        config: Arc<SystemConfig>,
        pop3: Pop3Config,
        host: String,
        maildrops: MaildropFactory,
    ) -> Self {
        Pop3 {
            config,
            pop3,
            host,
            maildrops,
            state: State::Authorization,
            challenge: String::new(),
            username: None,
            maildrop: None,
        }
    }

    fn require_state(&self, state: State) -> Result<(), CommandError> {
        if state == self.state {
            Ok(())
        } else {
            Err(err("command invalid in this state"))
        }
    }

    /// The open maildrop, provided the session is in the transaction state.
    fn maildrop(&mut self) -> Result<&mut Maildrop, CommandError> {
        if State::Transaction != self.state {
            return Err(err("command invalid in this state"));
        }

        self.maildrop
            .as_mut()
            .ok_or_else(|| err("command invalid in this state"))
    }

    /// Convert a storage error to the reply for the client.
    fn storage_error(&self, e: Error, session: &Session) -> CommandError {
        match e {
            Error::NoSuchMessage(_) => err("no such message"),
            e => {
                error!(
                    "{} Maildrop operation failed: {}",
                    session.connection().log_prefix(),
                    e
                );
                operation_failed()
            }
        }
    }

    fn cmd_capa(&self, session: &Session) -> CommandResult {
        let mut lines = vec!["+OK Listing capabilities".to_owned()];
        lines.extend(
            self.pop3
                .capabilities
                .iter()
                .filter(|c| !c.eq_ignore_ascii_case("APOP"))
                .cloned(),
        );
        lines.push(".".to_owned());
        session.send_lines(lines)?;
        Ok(())
    }

    fn cmd_user(&mut self, name: String, session: &Session) -> CommandResult {
        self.require_state(State::Authorization)?;
        if name.is_empty() {
            return Err(err("missing argument"));
        }

        self.username = Some(name);
        session.send("+OK")?;
        Ok(())
    }

    fn cmd_pass(&mut self, secret: &str, session: &Session) -> CommandResult {
        self.require_state(State::Authorization)?;

        let username = match self.username.take() {
            Some(username) => username,
            None => return Err(err("no username given")),
        };

        if self.config.user_secret(&username).as_deref() != Some(secret) {
            info!(
                "{} Failed login for {}",
                session.connection().log_prefix(),
                username
            );
            return Err(err("authentication failed"));
        }

        self.username = Some(username.clone());
        self.log_in(username, session)
    }

    fn cmd_apop(
        &mut self,
        command: &CommandLine,
        session: &Session,
    ) -> CommandResult {
        self.require_state(State::Authorization)?;

        let args = command.args();
        if 2 != args.len() {
            return Err(err("wrong number of arguments"));
        }

        let (username, digest) = (args[0].to_owned(), args[1]);
        let secret = match self.config.user_secret(&username) {
            Some(secret) => secret,
            None => return Err(err("authentication failed")),
        };

        let expected =
            md5_hex(format!("{}{}", self.challenge, secret).as_bytes())
                .map_err(|e| {
                    error!(
                        "{} Unable to compute APOP digest: {}",
                        session.connection().log_prefix(),
                        e
                    );
                    operation_failed()
                })?;
        if !expected.eq_ignore_ascii_case(digest) {
            info!(
                "{} Failed APOP login for {}",
                session.connection().log_prefix(),
                username
            );
            return Err(err("authentication failed"));
        }

        self.username = Some(username.clone());
        self.log_in(username, session)
    }

    /// Open and lock the maildrop of `username`, who has just been
    /// authenticated.
    fn log_in(&mut self, username: String, session: &Session) -> CommandResult {
        let log_prefix = session.connection().log_prefix();

        let mut maildrop = match self.maildrops.open(&username) {
            Ok(maildrop) => maildrop,
            Err(e) => {
                self.username = None;
                error!(
                    "{} Could not open maildrop of {}: {}",
                    log_prefix, username, e
                );
                return Err(operation_failed());
            }
        };

        match maildrop.lock() {
            Ok(()) => (),
            Err(Error::MailboxLocked) => {
                self.username = None;
                warn!("{} Maildrop of {} is in use", log_prefix, username);
                return Err(err("maildrop already in use"));
            }
            Err(e) => {
                self.username = None;
                error!(
                    "{} Could not lock maildrop of {}: {}",
                    log_prefix, username, e
                );
                return Err(operation_failed());
            }
        }

        log_prefix.set_user(username.clone());
        info!("{} Logged in", log_prefix);
        self.maildrop = Some(maildrop);
        self.state = State::Transaction;
        session.send(&format!("+OK welcome {}", username))?;
        Ok(())
    }

    fn cmd_stat(&mut self, session: &Session) -> CommandResult {
        let maildrop = self.maildrop()?;
        let reply = format!("+OK {} {}", maildrop.count(), maildrop.size());
        session.send(&reply)?;
        Ok(())
    }

    fn cmd_list(&mut self, arg: &str, session: &Session) -> CommandResult {
        self.maildrop()?;

        if !arg.is_empty() {
            let number = message_number(arg)?;
            let size = self
                .maildrop()?
                .size_of(number)
                .map_err(|e| self.storage_error(e, session))?;
            session.send(&format!("+OK {} {}", number, size))?;
            return Ok(());
        }

        let mails = match self.maildrop()?.list_mails() {
            Ok(mails) => mails,
            Err(e) => return Err(self.storage_error(e, session)),
        };
        let maildrop = self.maildrop()?;
        let mut lines =
            vec![format!("+OK {} {}", maildrop.count(), maildrop.size())];
        lines.extend(
            mails
                .iter()
                .map(|mail| format!("{} {}", mail.number(), mail.size())),
        );
        lines.push(".".to_owned());
        session.send_lines(lines)?;
        Ok(())
    }

    fn message_lines(
        &mut self,
        number: usize,
        session: &Session,
    ) -> Result<(u64, Vec<String>), CommandError> {
        let maildrop = self.maildrop()?;
        let result = maildrop
            .size_of(number)
            .and_then(|size| Ok((size, maildrop.lines(number)?)));
        result.map_err(|e| self.storage_error(e, session))
    }

    fn cmd_retr(&mut self, arg: &str, session: &Session) -> CommandResult {
        self.maildrop()?;
        let number = message_number(arg)?;
        let (size, text) = self.message_lines(number, session)?;

        let mut lines = Vec::with_capacity(text.len() + 2);
        lines.push(format!("+OK {} octets", size));
        lines.extend(text.iter().map(|line| stuff_dot(line).into_owned()));
        lines.push(".".to_owned());
        session.send_lines(lines)?;
        Ok(())
    }

    fn cmd_top(
        &mut self,
        command: &CommandLine,
        session: &Session,
    ) -> CommandResult {
        self.maildrop()?;

        let args = command.args();
        if args.is_empty() {
            return Err(err("missing argument"));
        } else if 2 != args.len() {
            return Err(err("wrong number of arguments"));
        }

        let number = message_number(args[0])?;
        let body_lines: usize =
            args[1].parse().map_err(|_| err("no such message"))?;
        let (_, text) = self.message_lines(number, session)?;

        let header_len = text
            .iter()
            .position(|line| line.is_empty())
            .map_or(text.len(), |blank| blank + 1);

        let mut lines = vec!["+OK top of message follows".to_owned()];
        lines.extend(
            text.iter()
                .take(header_len + body_lines)
                .map(|line| stuff_dot(line).into_owned()),
        );
        lines.push(".".to_owned());
        session.send_lines(lines)?;
        Ok(())
    }

    fn cmd_uidl(&mut self, arg: &str, session: &Session) -> CommandResult {
        let hashed = self.pop3.uidl_hash;
        self.maildrop()?;

        if !arg.is_empty() {
            let number = message_number(arg)?;
            let uid = self
                .maildrop()?
                .unique_id(number, hashed)
                .map_err(|e| self.storage_error(e, session))?;
            session.send(&format!("+OK {} {}", number, uid))?;
            return Ok(());
        }

        let mails = match self.maildrop()?.list_mails() {
            Ok(mails) => mails,
            Err(e) => return Err(self.storage_error(e, session)),
        };

        let mut lines = vec!["+OK".to_owned()];
        for mail in mails {
            let uid = match self.maildrop()?.unique_id(mail.number(), hashed) {
                Ok(uid) => uid,
                Err(e) => return Err(self.storage_error(e, session)),
            };
            lines.push(format!("{} {}", mail.number(), uid));
        }
        lines.push(".".to_owned());
        session.send_lines(lines)?;
        Ok(())
    }

    fn cmd_dele(&mut self, arg: &str, session: &Session) -> CommandResult {
        self.maildrop()?;
        let number = message_number(arg)?;
        if let Err(e) = self.maildrop()?.delete(number) {
            return Err(self.storage_error(e, session));
        }

        info!(
            "{} Marked message {} for deletion",
            session.connection().log_prefix(),
            number
        );
        session.send("+OK mail marked for deletion")?;
        Ok(())
    }

    fn cmd_rset(&mut self, session: &Session) -> CommandResult {
        self.maildrop()?.reset_deleted();
        session.send("+OK deleted mails restored")?;
        Ok(())
    }

    fn cmd_noop(&mut self, session: &Session) -> CommandResult {
        self.maildrop()?;
        session.send("+OK")?;
        Ok(())
    }

    fn cmd_quit(&mut self, session: &Session) -> CommandResult {
        let reply = match self.maildrop.take() {
            None => "+OK bye",
            Some(mut maildrop) => {
                self.state = State::Update;
                let log_prefix = session.connection().log_prefix();

                let reply = match maildrop.execute_delete() {
                    Ok(()) => "+OK bye",
                    Err(e) => {
                        error!(
                            "{} Failed to move mail to trash: {}",
                            log_prefix, e
                        );
                        "-ERR failed to delete some mails"
                    }
                };

                if let Err(e) = maildrop.unlock() {
                    error!("{} Failed to unlock maildrop: {}", log_prefix, e);
                }
                reply
            }
        };

        session.send(reply)?;
        session.stop();
        Ok(())
    }
}

impl CommandProtocol for Pop3 {
    fn handle_connect(&mut self, session: &mut Session) -> io::Result<()> {
        self.challenge =
            format!("<{}@{}>", Utc::now().timestamp_millis(), self.host);

        let greeting = if self.pop3.enable_apop {
            format!(
                "+OK Welcome to Carrot (v{}) {}",
                env!("CARGO_PKG_VERSION"),
                self.challenge
            )
        } else {
            format!("+OK Welcome to Carrot (v{})", env!("CARGO_PKG_VERSION"))
        };
        session.send(&greeting)
    }

    fn handle_command(
        &mut self,
        command: CommandLine,
        session: &mut Session,
    ) -> CommandResult {
        let name = command.command.to_ascii_uppercase();
        let capability = match name.as_str() {
            "USER" | "PASS" => Some("USER"),
            "APOP" => Some("APOP"),
            "TOP" => Some("TOP"),
            "UIDL" => Some("UIDL"),
            "CAPA" => Some("CAPA"),
            _ => None,
        };
        if capability.map_or(false, |c| !self.pop3.has_capability(c)) {
            return Err(err(&format!("unknown command: {}", name)));
        }

        match name.as_str() {
            "CAPA" => self.cmd_capa(session),
            "USER" => self.cmd_user(command.value, session),
            "PASS" => self.cmd_pass(&command.value, session),
            "APOP" => self.cmd_apop(&command, session),
            "STAT" => self.cmd_stat(session),
            "LIST" => self.cmd_list(&command.value, session),
            "RETR" => self.cmd_retr(&command.value, session),
            "TOP" => self.cmd_top(&command, session),
            "UIDL" => self.cmd_uidl(&command.value, session),
            "DELE" => self.cmd_dele(&command.value, session),
            "RSET" => self.cmd_rset(session),
            "NOOP" => self.cmd_noop(session),
            "QUIT" => self.cmd_quit(session),
            _ => Err(err(&format!("unknown command: {}", name))),
        }
    }

    /// Without QUIT, nothing marked for deletion is deleted.
    fn handle_disconnect(&mut self, session: &mut Session) {
        if let Some(mut maildrop) = self.maildrop.take() {
            if let Err(e) = maildrop.unlock() {
                error!(
                    "{} Failed to unlock maildrop: {}",
                    session.connection().log_prefix(),
                    e
                );
            }
        }
    }

    fn send_error(
        &mut self,
        error: &ProtocolError,
        session: &mut Session,
    ) -> io::Result<()> {
        session.send(&format!("-ERR {}", error.text()))
    }
}
