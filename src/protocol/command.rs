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

use super::error::{CommandError, CommandResult, ProtocolError};
use super::line::{LineProtocol, Session};

/// One line of client input, split into a command word and its argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    /// The first word of the line, as sent. Empty when the line was not
    /// parsed as a command.
    pub command: String,
    /// Everything after the first run of whitespace, trimmed.
    pub value: String,
    /// The line exactly as received.
    pub raw: String,
}

impl CommandLine {
    pub fn parse(raw: String) -> Self {
        let trimmed = raw.trim();
        let (command, value) =
            match trimmed.find(|c: char| c.is_ascii_whitespace()) {
                Some(ix) => (&trimmed[..ix], trimmed[ix..].trim()),
                None => (trimmed, ""),
            };
        let command = command.to_owned();
        let value = value.to_owned();

        CommandLine {
            command,
            value,
            raw,
        }
    }

    /// Wrap a line without interpreting it; the whole line becomes the
    /// value.
    pub fn unparsed(raw: String) -> Self {
        CommandLine {
            command: String::new(),
            value: raw.clone(),
            raw,
        }
    }

    /// Whether the command word is `name`, ignoring case.
    pub fn is(&self, name: &str) -> bool {
        self.command.eq_ignore_ascii_case(name)
    }

    /// Split the value into whitespace-separated arguments.
    pub fn args(&self) -> Vec<&str> {
        self.value.split_ascii_whitespace().collect()
    }
}

/// A line protocol whose lines are commands.
///
/// `ProtocolError`s returned by `handle_command()` are reported to the
/// client through `send_error()` and the session carries on.
pub trait CommandProtocol: Send {
    fn handle_connect(&mut self, _session: &mut Session) -> io::Result<()> {
        Ok(())
    }

    fn handle_command(
        &mut self,
        command: CommandLine,
        session: &mut Session,
    ) -> CommandResult;

    fn handle_disconnect(&mut self, _session: &mut Session) {}

    /// Whether the next line should be split into a command. When false,
    /// the line is passed through `CommandLine::unparsed()`.
    fn parse_commands(&self) -> bool {
        true
    }

    fn send_error(
        &mut self,
        error: &ProtocolError,
        session: &mut Session,
    ) -> io::Result<()> {
        session.send(&error.to_string())
    }
}

/// Adapts a `CommandProtocol` to a `LineProtocol`.
pub struct Commands<P>(pub P);

impl<P: CommandProtocol> LineProtocol for Commands<P> {
    fn handle_connect(&mut self, session: &mut Session) -> io::Result<()> {
        self.0.handle_connect(session)
    }

    fn handle_message(
        &mut self,
        line: String,
        session: &mut Session,
    ) -> io::Result<()> {
        let command = if self.0.parse_commands() {
            CommandLine::parse(line)
        } else {
            CommandLine::unparsed(line)
        };

        match self.0.handle_command(command, session) {
            Ok(()) => Ok(()),
            Err(CommandError::Protocol(e)) => self.0.send_error(&e, session),
            Err(CommandError::Io(e)) => Err(e),
        }
    }

    fn handle_disconnect(&mut self, session: &mut Session) {
        self.0.handle_disconnect(session)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_command_lines() {
        let cl = CommandLine::parse("RETR 1".to_owned());
        assert_eq!("RETR", cl.command);
        assert_eq!("1", cl.value);
        assert!(cl.is("retr"));

        let cl = CommandLine::parse("  top\t2   10  ".to_owned());
        assert_eq!("top", cl.command);
        assert_eq!("2   10", cl.value);
        assert_eq!(vec!["2", "10"], cl.args());
        assert_eq!("  top\t2   10  ", cl.raw);

        let cl = CommandLine::parse("QUIT".to_owned());
        assert_eq!("QUIT", cl.command);
        assert_eq!("", cl.value);
        assert!(cl.args().is_empty());

        let cl = CommandLine::parse("".to_owned());
        assert_eq!("", cl.command);
        assert_eq!("", cl.value);

        let cl = CommandLine::unparsed(" .hello ".to_owned());
        assert_eq!("", cl.command);
        assert_eq!(" .hello ", cl.value);
    }
}
