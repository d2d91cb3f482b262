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

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

/// A failed command which the client should be told about.
///
/// A `ProtocolError` never ends the connection; it becomes a single reply
/// line. How that line looks is up to the protocol (see
/// `CommandProtocol::send_error`); by default it is `<code> <message>`, or
/// just the message when the code is 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolError {
    code: u16,
    message: String,
}

impl ProtocolError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        ProtocolError {
            code,
            message: message.into(),
        }
    }

    /// An error with a message but no status code.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn text(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if 0 == self.code {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}

impl StdError for ProtocolError {}

/// Why a command handler gave up.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Report to the client and carry on.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The connection is unusable.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CommandResult = Result<(), CommandError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            "503 no source mailbox given yet",
            ProtocolError::new(503, "no source mailbox given yet").to_string()
        );
        assert_eq!(
            "Nickname already in use.",
            ProtocolError::message("Nickname already in use.").to_string()
        );
    }
}
