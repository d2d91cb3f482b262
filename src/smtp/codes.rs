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

//! Reply codes from RFC 5321.
//!
//! The module is designed to be wildcard-imported through `pc`, so that the
//! codes read the same way everywhere.

use crate::protocol::{CommandError, ProtocolError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PrimaryCode {
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    BadSequenceOfCommands = 503,
    ServiceReady = 220,
    ServiceClosing = 221,
    ServiceNotAvailableClosing = 421,
    Ok = 250,
    ActionNotTakenPermanent = 550,
    StartMailInput = 354,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

impl PrimaryCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Format a complete reply line.
    pub fn reply(self, message: &str) -> String {
        format!("{} {}", self.code(), message)
    }

    /// An error to return from a command, which will be sent as this code
    /// followed by `message`.
    pub fn error(self, message: impl Into<String>) -> CommandError {
        ProtocolError::new(self.code(), message).into()
    }
}
