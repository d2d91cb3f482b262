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

//! The framework shared by every protocol Carrot speaks.

pub mod chat;
pub mod command;
pub mod connection;
pub mod echo;
pub mod error;
pub mod line;
pub mod registry;

use std::sync::Arc;

pub use self::command::{CommandLine, CommandProtocol, Commands};
pub use self::connection::Connection;
pub use self::error::{CommandError, CommandResult, ProtocolError};
pub use self::line::{Channel, LineHandler, LineProtocol, Outbound, Session};
pub use self::registry::{ProtocolFactory, ProtocolRegistry};

/// The task serving one connection.
pub trait ProtocolHandler: Send {
    fn connection(&self) -> &Arc<Connection>;

    /// Serve the connection until it ends.
    fn run(self: Box<Self>);
}
