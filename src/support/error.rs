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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsafe user or mailbox name")]
    UnsafeName,
    #[error("No such message: {0}")]
    NoSuchMessage(usize),
    #[error("Maildrop already locked")]
    MailboxLocked,
    #[error("Failed to move {0} message(s) to the trash")]
    IncompleteDelete(usize),
    #[error("Port number {0} out of range")]
    PortOutOfRange(i64),
    #[error("Bad configuration: {0}")]
    BadConfig(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
}
