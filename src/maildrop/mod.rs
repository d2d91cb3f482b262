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

//! Mail storage.
//!
//! Every user has a maildrop directory under the maildrop root, holding one
//! `*.eml` file per message and, while a POP3 session has it open, a `.lock`
//! file. Deleted mail goes to a per-user directory inside the trash
//! directory, which is itself a child of the maildrop root:
//!
//! ```text
//! <data>/maildrop/<user>/*.eml
//! <data>/maildrop/<user>/.lock
//! <data>/maildrop/_trash/<user>/*.eml
//! ```

pub mod address;
pub mod lock;
pub mod mail;
#[allow(clippy::module_inception)]
pub mod maildrop;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

pub use self::address::MailAddress;
pub use self::lock::LockMode;
pub use self::mail::Mail;
pub use self::maildrop::Maildrop;

use crate::support::error::Error;
use crate::support::file_ops::IgnoreKinds;
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::CarrotConfig;

/// Locates and opens maildrops.
#[derive(Clone, Debug)]
pub struct MaildropFactory {
    root: PathBuf,
    trash: String,
    lock_mode: LockMode,
}

impl MaildropFactory {
    pub fn new(
        root: impl Into<PathBuf>,
        trash: impl Into<String>,
        lock_mode: LockMode,
    ) -> Self {
        MaildropFactory {
            root: root.into(),
            trash: trash.into(),
            lock_mode,
        }
    }

    pub fn from_config(config: &CarrotConfig) -> Self {
        Self::new(
            config.maildrop_root(),
            config.trash.clone(),
            if config.exclusive_lock {
                LockMode::Exclusive
            } else {
                LockMode::Advisory
            },
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The maildrop directory of `user`.
    ///
    /// Fails with `UnsafeName` if `user` cannot be used as a directory name
    /// or would collide with the trash.
    pub fn user_dir(&self, user: &str) -> Result<PathBuf, Error> {
        if !is_safe_name(user) || user == self.trash {
            return Err(Error::UnsafeName);
        }

        Ok(self.root.join(user))
    }

    /// The trash directory of `user`.
    pub fn trash_dir(&self, user: &str) -> Result<PathBuf, Error> {
        if !is_safe_name(user) {
            return Err(Error::UnsafeName);
        }

        Ok(self.root.join(&self.trash).join(user))
    }

    /// Open the maildrop of `user`, creating it if necessary.
    ///
    /// The maildrop is scanned but not locked.
    pub fn open(&self, user: &str) -> Result<Maildrop, Error> {
        Maildrop::open(
            user.to_owned(),
            self.user_dir(user)?,
            self.trash_dir(user)?,
            self.lock_mode,
        )
    }

    /// Store a new message for `user` without opening the maildrop,
    /// returning the message id.
    ///
    /// This works whether or not the maildrop is locked.
    pub fn deliver(&self, user: &str, content: &str) -> Result<String, Error> {
        maildrop::create_mail_in(&self.user_dir(user)?, content)
    }

    /// Remove lock files left behind by sessions that never finished, such
    /// as when the process was killed.
    ///
    /// Only call this while no POP3 session is running. Returns the number
    /// of locks removed.
    pub fn remove_stale_locks(&self) -> Result<usize, Error> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || entry.file_name() == *self.trash
            {
                continue;
            }

            let lock = entry.path().join(".lock");
            if lock.is_file() {
                fs::remove_file(&lock).ignore_not_found()?;
                info!("Removed stale lock {}", lock.display());
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Restore the trashed mail of each user in `users`, returning the total
    /// number of messages restored.
    pub fn restore_trash<'a>(
        &self,
        users: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, Error> {
        let mut total = 0;
        for user in users {
            let restored = maildrop::restore_trash(
                &self.trash_dir(user)?,
                &self.user_dir(user)?,
            )?;
            if restored > 0 {
                info!("{}: restored {} message(s) from trash", user, restored);
            }
            total += restored;
        }

        Ok(total)
    }
}
