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

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::support::error::Error;
use crate::support::file_ops::{ErrorTransforms, IgnoreKinds};

/// How a maildrop's `.lock` file is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Check whether the lock file exists, then create it.
    ///
    /// This is what other maildrop software does, and has a window in which
    /// two sessions can both believe they hold the lock.
    Advisory,
    /// Create the lock file with `O_EXCL`, which cannot race.
    Exclusive,
}

/// A sentinel file marking a maildrop as in use.
///
/// Nothing but the existence of the file is significant. A held lock is
/// released when the `LockFile` is dropped.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    mode: LockMode,
    held: bool,
}

impl LockFile {
    pub fn new(path: PathBuf, mode: LockMode) -> Self {
        LockFile {
            path,
            mode,
            held: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, failing with `MailboxLocked` if anyone, including this
    /// same `LockFile`, already holds it.
    pub fn acquire(&mut self) -> Result<(), Error> {
        match self.mode {
            LockMode::Advisory => {
                if self.path.exists() {
                    return Err(Error::MailboxLocked);
                }

                fs::File::create(&self.path)?;
            }
            LockMode::Exclusive => {
                fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&self.path)
                    .on_exists(Error::MailboxLocked)?;
            }
        }

        self.held = true;
        Ok(())
    }

    /// Remove the lock file, whoever created it.
    pub fn release(&mut self) -> Result<(), Error> {
        fs::remove_file(&self.path).ignore_not_found()?;
        self.held = false;
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Whether the lock file currently exists.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.release() {
                warn!("Failed to release {}: {}", self.path.display(), e);
            }
        }
    }
}
