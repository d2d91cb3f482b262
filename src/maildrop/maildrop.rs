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

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::{info, warn};

use super::lock::{LockFile, LockMode};
use super::mail::Mail;
use crate::support::digest::md5_hex;
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};

pub const MAIL_EXTENSION: &str = "eml";
const LOCK_FILE: &str = ".lock";
/// How many counter-prefixed names to try before giving up on a timestamp.
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// A single user's mailbox: a directory of `*.eml` files plus a trash
/// directory for deleted mail.
///
/// Each POP3 session has its own `Maildrop`. The index is private to the
/// session and is refreshed from the directory whenever mail is listed, so
/// mail delivered mid-session shows up on the next listing. Deletion is
/// recorded in memory only until `execute_delete()` commits it by moving the
/// files into the trash.
#[derive(Debug)]
pub struct Maildrop {
    user: String,
    root: PathBuf,
    trash: PathBuf,
    lock: LockFile,
    mails: BTreeMap<String, Mail>,
}

impl Maildrop {
    pub(super) fn open(
        user: String,
        root: PathBuf,
        trash: PathBuf,
        lock_mode: LockMode,
    ) -> Result<Self, Error> {
        fs::create_dir_all(&root)?;
        let lock = LockFile::new(root.join(LOCK_FILE), lock_mode);
        let mut this = Maildrop {
            user,
            root,
            trash,
            lock,
            mails: BTreeMap::new(),
        };
        this.list_mails()?;
        Ok(this)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trash(&self) -> &Path {
        &self.trash
    }

    /// Pick up new mail and number every non-deleted message 1..N in file
    /// name order.
    ///
    /// Numbers handed out by earlier listings are invalidated if new mail
    /// sorts before existing mail.
    pub fn list_mails(&mut self) -> Result<Vec<Mail>, Error> {
        self.rescan()?;
        self.renumber(false);
        Ok(self.mails.values().filter(|m| !m.deleted).cloned().collect())
    }

    /// Like `list_mails()`, but deleted messages keep a number too.
    pub fn list_all_mails(&mut self) -> Result<Vec<Mail>, Error> {
        self.rescan()?;
        self.renumber(true);
        Ok(self.mails.values().cloned().collect())
    }

    /// Look up a non-deleted message by the number assigned by the most
    /// recent listing.
    pub fn get_mail(&self, number: usize) -> Option<&Mail> {
        if 0 == number {
            return None;
        }

        self.mails
            .values()
            .find(|m| !m.deleted && number == m.number)
    }

    fn get_mail_mut(&mut self, number: usize) -> Result<&mut Mail, Error> {
        if 0 == number {
            return Err(Error::NoSuchMessage(number));
        }

        self.mails
            .values_mut()
            .find(|m| !m.deleted && number == m.number)
            .ok_or(Error::NoSuchMessage(number))
    }

    fn require(&self, number: usize) -> Result<&Mail, Error> {
        self.get_mail(number).ok_or(Error::NoSuchMessage(number))
    }

    /// The number of messages not marked deleted.
    pub fn count(&self) -> usize {
        self.mails.values().filter(|m| !m.deleted).count()
    }

    pub fn count_all(&self) -> usize {
        self.mails.len()
    }

    /// The total size in octets of the messages not marked deleted.
    pub fn size(&self) -> u64 {
        self.mails
            .values()
            .filter(|m| !m.deleted)
            .map(|m| m.size)
            .sum()
    }

    pub fn size_of(&self, number: usize) -> Result<u64, Error> {
        Ok(self.require(number)?.size)
    }

    pub fn text(&self, number: usize) -> Result<String, Error> {
        let data = fs::read(&self.require(number)?.path)?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// The lines of a message, without their terminators.
    pub fn lines(&self, number: usize) -> Result<Vec<String>, Error> {
        Ok(self.text(number)?.lines().map(str::to_owned).collect())
    }

    /// An identifier for the message which stays the same across sessions.
    ///
    /// This is the file name, or if `hashed` is set, the MD5 of the content.
    pub fn unique_id(
        &mut self,
        number: usize,
        hashed: bool,
    ) -> Result<String, Error> {
        let mail = self.get_mail_mut(number)?;
        if !hashed {
            return Ok(mail.id.clone());
        }

        if let Some(ref hash) = mail.hash {
            return Ok(hash.clone());
        }

        let hash = md5_hex(&fs::read(&mail.path)?)?;
        mail.hash = Some(hash.clone());
        Ok(hash)
    }

    /// Store a new message in this maildrop, returning its id.
    ///
    /// The message is not added to the index until the next listing.
    pub fn create_mail(&self, content: &str) -> Result<String, Error> {
        create_mail_in(&self.root, content)
    }

    /// Mark a message for deletion. Nothing happens on disk until
    /// `execute_delete()`.
    pub fn delete(&mut self, number: usize) -> Result<(), Error> {
        self.get_mail_mut(number)?.deleted = true;
        Ok(())
    }

    /// Unmark every message marked for deletion.
    pub fn reset_deleted(&mut self) {
        for mail in self.mails.values_mut() {
            mail.deleted = false;
        }
    }

    /// Move every message marked for deletion into the trash.
    ///
    /// A failure to move one message does not stop the others from being
    /// moved. If anything failed, the result is `IncompleteDelete` with the
    /// number of messages left in place.
    pub fn execute_delete(&mut self) -> Result<(), Error> {
        if !self.mails.values().any(|m| m.deleted) {
            return Ok(());
        }

        fs::create_dir_all(&self.trash)?;

        let mut failed = 0;
        let doomed = self
            .mails
            .iter()
            .filter(|&(_, m)| m.deleted)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in doomed {
            let src = self.root.join(&name);
            match fs::rename(&src, self.trash.join(&name)) {
                Ok(()) => {
                    self.mails.remove(&name);
                }
                Err(e) => {
                    warn!(
                        "{}: failed to move {} to trash: {}",
                        self.user,
                        src.display(),
                        e
                    );
                    failed += 1;
                }
            }
        }

        self.renumber(false);
        if failed > 0 {
            Err(Error::IncompleteDelete(failed))
        } else {
            Ok(())
        }
    }

    /// Move everything in the trash back into the maildrop.
    ///
    /// Messages whose name is already taken in the maildrop stay in the
    /// trash. Anything in the trash which is not a message is deleted. The
    /// index is rebuilt from scratch afterwards, which also clears all
    /// deletion marks.
    ///
    /// Returns the number of messages restored.
    pub fn restore_deleted(&mut self) -> Result<usize, Error> {
        let restored = restore_trash(&self.trash, &self.root)?;
        if restored > 0 {
            info!("{}: restored {} message(s) from trash", self.user, restored);
        }

        self.mails.clear();
        self.list_mails()?;
        Ok(restored)
    }

    pub fn lock(&mut self) -> Result<(), Error> {
        self.lock.acquire()
    }

    pub fn unlock(&mut self) -> Result<(), Error> {
        self.lock.release()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    fn rescan(&mut self) -> Result<(), Error> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };

            if !is_mail_name(&name) || self.mails.contains_key(&name) {
                continue;
            }

            // Files can vanish between listing and stat if another session
            // commits a delete.
            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                Err(e) => return Err(e.into()),
            };
            if !md.is_file() {
                continue;
            }

            self.mails
                .insert(name.clone(), Mail::new(name, entry.path(), md.len()));
        }

        Ok(())
    }

    fn renumber(&mut self, include_deleted: bool) {
        let mut next = 1;
        for mail in self.mails.values_mut() {
            if include_deleted || !mail.deleted {
                mail.number = next;
                next += 1;
            } else {
                mail.number = 0;
            }
        }
    }
}

fn is_mail_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .map_or(false, |ext| MAIL_EXTENSION == ext)
}

/// Write `content` as a new message into the maildrop directory `root`,
/// returning its id.
///
/// The name is the current local time as `yyyyMMddHHmmss.eml`. If that is
/// taken, a counter is prefixed: `1yyyyMMddHHmmss.eml`, `2yyyy...`, and so
/// on.
pub(super) fn create_mail_in(
    root: &Path,
    content: &str,
) -> Result<String, Error> {
    fs::create_dir_all(root)?;
    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    let names = std::iter::once(format!("{}.{}", stamp, MAIL_EXTENSION))
        .chain((1..MAX_NAME_ATTEMPTS).map(|counter| {
            format!("{}{}.{}", counter, stamp, MAIL_EXTENSION)
        }));

    Ok(file_ops::spit_unique(root, names, 0o600, content.as_bytes())?)
}

/// Move the messages in `trash` back into `root`, returning how many were
/// moved.
pub(super) fn restore_trash(trash: &Path, root: &Path) -> Result<usize, Error> {
    let entries = match fs::read_dir(trash) {
        Ok(entries) => entries,
        Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    fs::create_dir_all(root)?;

    let mut restored = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_file = entry.file_type()?.is_file();
        let is_mail = entry.file_name().to_str().map_or(false, is_mail_name);

        if is_file && is_mail {
            if file_ops::move_noclobber(&path, root.join(entry.file_name()))? {
                restored += 1;
            }
        } else if is_file {
            fs::remove_file(&path).ignore_not_found()?;
        }
    }

    Ok(restored)
}
