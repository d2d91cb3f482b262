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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::support::error::Error;

/// Stage `data` in a hidden temporary file within `tmp`.
///
/// The name starts with `.` so that directory scans looking for messages
/// never pick up a partially written file.
fn stage(tmp: &Path, mode: u32, data: &[u8]) -> io::Result<NamedTempFile> {
    let mut tf = tempfile::Builder::new().prefix(".tmp").tempfile_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    Ok(tf)
}

/// Write `data` atomically into a new file in `dir`, using the first name
/// produced by `names` that is not already taken.
///
/// The data is staged once; each candidate name is then tried with a
/// no-clobber link, so two concurrent writers can never pick the same name.
///
/// Returns the name that was used.
pub fn spit_unique(
    dir: impl AsRef<Path>,
    names: impl IntoIterator<Item = String>,
    mode: u32,
    data: &[u8],
) -> io::Result<String> {
    let dir = dir.as_ref();
    let mut tf = stage(dir, mode, data)?;

    for name in names {
        match tf.persist_noclobber(dir.join(&name)) {
            Ok(_) => return Ok(name),
            Err(e) if io::ErrorKind::AlreadyExists == e.error.kind() => {
                tf = e.file;
            }
            Err(e) => return Err(e.error),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free file name available",
    ))
}

/// Move `src` to `dst` unless `dst` already exists.
///
/// Returns `false` if `dst` exists, in which case `src` is left untouched.
pub fn move_noclobber(
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
) -> io::Result<bool> {
    match fs::hard_link(src.as_ref(), dst.as_ref()) {
        Ok(()) => {
            fs::remove_file(src)?;
            Ok(true)
        }
        Err(e) if io::ErrorKind::AlreadyExists == e.kind() => Ok(false),
        Err(e) => Err(e),
    }
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    fn on_exists(self, error: Error) -> Self::Coerced;
    fn on_not_found(self, error: Error) -> Self::Coerced;
}

impl<R, E: Into<Error>> ErrorTransforms for Result<R, E> {
    type Coerced = Result<R, Error>;

    fn on_exists(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::AlreadyExists == e.kind() => {
                Err(error)
            }
            s => s,
        }
    }

    fn on_not_found(self, error: Error) -> Result<R, Error> {
        match self.map_err(|e| e.into()) {
            Err(Error::Io(e)) if io::ErrorKind::NotFound == e.kind() => {
                Err(error)
            }
            s => s,
        }
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn spit_unique_skips_taken_names() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a"), b"old").unwrap();

        let name = spit_unique(
            root.path(),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
            0o600,
            b"new",
        )
        .unwrap();

        assert_eq!("b", name);
        assert_eq!(b"old", &fs::read(root.path().join("a")).unwrap()[..]);
        assert_eq!(b"new", &fs::read(root.path().join("b")).unwrap()[..]);
        assert!(!root.path().join("c").exists());
    }

    #[test]
    fn spit_unique_leaves_no_temporaries() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a"), b"old").unwrap();

        spit_unique(root.path(), vec!["a".to_owned()], 0o600, b"new")
            .unwrap_err();
        assert_eq!(1, fs::read_dir(root.path()).unwrap().count());
    }

    #[test]
    fn move_noclobber_refuses_existing() {
        let root = TempDir::new().unwrap();
        let src = root.path().join("src");
        let dst = root.path().join("dst");

        fs::write(&src, b"src").unwrap();
        fs::write(&dst, b"dst").unwrap();
        assert!(!move_noclobber(&src, &dst).unwrap());
        assert!(src.is_file());
        assert_eq!(b"dst", &fs::read(&dst).unwrap()[..]);

        fs::remove_file(&dst).unwrap();
        assert!(move_noclobber(&src, &dst).unwrap());
        assert!(!src.exists());
        assert_eq!(b"src", &fs::read(&dst).unwrap()[..]);
    }
}
