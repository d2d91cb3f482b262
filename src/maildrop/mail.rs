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

use std::path::{Path, PathBuf};

/// One message stored in a maildrop.
///
/// The `id` is the name of the backing file and never changes. The `number`
/// is assigned afresh by every listing and is only meaningful within the
/// session that produced it; `0` means the message is not part of the
/// current numbering (for example because it is marked deleted).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub(super) number: usize,
    pub(super) id: String,
    pub(super) path: PathBuf,
    pub(super) size: u64,
    pub(super) deleted: bool,
    pub(super) hash: Option<String>,
}

impl Mail {
    pub(super) fn new(id: String, path: PathBuf, size: u64) -> Self {
        Mail {
            number: 0,
            id,
            path,
            size,
            deleted: false,
            hash: None,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size of the message in octets.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}
