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

use std::fmt::Write as _;

use openssl::hash::{hash, MessageDigest};

use crate::support::error::Error;

/// Compute the MD5 digest of `data` as lowercase hexadecimal.
///
/// MD5 is only used where the mail protocols mandate it (APOP and opaque
/// message identifiers); it has no security role beyond that.
pub fn md5_hex(data: &[u8]) -> Result<String, Error> {
    let digest = hash(MessageDigest::md5(), data)?;
    let mut hex = String::with_capacity(2 * digest.len());
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            "d41d8cd98f00b204e9800998ecf8427e",
            md5_hex(b"").unwrap()
        );
        // The APOP example from RFC 1939
        assert_eq!(
            "c4c9334bac560ecc979e58001b3e22fb",
            md5_hex(b"<1896.697170952@dbc.mtview.ca.us>tanstaaf").unwrap()
        );
    }
}
