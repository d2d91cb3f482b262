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

//! Argument syntax of the SMTP envelope commands.

use lazy_static::lazy_static;
use regex::Regex;

use crate::maildrop::MailAddress;

lazy_static! {
    static ref RX_FROM: Regex = Regex::new("^(?i)FROM:(.*)$").unwrap();
    static ref RX_TO: Regex = Regex::new("^(?i)TO:(.*)$").unwrap();
}

/// The path argument of a `MAIL` or `RCPT` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathArg {
    /// The command lacked its `FROM:` or `TO:` keyword.
    Malformed,
    /// Nothing followed the keyword.
    Empty,
    Path(MailAddress),
}

/// Parse the argument of `MAIL`, e.g. `FROM:<zim@irk.example>`.
pub fn reverse_path(value: &str) -> PathArg {
    path_arg(&RX_FROM, value)
}

/// Parse the argument of `RCPT`, e.g. `TO:<gir@earth.example>`.
pub fn forward_path(value: &str) -> PathArg {
    path_arg(&RX_TO, value)
}

fn path_arg(rx: &Regex, value: &str) -> PathArg {
    match rx.captures(value).and_then(|cap| cap.get(1)) {
        None => PathArg::Malformed,
        Some(path) if path.as_str().trim().is_empty() => PathArg::Empty,
        Some(path) => PathArg::Path(MailAddress::parse(path.as_str())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_reverse_path() {
        assert_eq!(
            PathArg::Path(MailAddress::new("zim", "irk.example")),
            reverse_path("FROM:<zim@irk.example>")
        );
        assert_eq!(
            PathArg::Path(MailAddress::new("zim", "irk.example")),
            reverse_path("from: <zim@irk.example>")
        );
        assert_eq!(PathArg::Empty, reverse_path("FROM:"));
        assert_eq!(PathArg::Empty, reverse_path("FROM:   "));
        assert_eq!(PathArg::Malformed, reverse_path("<zim@irk.example>"));
        assert_eq!(PathArg::Malformed, reverse_path("TO:<zim@irk.example>"));

        match reverse_path("FROM:<zim>") {
            PathArg::Path(addr) => assert!(!addr.is_fully_qualified()),
            r => panic!("Unexpected result: {:?}", r),
        }
    }

    #[test]
    fn parse_forward_path() {
        match forward_path("TO:<@relay.example:gir@earth.example>") {
            PathArg::Path(addr) => {
                assert_eq!(vec!["@relay.example"], addr.route());
                assert_eq!("gir", addr.mailbox());
                assert_eq!("earth.example", addr.host());
            }
            r => panic!("Unexpected result: {:?}", r),
        }

        assert_eq!(PathArg::Malformed, forward_path("FROM:<gir@earth>"));
        assert_eq!(PathArg::Empty, forward_path("to:"));
    }
}
