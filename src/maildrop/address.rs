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

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// An SMTP address of the form `<@route1,@route2:mailbox@host>`.
///
/// Parsing is lenient and never fails; whether the result is usable is
/// decided by `is_fully_qualified()`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MailAddress {
    route: Vec<String>,
    mailbox: String,
    host: String,
}

impl MailAddress {
    pub fn new(mailbox: impl Into<String>, host: impl Into<String>) -> Self {
        MailAddress {
            route: Vec::new(),
            mailbox: mailbox.into(),
            host: host.into(),
        }
    }

    /// Parse an address, with or without the surrounding angle brackets.
    ///
    /// Everything up to the last `:` is the source route, a comma-separated
    /// list. The remainder is split into mailbox and host at its last `@`.
    pub fn parse(s: &str) -> Self {
        let mut s = s.trim();
        if s.starts_with('<') {
            s = &s[1..];
        }
        if s.ends_with('>') {
            s = &s[..s.len() - 1];
        }

        let (route, rest) = match s.rfind(':') {
            Some(ix) => (
                s[..ix]
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_owned)
                    .collect(),
                &s[ix + 1..],
            ),
            None => (Vec::new(), s),
        };

        let (mailbox, host) = match rest.rfind('@') {
            Some(ix) => (&rest[..ix], &rest[ix + 1..]),
            None => (rest, ""),
        };

        MailAddress {
            route,
            mailbox: mailbox.trim().to_owned(),
            host: host.trim().to_owned(),
        }
    }

    pub fn route(&self) -> &[String] {
        &self.route
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether both the mailbox and the host are present.
    pub fn is_fully_qualified(&self) -> bool {
        !self.mailbox.is_empty() && !self.host.is_empty()
    }

    /// Whether this address refers to this server.
    ///
    /// That is the case when the host is the loopback literal
    /// `[127.0.0.1]`, the literal of the address the client connected to, or
    /// `our_host` compared case-insensitively.
    pub fn is_local(&self, our_host: &str, local_ip: Option<IpAddr>) -> bool {
        "[127.0.0.1]" == self.host
            || local_ip.map_or(false, |ip| format!("[{}]", ip) == self.host)
            || self.host.eq_ignore_ascii_case(our_host)
    }

    /// Format the full address including the source route and the angle
    /// brackets, as used in SMTP commands.
    pub fn to_qualified_string(&self) -> String {
        if self.route.is_empty() {
            format!("<{}>", self)
        } else {
            format!("<{}:{}>", self.route.join(","), self)
        }
    }
}

impl FromStr for MailAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MailAddress::parse(s))
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.mailbox)
        } else {
            write!(f, "{}@{}", self.mailbox, self.host)
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_simple() {
        let addr = MailAddress::parse("<zim@irk.example>");
        assert!(addr.route().is_empty());
        assert_eq!("zim", addr.mailbox());
        assert_eq!("irk.example", addr.host());
        assert!(addr.is_fully_qualified());
        assert_eq!("zim@irk.example", addr.to_string());
        assert_eq!("<zim@irk.example>", addr.to_qualified_string());

        assert_eq!(addr, MailAddress::parse("zim@irk.example"));
        assert_eq!(addr, MailAddress::parse("  <zim@irk.example> "));
        assert_eq!(addr, "zim@irk.example".parse::<MailAddress>().unwrap());
    }

    #[test]
    fn parse_source_route() {
        let addr = MailAddress::parse("<@a.example,@b.example:dib@c.example>");
        assert_eq!(&["@a.example", "@b.example"], addr.route());
        assert_eq!("dib", addr.mailbox());
        assert_eq!("c.example", addr.host());
        assert_eq!(
            "<@a.example,@b.example:dib@c.example>",
            addr.to_qualified_string()
        );
    }

    #[test]
    fn parse_last_at_wins() {
        let addr = MailAddress::parse("<\"odd@name\"@host>");
        assert_eq!("\"odd@name\"", addr.mailbox());
        assert_eq!("host", addr.host());
    }

    #[test]
    fn unqualified_addresses() {
        assert!(!MailAddress::parse("<>").is_fully_qualified());
        assert!(!MailAddress::parse("<zim>").is_fully_qualified());
        assert!(!MailAddress::parse("<zim@>").is_fully_qualified());
        assert!(!MailAddress::parse("<@irk>").is_fully_qualified());
        assert_eq!("zim", MailAddress::parse("zim").to_string());
    }

    #[test]
    fn locality() {
        let local_ip: IpAddr = "10.0.0.2".parse().unwrap();
        let is_local = |s: &str| {
            MailAddress::parse(s).is_local("Mail.Example", Some(local_ip))
        };

        assert!(is_local("zim@mail.example"));
        assert!(is_local("zim@MAIL.EXAMPLE"));
        assert!(is_local("zim@[127.0.0.1]"));
        assert!(is_local("zim@[10.0.0.2]"));
        assert!(!is_local("zim@[10.0.0.3]"));
        assert!(!is_local("zim@elsewhere.example"));
        assert!(!MailAddress::parse("zim@[10.0.0.2]").is_local("x", None));
    }

    proptest! {
        #[test]
        fn qualified_string_round_trips(
            route in prop::collection::vec("@[a-z][a-z0-9.]{0,8}", 0..3),
            mailbox in "[a-zA-Z0-9._+-]{1,16}",
            host in "[a-z0-9.-]{1,16}",
        ) {
            let addr = MailAddress {
                route,
                mailbox,
                host,
            };
            prop_assert_eq!(
                &addr,
                &MailAddress::parse(&addr.to_qualified_string())
            );
        }
    }
}
