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

//! The system-wide configuration for Carrot.
//!
//! Configuration is TOML, organised into one section per component plus a
//! `[users]` section mapping user names to their secrets. It is assembled
//! from several layers, each overriding the keys of the ones before it:
//!
//! 1. The built-in defaults in `DEFAULTS_TOML`.
//! 2. `carrot.toml` in the working directory, or the file given by
//!    `--config`.
//! 3. `carrot.toml` inside the data directory.
//! 4. Command-line flags and `-D section.key=value` overrides.
//!
//! Components read their section either through the loose accessors (`get`,
//! `get_str`, ...), which is what the protocol registry does for arbitrary
//! protocols, or as one of the typed structs below via `section()`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use toml::value::{Table, Value};

use crate::support::error::Error;

pub const DEFAULTS_TOML: &str = r#"
[carrot]
host = "localhost"
data = "data"
maildrop = "maildrop"
trash = "_trash"
timeout = 0
protocols = []
bind = "0.0.0.0"
debug = false
syslog = false
exclusive_lock = false

[pop3]
port = 110
capabilities = ["CAPA", "USER", "APOP", "TOP", "UIDL"]
enable_apop = true
uidl_hash = false
restore_trash_on_start = false

[smtp]
port = 25
accept_any_rcpt = false
random_send_delay = 0
create_error_mails = true
delivery_workers = 2

[echo]
port = 7
message_format = ""

[chat]
port = 6666

[users]
"#;

lazy_static! {
    static ref DEFAULTS: Table = toml::from_str(DEFAULTS_TOML).unwrap();
}

/// General server options, from `[carrot]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CarrotConfig {
    /// The name this server announces and treats as local.
    pub host: String,
    /// Root of all persistent data.
    pub data: PathBuf,
    /// Name of the directory under `data` holding the user maildrops.
    pub maildrop: String,
    /// Name of the directory under the maildrop root holding the trash.
    pub trash: String,
    /// Idle timeout for connections in milliseconds. 0 disables it.
    pub timeout: u64,
    /// Which protocols to start. Empty means all registered protocols.
    #[serde(deserialize_with = "string_or_list")]
    pub protocols: Vec<String>,
    /// The address the servers listen on.
    pub bind: String,
    /// Log at debug level.
    pub debug: bool,
    /// Log to syslog instead of standard error.
    pub syslog: bool,
    /// Lock maildrops by exclusively creating the lock file instead of the
    /// traditional check-then-create.
    pub exclusive_lock: bool,
}

impl CarrotConfig {
    /// The directory containing every user's maildrop.
    pub fn maildrop_root(&self) -> PathBuf {
        self.data.join(&self.maildrop)
    }
}

/// Options for the POP3 server, from `[pop3]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Pop3Config {
    pub port: i64,
    /// The capabilities offered. Commands belonging to capabilities not
    /// listed here are treated as unknown.
    #[serde(deserialize_with = "string_or_list")]
    pub capabilities: Vec<String>,
    /// Whether to send an APOP challenge in the greeting.
    pub enable_apop: bool,
    /// Use the MD5 of the message text as its unique id instead of the file
    /// name.
    pub uidl_hash: bool,
    /// Move everything in the trash back into the maildrops at startup.
    pub restore_trash_on_start: bool,
}

impl Pop3Config {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

/// Options for the SMTP server, from `[smtp]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub port: i64,
    /// Accept any syntactically valid recipient instead of only local users.
    pub accept_any_rcpt: bool,
    /// Upper bound, in milliseconds, of a random delay before each delivery.
    pub random_send_delay: u64,
    /// Write a failure notice into a local sender's maildrop when a message
    /// cannot be delivered.
    pub create_error_mails: bool,
    /// Number of threads delivering queued mail.
    pub delivery_workers: usize,
}

/// Options for the echo server, from `[echo]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EchoConfig {
    pub port: i64,
    /// Template for replies; `{}` is replaced with the received line. Empty
    /// echoes lines unchanged.
    pub message_format: String,
}

/// Options for the chat server, from `[chat]`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    pub port: i64,
}

#[derive(Clone, Debug)]
pub struct SystemConfig {
    table: Table,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            table: DEFAULTS.clone(),
        }
    }
}

impl SystemConfig {
    /// Build a configuration from the built-in defaults overlaid with
    /// `text`.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        config.merge_toml(text)?;
        Ok(config)
    }

    /// Overlay the configuration in `text` onto this one.
    pub fn merge_toml(&mut self, text: &str) -> Result<(), Error> {
        let overlay: Table = toml::from_str(text)?;
        merge_tables(&mut self.table, overlay);
        Ok(())
    }

    /// Overlay the configuration file at `path` onto this one.
    ///
    /// Returns `false` without changing anything if the file does not exist.
    pub fn merge_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<bool, Error> {
        match fs::read_to_string(path) {
            Ok(text) => {
                self.merge_toml(&text)?;
                Ok(true)
            }
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: Value) {
        let section = self
            .table
            .entry(section.to_owned())
            .or_insert_with(|| Value::Table(Table::new()));
        if !section.is_table() {
            *section = Value::Table(Table::new());
        }

        if let Value::Table(ref mut section) = *section {
            section.insert(key.to_owned(), value);
        }
    }

    /// Apply an override of the form `section.key=value`.
    ///
    /// The value is interpreted as a TOML value if possible (so `port=25`
    /// gives an integer and `debug=true` a boolean), and as a bare string
    /// otherwise.
    pub fn set_override(&mut self, spec: &str) -> Result<(), Error> {
        let (path, raw) = split_once(spec, '=').ok_or_else(|| {
            Error::BadConfig(format!("expected section.key=value: {}", spec))
        })?;
        let (section, key) =
            split_once(path.trim(), '.').ok_or_else(|| {
                Error::BadConfig(format!("expected section.key: {}", path))
            })?;

        let raw = raw.trim();
        let value = toml::from_str::<Table>(&format!("v = {}", raw))
            .ok()
            .and_then(|mut t| t.remove("v"))
            .unwrap_or_else(|| Value::String(raw.to_owned()));
        self.set(section.trim(), key.trim(), value);
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.table.get(section).and_then(|s| s.get(key))
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<String> {
        match *self.get(section, key)? {
            Value::String(ref s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        match *self.get(section, key)? {
            Value::Integer(i) => Some(i),
            Value::String(ref s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match *self.get(section, key)? {
            Value::Boolean(b) => Some(b),
            Value::String(ref s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Look up a list, given either as a TOML array or as a comma-separated
    /// string. Missing keys give an empty list.
    pub fn get_str_array(&self, section: &str, key: &str) -> Vec<String> {
        match self.get(section, key) {
            Some(&Value::Array(ref a)) => a
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_owned)
                .collect(),
            Some(&Value::String(ref s)) => split_list(s),
            _ => Vec::new(),
        }
    }

    /// Deserialise a whole section into one of the typed config structs.
    pub fn section<T: DeserializeOwned>(&self, name: &str) -> Result<T, Error> {
        let section = self
            .table
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Table(Table::new()));
        section
            .try_into()
            .map_err(|e| Error::BadConfig(format!("[{}]: {}", name, e)))
    }

    pub fn carrot(&self) -> Result<CarrotConfig, Error> {
        self.section("carrot")
    }

    /// Return the configured users and their secrets.
    pub fn users(&self) -> BTreeMap<String, String> {
        self.table
            .get("users")
            .and_then(Value::as_table)
            .map(|users| {
                users
                    .iter()
                    .filter_map(|(name, secret)| {
                        secret.as_str().map(|s| (name.clone(), s.to_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn user_secret(&self, name: &str) -> Option<String> {
        self.get_str("users", name)
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.user_secret(name).is_some()
    }

    pub fn user_names(&self) -> Vec<String> {
        self.users().into_iter().map(|(name, _)| name).collect()
    }
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(overlay) = value {
            if let Some(Value::Table(base)) = base.get_mut(&key) {
                merge_tables(base, overlay);
                continue;
            }

            base.insert(key, Value::Table(overlay));
        } else {
            base.insert(key, value);
        }
    }
}

fn split_once(s: &str, delim: char) -> Option<(&str, &str)> {
    let ix = s.find(delim)?;
    Some((&s[..ix], &s[ix + delim.len_utf8()..]))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn string_or_list<'de, D: Deserializer<'de>>(
    de: D,
) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        List(Vec<String>),
        String(String),
    }

    Ok(match StringOrList::deserialize(de)? {
        StringOrList::List(list) => list,
        StringOrList::String(s) => split_list(&s),
    })
}
