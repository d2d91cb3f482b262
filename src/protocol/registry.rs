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

//! The table of protocols Carrot knows how to serve.
//!
//! Each protocol is registered under a name, which is also the name of its
//! configuration section. Further protocols can be added with `register()`
//! before the servers are built.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use log::warn;

use super::ProtocolHandler;
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

/// Creates the handlers for one protocol's connections.
///
/// A factory is shared by every connection on its server and is the place
/// to keep state those connections share.
pub trait ProtocolFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare for serving, before the first connection is accepted.
    fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    fn create(&self, stream: TcpStream) -> io::Result<Box<dyn ProtocolHandler>>;
}

pub type Constructor =
    fn(&Arc<SystemConfig>) -> Result<Arc<dyn ProtocolFactory>, Error>;

/// A protocol chosen for serving, with the port from its config section.
pub struct SelectedProtocol {
    pub name: String,
    pub port: i64,
    pub factory: Arc<dyn ProtocolFactory>,
}

#[derive(Default)]
pub struct ProtocolRegistry {
    entries: Vec<(String, Constructor)>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the protocols built into Carrot.
    pub fn builtin() -> Self {
        let mut this = Self::new();
        this.register("pop3", crate::pop3::factory);
        this.register("smtp", crate::smtp::factory);
        this.register("echo", super::echo::factory);
        this.register("chat", super::chat::factory);
        this
    }

    /// Add a protocol, replacing any existing one of the same name.
    pub fn register(&mut self, name: &str, constructor: Constructor) {
        self.entries.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.push((name.to_owned(), constructor));
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|&(ref n, _)| n.as_str()).collect()
    }

    pub fn create(
        &self,
        name: &str,
        config: &Arc<SystemConfig>,
    ) -> Option<Result<Arc<dyn ProtocolFactory>, Error>> {
        self.entries
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, constructor)| constructor(config))
    }

    /// Build the factories for the protocols listed in `[carrot] protocols`,
    /// or for every registered protocol if that list is empty.
    ///
    /// Unknown names are logged and skipped.
    pub fn select(
        &self,
        config: &Arc<SystemConfig>,
    ) -> Result<Vec<SelectedProtocol>, Error> {
        let wanted = config.get_str_array("carrot", "protocols");
        let names: Vec<String> = if wanted.is_empty() {
            self.names().into_iter().map(str::to_owned).collect()
        } else {
            wanted
        };

        let mut selected = Vec::new();
        for name in names {
            let (name, constructor) = match self
                .entries
                .iter()
                .find(|&&(ref n, _)| n.eq_ignore_ascii_case(&name))
            {
                Some(&(ref n, constructor)) => (n.clone(), constructor),
                None => {
                    warn!("Unknown protocol '{}' ignored", name);
                    continue;
                }
            };

            let factory = constructor(config)?;
            let port = config.get_int(&name, "port").ok_or_else(|| {
                Error::BadConfig(format!("no port configured for {}", name))
            })?;

            selected.push(SelectedProtocol {
                name,
                port,
                factory,
            });
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn select_protocols() {
        let registry = ProtocolRegistry::builtin();
        assert_eq!(vec!["pop3", "smtp", "echo", "chat"], registry.names());

        let config = Arc::new(SystemConfig::default());
        let all = registry.select(&config).unwrap();
        assert_eq!(
            vec![("pop3", 110), ("smtp", 25), ("echo", 7), ("chat", 6666)],
            all.iter()
                .map(|p| (p.name.as_str(), p.port))
                .collect::<Vec<_>>()
        );

        let config = Arc::new(
            SystemConfig::from_toml(
                "[carrot]\nprotocols = [\"CHAT\", \"gopher\"]\n\
                 [chat]\nport = 7777\n",
            )
            .unwrap(),
        );
        let some = registry.select(&config).unwrap();
        assert_eq!(1, some.len());
        assert_eq!("chat", some[0].name);
        assert_eq!(7777, some[0].port);
    }

    #[test]
    fn register_replaces() {
        let mut registry = ProtocolRegistry::builtin();
        registry.register("ECHO", super::super::echo::factory);
        assert_eq!(vec!["pop3", "smtp", "chat", "ECHO"], registry.names());
        assert!(registry
            .create("gopher", &Arc::new(SystemConfig::default()))
            .is_none());
    }

    #[test]
    fn missing_port() {
        let mut registry = ProtocolRegistry::new();
        registry.register("gopher", super::super::echo::factory);
        let config = Arc::new(SystemConfig::default());
        assert!(matches!(
            registry.select(&config),
            Err(Error::BadConfig(_))
        ));
    }
}
