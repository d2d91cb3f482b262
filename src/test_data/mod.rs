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

//! Shared fixtures for the protocol integration tests.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::protocol::ProtocolFactory;
use crate::server::Server;
use crate::support::system_config::SystemConfig;

pub const ZIM_MAIL: &str = "From: <zim@irk.example>\r\n\
                            To: <gir@localhost>\r\n\
                            Subject: Orders\r\n\
                            \r\n\
                            Obey the fist!\r\n\
                            .hidden in plain sight\r\n\
                            Doom doom doom\r\n";

/// A configuration rooted at `root`, with the users zim (password `irk`),
/// gir (`taco`) and dib (`bigheads`) plus whatever `extra` sets.
pub fn test_config(root: &TempDir, extra: &str) -> Arc<SystemConfig> {
    let mut config = SystemConfig::default();
    config
        .merge_toml(&format!(
            "[carrot]\ndata = {:?}\n\
             [users]\nzim = \"irk\"\ngir = \"taco\"\ndib = \"bigheads\"\n",
            root.path().display().to_string(),
        ))
        .unwrap();
    config.merge_toml(extra).unwrap();
    Arc::new(config)
}

/// Start a server for `factory` on an arbitrary loopback port.
pub fn serve(factory: Arc<dyn ProtocolFactory>) -> Server {
    crate::init_test_log();

    let server = Server::new(factory, 0);
    server.set_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST));
    server.start().unwrap();
    server
}

/// Poll `f` until it returns true or `timeout` passes.
pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// The client end of a line protocol conversation.
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    pub fn connect(server: &Server) -> Self {
        let stream =
            TcpStream::connect(("127.0.0.1", server.port() as u16)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    pub fn send(&mut self, line: &str) {
        write!(self.writer, "{}\r\n", line).unwrap();
        self.writer.flush().unwrap();
    }

    /// Read one line, without its terminator, or `None` at EOF.
    pub fn try_read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let len = line.trim_end_matches(&['\r', '\n'][..]).len();
                line.truncate(len);
                println!("Read: {:?}", line);
                Some(line)
            }
            // A reset counts as EOF; the server may close before we read
            Err(e) if std::io::ErrorKind::ConnectionReset == e.kind() => None,
            Err(e) => panic!("Read failed: {}", e),
        }
    }

    pub fn read_line(&mut self) -> String {
        self.try_read_line().expect("Unexpected EOF")
    }

    /// Send `line` and return the single line of response.
    pub fn command(&mut self, line: &str) -> String {
        self.send(line);
        self.read_line()
    }

    /// Read the body of a multi-line response, up to but excluding the
    /// terminating `.`.
    pub fn read_multiline(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            if "." == line {
                return lines;
            }
            lines.push(line);
        }
    }

    /// Read until the server closes the connection, returning what was
    /// left.
    pub fn read_to_eof(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.try_read_line() {
            lines.push(line);
        }
        lines
    }

    /// Signal EOF to the server while still being able to read.
    pub fn finish_sending(&self) {
        self.writer.shutdown(std::net::Shutdown::Write).unwrap();
    }

    pub fn shutdown(&self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }
}
