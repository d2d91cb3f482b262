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

//! The substrate shared by all line-oriented protocols.
//!
//! A `LineHandler` reads the client's input one line at a time and hands
//! each line to a `LineProtocol`. Replies go out through an `Outbound`, which
//! terminates every line with CRLF and flushes immediately.

use std::borrow::Cow;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::mem;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use super::connection::Connection;
use super::ProtocolHandler;

/// Input lines longer than this are delivered in pieces of this size.
pub const MAX_LINE: usize = 65536;

/// The writing half of a connection.
///
/// Clones share the same socket, so other threads (such as chat
/// broadcasts) may write to a client too. Each call writes its lines under
/// one lock, so a multi-line reply is never interleaved with anything else.
#[derive(Clone)]
pub struct Outbound {
    writer: Arc<Mutex<BufWriter<TcpStream>>>,
}

impl Outbound {
    pub fn new(stream: TcpStream) -> Self {
        Outbound {
            writer: Arc::new(Mutex::new(BufWriter::new(stream))),
        }
    }

    pub fn send(&self, line: &str) -> io::Result<()> {
        self.send_lines(std::iter::once(line))
    }

    pub fn send_lines<I>(&self, lines: I) -> io::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut writer = self.writer.lock().unwrap();
        for line in lines {
            writer.write_all(line.as_ref().as_bytes())?;
            writer.write_all(b"\r\n")?;
        }
        writer.flush()
    }
}

/// A freshly accepted connection, split into its parts.
pub struct Channel {
    pub connection: Arc<Connection>,
    pub reader: BufReader<TcpStream>,
    pub outbound: Outbound,
}

impl Channel {
    pub fn open(stream: TcpStream, protocol: &str) -> io::Result<Self> {
        let connection = Arc::new(Connection::new(protocol, &stream)?);
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Channel {
            connection,
            reader,
            outbound: Outbound::new(stream),
        })
    }
}

/// What a protocol gets to work with while handling a line.
pub struct Session {
    connection: Arc<Connection>,
    outbound: Outbound,
    auto_reset_timer: bool,
}

impl Session {
    pub fn new(connection: Arc<Connection>, outbound: Outbound) -> Self {
        Session {
            connection,
            outbound,
            auto_reset_timer: true,
        }
    }

    pub fn send(&self, line: &str) -> io::Result<()> {
        self.outbound.send(line)
    }

    pub fn send_lines<I>(&self, lines: I) -> io::Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.outbound.send_lines(lines)
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// End the session once the current line has been handled.
    pub fn stop(&self) {
        self.connection.stop();
    }

    /// End the session immediately.
    pub fn close(&self) {
        self.connection.close();
    }

    pub fn reset_timer(&self) {
        self.connection.reset_idle_timer();
    }

    /// Control whether every received line counts as activity for the idle
    /// timeout. When off, the protocol must call `reset_timer()` itself.
    pub fn set_auto_reset_timer(&mut self, auto_reset_timer: bool) {
        self.auto_reset_timer = auto_reset_timer;
    }
}

/// A protocol which exchanges lines of text with the client.
///
/// Returning an error from any of these methods ends the connection.
pub trait LineProtocol: Send {
    /// Called once before the first line is read, typically to greet the
    /// client.
    fn handle_connect(&mut self, _session: &mut Session) -> io::Result<()> {
        Ok(())
    }

    fn handle_message(
        &mut self,
        line: String,
        session: &mut Session,
    ) -> io::Result<()>;

    /// Called once when the connection ends, for whatever reason. The
    /// client may already be gone.
    fn handle_disconnect(&mut self, _session: &mut Session) {}
}

/// Drives a `LineProtocol` over a connection.
pub struct LineHandler<P> {
    reader: BufReader<TcpStream>,
    session: Session,
    protocol: P,
}

impl<P: LineProtocol> LineHandler<P> {
    pub fn new(channel: Channel, protocol: P) -> Self {
        LineHandler {
            reader: channel.reader,
            session: Session::new(channel.connection, channel.outbound),
            protocol,
        }
    }
}

impl<P: LineProtocol + 'static> ProtocolHandler for LineHandler<P> {
    fn connection(&self) -> &Arc<Connection> {
        self.session.connection()
    }

    fn run(self: Box<Self>) {
        let LineHandler {
            mut reader,
            mut session,
            mut protocol,
        } = *self;
        let connection = Arc::clone(session.connection());
        let log_prefix = connection.log_prefix().clone();

        connection.start();
        let result = protocol.handle_connect(&mut session).and_then(|()| {
            let mut buf = Vec::new();
            while connection.is_running() {
                let line = match read_line(&mut reader, &mut buf)? {
                    Some(line) => line,
                    None => break,
                };

                if session.auto_reset_timer {
                    connection.reset_idle_timer();
                }
                protocol.handle_message(line, &mut session)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => info!("{} Normal client disconnect", log_prefix),
            Err(_) if connection.is_closed() => {
                info!("{} Connection closed", log_prefix)
            }
            Err(e) => info!("{} Abnormal client disconnect: {}", log_prefix, e),
        }

        protocol.handle_disconnect(&mut session);
        connection.close();
    }
}

/// Read one line, without its terminator.
///
/// Both CRLF and bare LF end a line. Invalid UTF-8 is replaced rather than
/// rejected. Returns `None` at EOF.
///
/// `buf` carries the unread tail of an overlong line between calls, so the
/// same buffer must be passed every time for a given reader.
pub fn read_line(
    reader: &mut impl BufRead,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    let mut line = mem::take(buf);
    if !line.ends_with(b"\n") {
        // Two bytes of slack so a terminator right at the limit is seen
        let limit = (MAX_LINE + 2).saturating_sub(line.len());
        Read::take(&mut *reader, limit as u64)
            .read_until(b'\n', &mut line)?;
    }
    if line.is_empty() {
        return Ok(None);
    }

    let terminated = line.ends_with(b"\n");
    if terminated {
        line.pop();
        if line.ends_with(b"\r") {
            line.pop();
        }
    }

    if line.len() > MAX_LINE {
        *buf = line.split_off(MAX_LINE);
        if terminated {
            buf.push(b'\n');
        }
    } else if !terminated {
        debug!("Final line had no terminator");
    }

    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Dot-stuff a line of message content for transmission: lines starting
/// with `.` get another `.` prepended.
pub fn stuff_dot(line: &str) -> Cow<str> {
    if line.starts_with('.') {
        Cow::Owned(format!(".{}", line))
    } else {
        Cow::Borrowed(line)
    }
}

/// Reverse `stuff_dot()`: remove one leading `.`, if any.
pub fn unstuff_dot(line: &str) -> &str {
    if line.starts_with('.') {
        &line[1..]
    } else {
        line
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn read_all(input: &[u8]) -> Vec<String> {
        let mut reader = input;
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = read_line(&mut reader, &mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn line_endings() {
        assert_eq!(
            vec!["foo", "bar", "", "baz\rquux", "end"],
            read_all(b"foo\r\nbar\n\r\nbaz\rquux\nend")
        );
        assert!(read_all(b"").is_empty());
        assert_eq!(vec!["caf\u{FFFD}"], read_all(b"caf\xE9\r\n"));
    }

    #[test]
    fn long_lines_are_split() {
        let mut input = vec![b'x'; MAX_LINE + 10];
        input.extend_from_slice(b"\r\n");
        let lines = read_all(&input);
        assert_eq!(2, lines.len());
        assert_eq!(MAX_LINE, lines[0].len());
        assert_eq!(10, lines[1].len());
    }

    #[test]
    fn lines_at_the_limit_stay_whole() {
        for &len in &[MAX_LINE - 1, MAX_LINE] {
            for &ending in &[&b"\r\n"[..], &b"\n"[..]] {
                let mut input = vec![b'x'; len];
                input.extend_from_slice(ending);
                input.extend_from_slice(b"next\r\n");
                let lines = read_all(&input);
                assert_eq!(2, lines.len(), "len {} {:?}", len, ending);
                assert_eq!(len, lines[0].len());
                assert_eq!("next", lines[1]);
            }
        }

        for &ending in &[&b"\r\n"[..], &b"\n"[..]] {
            let mut input = vec![b'x'; MAX_LINE + 1];
            input.extend_from_slice(ending);
            input.extend_from_slice(b"next\r\n");
            let lines = read_all(&input);
            assert_eq!(3, lines.len(), "{:?}", ending);
            assert_eq!(MAX_LINE, lines[0].len());
            assert_eq!("x", lines[1]);
            assert_eq!("next", lines[2]);
        }
    }

    #[test]
    fn dot_stuffing() {
        assert_eq!("foo", stuff_dot("foo"));
        assert_eq!("..", stuff_dot("."));
        assert_eq!("..foo", stuff_dot(".foo"));
        assert_eq!("foo", unstuff_dot("foo"));
        assert_eq!("", unstuff_dot("."));
        assert_eq!(".foo", unstuff_dot("..foo"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 4096,
            ..ProptestConfig::default()
        })]

        #[test]
        fn unstuff_reverses_stuff(line in "[.a-z ]{0,8}") {
            let stuffed = stuff_dot(&line);
            prop_assert_eq!(&line, unstuff_dot(&stuffed));
        }

        #[test]
        fn stuff_reverses_unstuff(line in "[.a-z ]{0,8}") {
            // A line with exactly one leading dot cannot be the result of
            // stuffing anything.
            prop_assume!(!line.starts_with('.') || line.starts_with(".."));
            prop_assert_eq!(&line, &stuff_dot(unstuff_dot(&line)));
        }
    }
}
