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

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::protocol::line::unstuff_dot;
use crate::server::Server;
use crate::support::digest::md5_hex;
use crate::test_data::*;

struct Setup {
    root: TempDir,
    factory: Arc<Pop3Factory>,
    server: Server,
}

fn set_up(extra: &str) -> Setup {
    let root = TempDir::new().unwrap();
    let config = test_config(&root, extra);
    let factory = Arc::new(Pop3Factory::new(config).unwrap());
    let server = serve(Arc::clone(&factory) as Arc<dyn ProtocolFactory>);

    Setup {
        root,
        factory,
        server,
    }
}

impl Setup {
    fn deliver(&self, user: &str, content: &str) -> String {
        self.factory.maildrops().deliver(user, content).unwrap()
    }

    fn connect(&self) -> (Client, String) {
        let mut client = Client::connect(&self.server);
        let greeting = client.read_line();
        assert!(greeting.starts_with("+OK Welcome to Carrot (v"));
        (client, greeting)
    }

    fn log_in(&self, user: &str, password: &str) -> Client {
        let (mut client, _) = self.connect();
        assert_eq!("+OK", client.command(&format!("USER {}", user)));
        assert_eq!(
            format!("+OK welcome {}", user),
            client.command(&format!("PASS {}", password))
        );
        client
    }

    fn mail_files(&self, dir: &str) -> Vec<String> {
        let path = self.root.path().join("maildrop").join(dir);
        let mut names = match fs::read_dir(path) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_str().unwrap().to_owned())
                .filter(|n| n.ends_with(".eml"))
                .collect::<Vec<_>>(),
            Err(_) => vec![],
        };
        names.sort();
        names
    }

    fn is_locked(&self, user: &str) -> bool {
        self.factory.maildrops().open(user).unwrap().is_locked()
    }
}

#[test]
fn user_pass_login() {
    let setup = set_up("");
    let (mut client, _) = setup.connect();

    assert_eq!(
        "-ERR command invalid in this state",
        client.command("STAT")
    );
    assert_eq!("-ERR no username given", client.command("PASS irk"));
    assert_eq!("+OK", client.command("USER zim"));
    assert_eq!("-ERR authentication failed", client.command("PASS gir"));
    // The failed attempt forgets the user name
    assert_eq!("-ERR no username given", client.command("PASS irk"));
    assert_eq!("+OK", client.command("USER nobody"));
    assert_eq!("-ERR authentication failed", client.command("PASS irk"));

    assert_eq!("+OK", client.command("user zim"));
    assert_eq!("+OK welcome zim", client.command("pass irk"));
    assert_eq!("+OK 0 0", client.command("STAT"));
    assert_eq!(
        "-ERR command invalid in this state",
        client.command("USER gir")
    );
    assert_eq!("+OK bye", client.command("QUIT"));
    assert!(client.read_to_eof().is_empty());
}

#[test]
fn apop_login() {
    let setup = set_up("");
    let (mut client, greeting) = setup.connect();

    let challenge = &greeting[greeting.rfind('<').unwrap()..];
    assert!(challenge.ends_with("@localhost>"));

    assert_eq!(
        "-ERR wrong number of arguments",
        client.command("APOP zim")
    );
    assert_eq!(
        "-ERR authentication failed",
        client.command("APOP zim c4c9334bac560ecc979e58001b3e22fb")
    );

    let digest =
        md5_hex(format!("{}{}", challenge, "irk").as_bytes()).unwrap();
    assert_eq!(
        "+OK welcome zim",
        client.command(&format!("APOP zim {}", digest.to_uppercase()))
    );
}

#[test]
fn no_challenge_without_apop() {
    let setup = set_up("[pop3]\nenable_apop = false");
    let (_client, greeting) = setup.connect();
    assert!(!greeting.contains('<'));
}

#[test]
fn capabilities() {
    let setup = set_up("");
    let (mut client, _) = setup.connect();

    client.send("CAPA");
    assert_eq!("+OK Listing capabilities", client.read_line());
    assert_eq!(vec!["CAPA", "USER", "TOP", "UIDL"], client.read_multiline());

    assert_eq!("-ERR unknown command: XYZZY", client.command("xyzzy"));
}

#[test]
fn commands_without_capability_are_unknown() {
    let setup = set_up("[pop3]\ncapabilities = \"USER\"");
    let (mut client, _) = setup.connect();

    assert_eq!("-ERR unknown command: CAPA", client.command("CAPA"));
    assert_eq!("-ERR unknown command: APOP", client.command("APOP zim x"));
    assert_eq!("+OK", client.command("USER zim"));
    assert_eq!("+OK welcome zim", client.command("PASS irk"));
    assert_eq!("-ERR unknown command: TOP", client.command("TOP 1 1"));
    assert_eq!("-ERR unknown command: UIDL", client.command("UIDL"));
}

#[test]
fn retrieve_mail() {
    let setup = set_up("");
    setup.deliver("zim", ZIM_MAIL);
    let mut client = setup.log_in("zim", "irk");

    assert_eq!(
        format!("+OK 1 {}", ZIM_MAIL.len()),
        client.command("STAT")
    );

    client.send("LIST");
    assert_eq!(format!("+OK 1 {}", ZIM_MAIL.len()), client.read_line());
    assert_eq!(
        vec![format!("1 {}", ZIM_MAIL.len())],
        client.read_multiline()
    );
    assert_eq!(
        format!("+OK 1 {}", ZIM_MAIL.len()),
        client.command("LIST 1")
    );
    assert_eq!("-ERR no such message", client.command("LIST 2"));
    assert_eq!("-ERR no such message", client.command("LIST one"));

    client.send("RETR 1");
    assert_eq!(
        format!("+OK {} octets", ZIM_MAIL.len()),
        client.read_line()
    );
    let lines = client.read_multiline();
    assert!(lines.contains(&"..hidden in plain sight".to_owned()));
    let text = lines
        .iter()
        .map(|line| format!("{}\r\n", unstuff_dot(line)))
        .collect::<String>();
    assert_eq!(ZIM_MAIL, text);

    assert_eq!("-ERR missing argument", client.command("RETR"));
    assert_eq!("-ERR no such message", client.command("RETR 0"));
    assert_eq!("-ERR no such message", client.command("RETR 9"));
}

#[test]
fn top_of_mail() {
    let setup = set_up("");
    setup.deliver("zim", ZIM_MAIL);
    let mut client = setup.log_in("zim", "irk");

    client.send("TOP 1 0");
    assert_eq!("+OK top of message follows", client.read_line());
    assert_eq!(
        vec![
            "From: <zim@irk.example>",
            "To: <gir@localhost>",
            "Subject: Orders",
            "",
        ],
        client.read_multiline()
    );

    client.send("TOP 1 2");
    assert_eq!("+OK top of message follows", client.read_line());
    assert_eq!(
        vec![
            "From: <zim@irk.example>",
            "To: <gir@localhost>",
            "Subject: Orders",
            "",
            "Obey the fist!",
            "..hidden in plain sight",
        ],
        client.read_multiline()
    );

    assert_eq!("-ERR missing argument", client.command("TOP"));
    assert_eq!("-ERR wrong number of arguments", client.command("TOP 1"));
    assert_eq!("-ERR no such message", client.command("TOP 2 1"));
}

#[test]
fn unique_ids() {
    let setup = set_up("");
    let id = setup.deliver("zim", ZIM_MAIL);
    let mut client = setup.log_in("zim", "irk");

    client.send("UIDL");
    assert_eq!("+OK", client.read_line());
    assert_eq!(vec![format!("1 {}", id)], client.read_multiline());
    assert_eq!(format!("+OK 1 {}", id), client.command("UIDL 1"));
    assert_eq!("-ERR no such message", client.command("UIDL 2"));
}

#[test]
fn hashed_unique_ids() {
    let setup = set_up("[pop3]\nuidl_hash = true");
    setup.deliver("zim", ZIM_MAIL);
    let mut client = setup.log_in("zim", "irk");

    let hash = md5_hex(ZIM_MAIL.as_bytes()).unwrap();
    assert_eq!(format!("+OK 1 {}", hash), client.command("UIDL 1"));
}

#[test]
fn delete_and_reset() {
    let setup = set_up("");
    setup.deliver("gir", "Subject: a\r\n\r\nwaffles\r\n");
    setup.deliver("gir", "Subject: b\r\n\r\ntacos\r\n");
    let mut client = setup.log_in("gir", "taco");

    assert_eq!("+OK mail marked for deletion", client.command("DELE 1"));
    assert_eq!("-ERR no such message", client.command("DELE 1"));
    assert_eq!("-ERR no such message", client.command("RETR 1"));
    assert_eq!("-ERR missing argument", client.command("DELE"));
    assert!(client.command("STAT").starts_with("+OK 1 "));

    assert_eq!("+OK deleted mails restored", client.command("RSET"));
    assert!(client.command("STAT").starts_with("+OK 2 "));
    assert_eq!("+OK bye", client.command("QUIT"));

    assert_eq!(2, setup.mail_files("gir").len());
    assert!(setup.mail_files("_trash/gir").is_empty());
}

#[test]
fn delete_and_quit_moves_to_trash() {
    let setup = set_up("");
    setup.deliver("gir", "Subject: a\r\n\r\nwaffles\r\n");
    setup.deliver("gir", "Subject: b\r\n\r\ntacos\r\n");
    let before = setup.mail_files("gir");
    let mut client = setup.log_in("gir", "taco");

    assert_eq!("+OK mail marked for deletion", client.command("DELE 1"));
    assert_eq!("+OK bye", client.command("QUIT"));
    assert!(client.read_to_eof().is_empty());

    let remaining = setup.mail_files("gir");
    let trashed = setup.mail_files("_trash/gir");
    assert_eq!(1, remaining.len());
    assert_eq!(1, trashed.len());
    let mut all = remaining.into_iter().chain(trashed).collect::<Vec<_>>();
    all.sort();
    assert_eq!(before, all);
    assert!(!setup.is_locked("gir"));
}

#[test]
fn disconnect_keeps_mail_and_releases_lock() {
    let setup = set_up("");
    setup.deliver("dib", "Subject: proof\r\n\r\nAliens!\r\n");
    let mut client = setup.log_in("dib", "bigheads");

    assert!(setup.is_locked("dib"));
    assert_eq!("+OK mail marked for deletion", client.command("DELE 1"));
    client.finish_sending();
    assert!(client.read_to_eof().is_empty());

    assert!(wait_until(Duration::from_secs(10), || !setup
        .is_locked("dib")));
    assert_eq!(1, setup.mail_files("dib").len());
    assert!(setup.mail_files("_trash/dib").is_empty());
}

#[test]
fn maildrop_in_use() {
    let setup = set_up("");
    let mut first = setup.log_in("zim", "irk");

    let (mut second, _) = setup.connect();
    assert_eq!("+OK", second.command("USER zim"));
    assert_eq!("-ERR maildrop already in use", second.command("PASS irk"));
    assert_eq!("-ERR no username given", second.command("PASS irk"));

    assert_eq!("+OK bye", first.command("QUIT"));
    assert!(first.read_to_eof().is_empty());

    assert_eq!("+OK", second.command("USER zim"));
    assert_eq!("+OK welcome zim", second.command("PASS irk"));
}

#[test]
fn unusable_maildrop_forgets_credentials() {
    let setup = set_up("");
    let maildrop_root = setup.root.path().join("maildrop");
    fs::create_dir_all(&maildrop_root).unwrap();
    fs::write(maildrop_root.join("zim"), b"not a directory").unwrap();

    let (mut client, _) = setup.connect();
    assert_eq!("+OK", client.command("USER zim"));
    assert_eq!(
        "-ERR operation failed with an error",
        client.command("PASS irk")
    );
    assert_eq!("-ERR no username given", client.command("PASS irk"));
    assert_eq!(
        "-ERR command invalid in this state",
        client.command("STAT")
    );
}

#[test]
fn new_mail_appears_on_list() {
    let setup = set_up("");
    let mut client = setup.log_in("zim", "irk");
    assert_eq!("+OK 0 0", client.command("STAT"));

    setup.deliver("zim", ZIM_MAIL);
    client.send("LIST");
    assert_eq!(format!("+OK 1 {}", ZIM_MAIL.len()), client.read_line());
    assert_eq!(1, client.read_multiline().len());
}

#[test]
fn stale_locks_removed_on_start() {
    let root = TempDir::new().unwrap();
    let user_dir = root.path().join("maildrop").join("zim");
    fs::create_dir_all(&user_dir).unwrap();
    fs::write(user_dir.join(".lock"), b"").unwrap();

    let config = test_config(&root, "");
    let factory = Arc::new(Pop3Factory::new(config).unwrap());
    assert!(factory.maildrops().open("zim").unwrap().is_locked());

    let _server = serve(Arc::clone(&factory) as Arc<dyn ProtocolFactory>);
    assert!(!factory.maildrops().open("zim").unwrap().is_locked());
}

#[test]
fn trash_restored_on_start() {
    let root = TempDir::new().unwrap();
    let trash = root.path().join("maildrop").join("_trash").join("gir");
    fs::create_dir_all(&trash).unwrap();
    fs::write(trash.join("20200101000000.eml"), b"old\r\n").unwrap();

    let config = test_config(&root, "[pop3]\nrestore_trash_on_start = true");
    let factory = Arc::new(Pop3Factory::new(config).unwrap());
    let _server = serve(Arc::clone(&factory) as Arc<dyn ProtocolFactory>);

    assert!(root
        .path()
        .join("maildrop")
        .join("gir")
        .join("20200101000000.eml")
        .is_file());
    assert!(!trash.join("20200101000000.eml").exists());
}
