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

//! Delivery of accepted mail.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::prelude::*;
use log::{debug, error, info};
use rand::Rng;

use crate::maildrop::{MailAddress, MaildropFactory};
use crate::support::system_config::{SmtpConfig, SystemConfig};
use crate::support::threading::WorkerPool;

/// A message accepted by SMTP, with the sender and recipients from its
/// envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from: MailAddress,
    pub recipients: Vec<MailAddress>,
    pub content: String,
    /// The address of our end of the connection the message came in on.
    /// Domain literals naming it count as local.
    pub local_ip: Option<IpAddr>,
}

/// Where SMTP sessions hand off the messages they accept.
pub trait DeliveryQueue: Send + Sync {
    /// Queue `envelope` for delivery and return its queue id.
    ///
    /// This must not block on the delivery itself; the client is told the
    /// message was queued as soon as this returns.
    fn submit(&self, envelope: Envelope) -> usize;
}

/// Delivers mail to local maildrops on a small pool of worker threads.
///
/// There is no retry and nothing is persisted; mail still queued when the
/// process exits is lost.
pub struct TransmissionQueue {
    pool: WorkerPool,
    last_id: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    agent: Arc<DeliveryAgent>,
}

struct DeliveryAgent {
    host: String,
    maildrops: MaildropFactory,
    config: Arc<SystemConfig>,
    random_send_delay: u64,
    create_error_mails: bool,
}

impl TransmissionQueue {
    pub fn new(
        config: Arc<SystemConfig>,
        smtp: &SmtpConfig,
        host: String,
        maildrops: MaildropFactory,
    ) -> Self {
        TransmissionQueue {
            pool: WorkerPool::new("smtp-delivery", smtp.delivery_workers),
            last_id: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            agent: Arc::new(DeliveryAgent {
                host,
                maildrops,
                config,
                random_send_delay: smtp.random_send_delay,
                create_error_mails: smtp.create_error_mails,
            }),
        }
    }

    /// The number of messages submitted but not yet fully delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(SeqCst)
    }

    /// Wait up to `timeout` for every submitted message to be delivered.
    ///
    /// Returns whether the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl DeliveryQueue for TransmissionQueue {
    fn submit(&self, envelope: Envelope) -> usize {
        let id = self.last_id.fetch_add(1, SeqCst) + 1;
        debug!(
            "[queue {}] Message queued for transmission from {} ({} bytes)",
            id,
            envelope.from,
            envelope.content.len()
        );

        self.in_flight.fetch_add(1, SeqCst);
        let in_flight = Arc::clone(&self.in_flight);
        let agent = Arc::clone(&self.agent);
        self.pool.submit(move || {
            agent.transmit(id, &envelope);
            in_flight.fetch_sub(1, SeqCst);
        });

        id
    }
}

impl DeliveryAgent {
    fn transmit(&self, id: usize, envelope: &Envelope) {
        if self.random_send_delay > 0 {
            let delay = rand::thread_rng().gen_range(0, self.random_send_delay);
            thread::sleep(Duration::from_millis(delay));
        }

        for recipient in &envelope.recipients {
            if self.is_local_user(recipient, envelope.local_ip) {
                self.store(id, recipient.mailbox(), &envelope.content);
            } else if self.create_error_mails
                && self.is_local_user(&envelope.from, envelope.local_ip)
            {
                let notice = self.failure_notice(id, envelope, recipient);
                self.store(id, envelope.from.mailbox(), &notice);
            } else {
                debug!(
                    "[queue {}] {} is unreachable, dropping the message",
                    id, recipient
                );
            }
        }
    }

    fn is_local_user(
        &self,
        address: &MailAddress,
        local_ip: Option<IpAddr>,
    ) -> bool {
        address.is_local(&self.host, local_ip)
            && self.config.has_user(address.mailbox())
    }

    fn store(&self, id: usize, user: &str, content: &str) {
        match self.maildrops.deliver(user, content) {
            Ok(mail_id) => info!(
                "[queue {}] Delivered {} bytes to {} as {}",
                id,
                content.len(),
                user,
                mail_id
            ),
            Err(e) => {
                error!("[queue {}] Failed to deliver to {}: {}", id, user, e)
            }
        }
    }

    fn failure_notice(
        &self,
        id: usize,
        envelope: &Envelope,
        recipient: &MailAddress,
    ) -> String {
        let now = Local::now();
        let lines = [
            format!("From: Mail Delivery System <MAILER-DAEMON@{}>", self.host),
            format!("To: {}", envelope.from.to_qualified_string()),
            "Subject: Undelivered Mail Returned to Sender".to_owned(),
            format!("Date: {}", now.to_rfc2822()),
            format!("Message-ID: <{}.{}@{}>", now.timestamp(), id, self.host),
            "Content-Type: text/plain; charset=utf-8".to_owned(),
            String::new(),
            format!("This is the mail system at host {}.", self.host),
            String::new(),
            "Your message could not be delivered to the following recipient:"
                .to_owned(),
            String::new(),
            format!("    {}: no such mailbox", recipient.to_qualified_string()),
            String::new(),
            "--- Original message follows ---".to_owned(),
            String::new(),
        ];

        let mut notice = lines.join("\r\n");
        notice.push_str("\r\n");
        notice.push_str(&envelope.content);
        notice
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;
    use crate::maildrop::LockMode;

    struct Setup {
        _root: TempDir,
        maildrops: MaildropFactory,
        queue: TransmissionQueue,
    }

    fn set_up(random_send_delay: u64, create_error_mails: bool) -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let mut config = SystemConfig::default();
        config.merge_toml("[users]\nzim = \"irk\"\ngir = \"taco\"").unwrap();
        let config = Arc::new(config);

        let mut smtp: SmtpConfig = config.section("smtp").unwrap();
        smtp.random_send_delay = random_send_delay;
        smtp.create_error_mails = create_error_mails;

        let maildrops =
            MaildropFactory::new(root.path(), "_trash", LockMode::Advisory);
        let queue = TransmissionQueue::new(
            config,
            &smtp,
            "localhost".to_owned(),
            maildrops.clone(),
        );

        Setup {
            _root: root,
            maildrops,
            queue,
        }
    }

    fn texts(maildrops: &MaildropFactory, user: &str) -> Vec<String> {
        let mut maildrop = maildrops.open(user).unwrap();
        let mails = maildrop.list_mails().unwrap();
        mails
            .iter()
            .map(|m| maildrop.text(m.number()).unwrap())
            .collect()
    }

    #[test]
    fn delivers_to_local_users() {
        let setup = set_up(20, false);
        let id = setup.queue.submit(Envelope {
            from: MailAddress::new("someone", "elsewhere.example"),
            recipients: vec![
                MailAddress::new("zim", "localhost"),
                MailAddress::new("gir", "[127.0.0.1]"),
                MailAddress::new("dib", "localhost"),
            ],
            content: "Subject: hi\r\n\r\nDoom!\r\n".to_owned(),
            local_ip: None,
        });
        assert_eq!(1, id);
        assert!(setup.queue.wait_idle(Duration::from_secs(10)));

        assert_eq!(
            vec!["Subject: hi\r\n\r\nDoom!\r\n"],
            texts(&setup.maildrops, "zim")
        );
        assert_eq!(
            vec!["Subject: hi\r\n\r\nDoom!\r\n"],
            texts(&setup.maildrops, "gir")
        );
    }

    #[test]
    fn queue_ids_increase() {
        let setup = set_up(0, false);
        let envelope = Envelope {
            from: MailAddress::new("zim", "localhost"),
            recipients: vec![],
            content: String::new(),
            local_ip: None,
        };
        assert_eq!(1, setup.queue.submit(envelope.clone()));
        assert_eq!(2, setup.queue.submit(envelope.clone()));
        assert_eq!(3, setup.queue.submit(envelope));
        assert!(setup.queue.wait_idle(Duration::from_secs(10)));
        assert_eq!(0, setup.queue.in_flight());
    }

    #[test]
    fn failure_notice_goes_to_local_sender() {
        let setup = set_up(0, true);
        setup.queue.submit(Envelope {
            from: MailAddress::new("zim", "LOCALHOST"),
            recipients: vec![MailAddress::new("dib", "earth.example")],
            content: "Subject: invasion\r\n\r\nSoon.\r\n".to_owned(),
            local_ip: None,
        });
        assert!(setup.queue.wait_idle(Duration::from_secs(10)));

        let texts = texts(&setup.maildrops, "zim");
        assert_eq!(1, texts.len());
        assert!(texts[0].contains("<dib@earth.example>: no such mailbox"));
        assert!(texts[0].ends_with("Subject: invasion\r\n\r\nSoon.\r\n"));
    }

    #[test]
    fn no_failure_notice_when_disabled() {
        let setup = set_up(0, false);
        setup.queue.submit(Envelope {
            from: MailAddress::new("zim", "localhost"),
            recipients: vec![MailAddress::new("dib", "earth.example")],
            content: "Subject: invasion\r\n\r\nSoon.\r\n".to_owned(),
            local_ip: None,
        });
        assert!(setup.queue.wait_idle(Duration::from_secs(10)));
        assert!(texts(&setup.maildrops, "zim").is_empty());
    }

    #[test]
    fn literal_of_receiving_address_is_local() {
        let setup = set_up(0, true);
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        setup.queue.submit(Envelope {
            from: MailAddress::new("gir", "[10.1.2.3]"),
            recipients: vec![
                MailAddress::new("zim", "[10.1.2.3]"),
                MailAddress::new("dib", "[10.1.2.3]"),
            ],
            content: "Subject: tacos\r\n\r\nMore.\r\n".to_owned(),
            local_ip: Some(ip),
        });
        assert!(setup.queue.wait_idle(Duration::from_secs(10)));

        assert_eq!(
            vec!["Subject: tacos\r\n\r\nMore.\r\n"],
            texts(&setup.maildrops, "zim")
        );
        // dib is not a user here, so gir gets the failure notice
        let notices = texts(&setup.maildrops, "gir");
        assert_eq!(1, notices.len());
        assert!(notices[0].contains("<dib@[10.1.2.3]>: no such mailbox"));
    }
}
