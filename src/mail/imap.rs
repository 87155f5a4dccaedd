//! Raw IMAP over TLS (blocking — callers run it inside `spawn_blocking`).

use std::io::{Read as IoRead, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::ImapConfig;
use crate::error::MailError;
use crate::mail::{MailSession, MailSource, MessageRef, RawMessage};

/// IMAP mail source.
pub struct ImapSource {
    read_timeout: Duration,
}

impl ImapSource {
    pub fn new() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ImapSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MailSource for ImapSource {
    fn open_session(&self, credentials: &ImapConfig) -> Result<Box<dyn MailSession>, MailError> {
        let session = ImapSession::open(credentials, self.read_timeout)?;
        Ok(Box::new(session))
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One logged-in IMAP connection.
pub struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    fn open(config: &ImapConfig, read_timeout: Duration) -> Result<Self, MailError> {
        info!(host = %config.host, port = config.port, "connecting to IMAP server");

        let tcp = TcpStream::connect((&*config.host, config.port))
            .map_err(|e| MailError::Connect(e.to_string()))?;
        tcp.set_read_timeout(Some(read_timeout))
            .map_err(|e| MailError::Connect(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.host.clone())
                .map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self { tls, tag_counter: 0 };

        // Server greeting
        session
            .read_line()
            .map_err(|e| MailError::Connect(e.to_string()))?;

        let login = format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        );
        let resp = session
            .command(&login)
            .map_err(|e| MailError::Login(e.to_string()))?;
        if !response_ok(&resp) {
            return Err(MailError::Login(tagged_line(&resp)));
        }

        info!(username = %config.username, "IMAP login successful");
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, std::io::Error> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "IMAP connection closed",
                    ));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a tagged command and collect every response line up to the
    /// tagged completion line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, std::io::Error> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        let full = format!("{tag} {cmd}\r\n");
        self.tls.write_all(full.as_bytes())?;
        self.tls.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }
}

impl MailSession for ImapSession {
    fn list_unread(&mut self, folder: &str) -> Result<Vec<MessageRef>, MailError> {
        debug!(folder, "selecting IMAP folder");
        let resp = self
            .command(&format!("SELECT \"{folder}\""))
            .map_err(|e| MailError::Select {
                folder: folder.to_string(),
                reason: e.to_string(),
            })?;
        if !response_ok(&resp) {
            return Err(MailError::Select {
                folder: folder.to_string(),
                reason: tagged_line(&resp),
            });
        }

        let resp = self
            .command("SEARCH UNSEEN")
            .map_err(|e| MailError::Search {
                folder: folder.to_string(),
                reason: e.to_string(),
            })?;
        if !response_ok(&resp) {
            return Err(MailError::Search {
                folder: folder.to_string(),
                reason: tagged_line(&resp),
            });
        }

        let refs = parse_search_response(&resp);
        debug!(folder, count = refs.len(), "unread messages found");
        Ok(refs)
    }

    fn fetch(&mut self, msg: &MessageRef) -> Result<RawMessage, MailError> {
        let resp = self
            .command(&format!("FETCH {} RFC822", msg.seq))
            .map_err(|e| MailError::Fetch {
                seq: msg.seq.clone(),
                reason: e.to_string(),
            })?;
        if !response_ok(&resp) {
            return Err(MailError::Fetch {
                seq: msg.seq.clone(),
                reason: tagged_line(&resp),
            });
        }

        // Drop the untagged FETCH header line, the closing paren line, and
        // the tagged completion line; what remains is the literal.
        let data: String = resp
            .iter()
            .skip(1)
            .take(resp.len().saturating_sub(3))
            .cloned()
            .collect();

        // Mark seen; a failure here is not worth failing the message over.
        let _ = self.command(&format!("STORE {} +FLAGS (\\Seen)", msg.seq));

        Ok(RawMessage { data })
    }

    fn close(&mut self) -> Result<(), MailError> {
        self.command("LOGOUT")
            .map(|_| ())
            .map_err(|_| MailError::Closed)
    }
}

/// `true` when the tagged completion line reports OK.
fn response_ok(lines: &[String]) -> bool {
    lines
        .last()
        .is_some_and(|l| l.split_whitespace().nth(1) == Some("OK"))
}

/// The tagged completion line, for error reporting.
fn tagged_line(lines: &[String]) -> String {
    lines.last().map(|l| l.trim().to_string()).unwrap_or_default()
}

/// Pull sequence numbers out of `* SEARCH n1 n2 ...` lines.
fn parse_search_response(lines: &[String]) -> Vec<MessageRef> {
    let mut refs = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            for seq in line.split_whitespace().skip(2) {
                refs.push(MessageRef {
                    seq: seq.to_string(),
                });
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_extracts_sequence_numbers() {
        let lines = vec![
            "* SEARCH 3 7 12\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        let refs = parse_search_response(&lines);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].seq, "3");
        assert_eq!(refs[2].seq, "12");
    }

    #[test]
    fn parse_search_empty_result() {
        let lines = vec![
            "* SEARCH\r\n".to_string(),
            "A3 OK SEARCH completed\r\n".to_string(),
        ];
        assert!(parse_search_response(&lines).is_empty());
    }

    #[test]
    fn response_ok_checks_tagged_status() {
        let ok = vec!["* SEARCH 1\r\n".into(), "A3 OK done\r\n".into()];
        assert!(response_ok(&ok));

        let no = vec!["A4 NO [NONEXISTENT] Unknown Mailbox\r\n".into()];
        assert!(!response_ok(&no));

        let bad = vec!["A5 BAD parse error\r\n".into()];
        assert!(!response_ok(&bad));
    }

    #[test]
    fn tagged_line_reports_last_line() {
        let lines = vec![
            "* 2 EXISTS\r\n".to_string(),
            "A2 NO SELECT failed\r\n".to_string(),
        ];
        assert_eq!(tagged_line(&lines), "A2 NO SELECT failed");
    }
}
