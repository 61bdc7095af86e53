use std::{
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use sluice_common::{ConfigError, Message, outgoing};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf},
    net::TcpStream,
    time::timeout,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{Transport, TransportReceipt};
use crate::TransportError;

/// Upper bound on a single reply line, to stop a misbehaving server from
/// growing the buffer without limit
const MAX_REPLY_LINE: usize = 4096;

fn default_host() -> String {
    "smtp.mailtrap.io".to_string()
}

const fn default_port() -> u16 {
    25
}

fn default_helo() -> String {
    "localhost".to_string()
}

const fn default_timeout() -> u64 {
    30
}

/// Whether the session is encrypted before credentials are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsMode {
    /// Upgrade with `STARTTLS` after the first `EHLO`. A server that does not
    /// offer it is refused before `AUTH`.
    #[default]
    StartTls,
    /// Stay in plaintext for the whole session, credentials included.
    Disabled,
}

/// Connection settings for [`SmtpTransport`].
///
/// ```ron
/// smtp: (
///     host: "smtp.mailtrap.io",
///     port: 2525,
///     username: "user",
///     password: "secret",
///     tls: StartTls,
/// ),
/// ```
#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Name announced in `EHLO`
    #[serde(default = "default_helo")]
    pub helo: String,

    /// Limit on connecting and on each command/reply exchange
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub tls: TlsMode,

    /// Skip certificate verification. Only for self-signed test servers.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            helo: default_helo(),
            timeout_secs: default_timeout(),
            tls: TlsMode::default(),
            accept_invalid_certs: false,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("helo", &self.helo)
            .field("timeout_secs", &self.timeout_secs)
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

impl SmtpConfig {
    /// Check that the settings are usable.
    ///
    /// # Errors
    /// [`ConfigError::MissingField`] if either credential is absent and
    /// [`ConfigError::InvalidValue`] for an empty host or a zero timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "smtp.host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "smtp.timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.username.is_none() {
            return Err(ConfigError::MissingField("smtp.username"));
        }

        if self.password.is_none() {
            return Err(ConfigError::MissingField("smtp.password"));
        }

        Ok(())
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Delivers each message over a fresh SMTP submission session.
///
/// The conversation is greeting, `EHLO`, `STARTTLS` and a second `EHLO`
/// (unless TLS is disabled), `AUTH PLAIN`, `MAIL FROM`, one `RCPT TO` per
/// recipient, `DATA`, then `QUIT`. Every step is bounded by the configured
/// timeout. Any recipient being refused fails the whole message.
#[derive(Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
    tls: Option<TlsConnector>,
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl SmtpTransport {
    /// # Errors
    /// If the configuration does not pass [`SmtpConfig::validate`]
    pub fn new(config: SmtpConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let tls = match config.tls {
            TlsMode::StartTls => Some(tls_connector(config.accept_invalid_certs)),
            TlsMode::Disabled => {
                outgoing!(
                    level = WARN,
                    "TLS is disabled, credentials for {} will be sent in plaintext",
                    config.host
                );
                None
            }
        };

        Ok(Self { config, tls })
    }

    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }

    async fn connect(&self) -> Result<Session, TransportError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        let limit = self.config.timeout();

        let stream = timeout(limit, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;

        outgoing!(level = DEBUG, "Connected to {address}");

        Ok(Session {
            stream: BufReader::new(Connection::Plain(stream)),
            limit,
        })
    }

    /// Encrypt `session` if TLS is enabled, refusing servers that cannot.
    async fn secure(&self, mut session: Session, ehlo: &Reply) -> Result<Session, TransportError> {
        let Some(connector) = &self.tls else {
            return Ok(session);
        };

        if !ehlo.offers("STARTTLS") {
            return Err(TransportError::Tls(format!(
                "{} does not offer STARTTLS, refusing to send credentials in the clear",
                self.config.host
            )));
        }

        session
            .command("STARTTLS")
            .await?
            .require("STARTTLS", ReplyClass::Completion)?;

        let mut session = session.upgrade(connector, &self.config.host).await?;
        session.ehlo(&self.config.helo).await?;

        Ok(session)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(message = %message.id(), host = %self.config.host))]
    async fn deliver(&self, message: &Message) -> Result<TransportReceipt, TransportError> {
        let sender = message
            .envelope_sender()
            .ok_or_else(|| TransportError::Protocol("message has no sender".to_string()))?;

        let mut session = self.connect().await?;

        session
            .read_reply()
            .await?
            .require("greeting", ReplyClass::Completion)?;
        let ehlo = session.ehlo(&self.config.helo).await?;
        let mut session = self.secure(session, &ehlo).await?;

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            let token = STANDARD.encode(format!("\0{username}\0{password}"));
            session
                .command(&format!("AUTH PLAIN {token}"))
                .await?
                .require("AUTH", ReplyClass::Completion)?;
        }

        session
            .command(&format!("MAIL FROM:<{}>", sender.addr()))
            .await?
            .require("MAIL FROM", ReplyClass::Completion)?;

        for recipient in message.recipients() {
            session
                .command(&format!("RCPT TO:<{}>", recipient.addr()))
                .await?
                .require("RCPT TO", ReplyClass::Completion)?;
        }

        session
            .command("DATA")
            .await?
            .require("DATA", ReplyClass::Intermediate)?;
        let accepted = session
            .send_data(&dot_stuff(&message.render()))
            .await?
            .require("message data", ReplyClass::Completion)?;

        if let Err(e) = session.command("QUIT").await {
            outgoing!(level = DEBUG, "QUIT failed after delivery: {e}");
        }

        outgoing!(
            level = INFO,
            "Delivered message {} to {}: {accepted}",
            message.id(),
            message.recipients()
        );

        Ok(TransportReceipt::new(accepted.code, accepted.text()))
    }
}

fn tls_connector(accept_invalid_certs: bool) -> TlsConnector {
    let mut roots = RootCertStore::empty();

    if !accept_invalid_certs {
        let native = rustls_native_certs::load_native_certs();
        if !native.errors.is_empty() {
            outgoing!(
                level = WARN,
                "Some system certificates could not be loaded: {:?}",
                native.errors
            );
        }

        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        outgoing!(level = DEBUG, "Loaded {added} system certificates, ignored {ignored}");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    TlsConnector::from(Arc::new(config))
}

/// Accepts any certificate, for `accept_invalid_certs`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// A session's socket, before or after `STARTTLS`.
enum Connection {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

struct Session {
    stream: BufReader<Connection>,
    limit: Duration,
}

impl Session {
    async fn ehlo(&mut self, helo: &str) -> Result<Reply, TransportError> {
        self.command(&format!("EHLO {helo}"))
            .await?
            .require("EHLO", ReplyClass::Completion)
    }

    async fn command(&mut self, command: &str) -> Result<Reply, TransportError> {
        if command.starts_with("AUTH") {
            outgoing!("C: AUTH PLAIN <redacted>");
        } else {
            outgoing!("C: {command}");
        }

        self.write(format!("{command}\r\n").as_bytes()).await?;
        self.read_reply().await
    }

    async fn send_data(&mut self, data: &str) -> Result<Reply, TransportError> {
        self.write(data.as_bytes()).await?;
        self.write(b".\r\n").await?;
        self.read_reply().await
    }

    async fn upgrade(self, connector: &TlsConnector, host: &str) -> Result<Self, TransportError> {
        let limit = self.limit;
        let Connection::Plain(stream) = self.stream.into_inner() else {
            return Err(TransportError::Tls("session is already encrypted".to_string()));
        };

        let name = ServerName::try_from(host.to_string())
            .map_err(|e| TransportError::Tls(format!("invalid server name {host}: {e}")))?;

        let stream = timeout(limit, connector.connect(name, stream))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        outgoing!(level = DEBUG, "Session with {host} upgraded to TLS");

        Ok(Self {
            stream: BufReader::new(Connection::Tls(Box::new(stream))),
            limit,
        })
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let limit = self.limit;
        let stream = self.stream.get_mut();

        timeout(limit, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout(limit))??;

        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply, TransportError> {
        let limit = self.limit;
        let mut lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let mut bounded = (&mut self.stream).take(MAX_REPLY_LINE as u64 + 1);
            let read = timeout(limit, bounded.read_line(&mut line))
                .await
                .map_err(|_| TransportError::Timeout(limit))??;

            if read == 0 {
                return Err(TransportError::Protocol(
                    "connection closed mid-reply".to_string(),
                ));
            }

            if line.len() > MAX_REPLY_LINE {
                return Err(TransportError::Protocol(format!(
                    "reply line exceeds {MAX_REPLY_LINE} bytes"
                )));
            }

            let parsed = ReplyLine::parse(line.trim_end_matches(['\r', '\n']))?;
            outgoing!("S: {} {}", parsed.code, parsed.text);

            if let Some(first) = lines.first().map(|first: &ReplyLine| first.code)
                && first != parsed.code
            {
                return Err(TransportError::Protocol(format!(
                    "reply code changed from {first} to {} mid-reply",
                    parsed.code
                )));
            }

            let last = parsed.last;
            lines.push(parsed);

            if last {
                break;
            }
        }

        Ok(Reply {
            code: lines.first().map_or(0, |line| line.code),
            lines: lines.into_iter().map(|line| line.text).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplyLine {
    code: u16,
    last: bool,
    text: String,
}

impl ReplyLine {
    fn parse(line: &str) -> Result<Self, TransportError> {
        let malformed = || TransportError::Protocol(format!("malformed reply line '{line}'"));

        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(malformed)?;

        let (last, text) = match line.get(3..4) {
            None | Some("") => (true, ""),
            Some(" ") => (true, &line[4..]),
            Some("-") => (false, &line[4..]),
            Some(_) => return Err(malformed()),
        };

        Ok(Self {
            code,
            last,
            text: text.to_string(),
        })
    }
}

/// The first digit of a reply code, per RFC 5321 section 4.2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyClass {
    /// `2yz`
    Completion,
    /// `3yz`, e.g. `354` after `DATA`
    Intermediate,
}

impl ReplyClass {
    const fn digit(self) -> u16 {
        match self {
            Self::Completion => 2,
            Self::Intermediate => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Whether an `EHLO` reply advertises `keyword`.
    ///
    /// The first line is the server's greeting, so only later lines count.
    fn offers(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
        })
    }

    /// Accept any code in `class`; anything else is a rejection at `stage`.
    fn require(self, stage: &'static str, class: ReplyClass) -> Result<Self, TransportError> {
        if self.code / 100 == class.digit() {
            Ok(self)
        } else {
            Err(TransportError::Rejected {
                stage,
                code: self.code,
                message: self.text(),
            })
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// Escape lines beginning with `.` so they are not read as end of data.
fn dot_stuff(rendered: &str) -> String {
    let mut out = String::with_capacity(rendered.len() + 16);

    for line in rendered.split_inclusive('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }

    if !out.ends_with("\r\n") {
        out.push_str("\r\n");
    }

    out
}
