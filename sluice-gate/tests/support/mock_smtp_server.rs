//! Scripted SMTP server on a loopback port.
//!
//! Every reply can be overridden, and the server records what the client
//! sent so tests can check the conversation. With [`MockSmtpServerBuilder::with_starttls`]
//! it upgrades to TLS using a freshly generated self-signed certificate.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
};
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    StartTls,
    /// Not sent by the client; marks where the handshake completed.
    TlsEstablished,
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    MessageContent(String),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    ehlo_capabilities: Vec<String>,
    advertise_starttls: bool,
    starttls: Reply,
    tls: Option<Arc<ServerConfig>>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    stall_on: Option<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "Mock SMTP Server"),
            ehlo_capabilities: vec!["localhost".to_string(), "AUTH PLAIN".to_string()],
            advertise_starttls: false,
            starttls: Reply::new(220, "Ready to start TLS"),
            tls: None,
            auth: Reply::new(235, "Authentication succeeded"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued as 12345"),
            stall_on: None,
        }
    }
}

/// What the connection does after a conversation segment ends.
enum Next {
    Close,
    StartTls(Arc<ServerConfig>),
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> io::Result<()> {
        let mut plain = BufReader::new(stream);
        plain.write_all(&script.greeting.to_bytes()).await?;

        let Next::StartTls(config) = Self::converse(&mut plain, &script, &commands, false).await?
        else {
            return Ok(());
        };

        let stream = TlsAcceptor::from(config).accept(plain.into_inner()).await?;
        commands.write().await.push(SmtpCommand::TlsEstablished);

        let mut encrypted = BufReader::new(stream);
        Self::converse(&mut encrypted, &script, &commands, true).await?;

        Ok(())
    }

    async fn converse<S>(
        stream: &mut BufReader<S>,
        script: &Script,
        commands: &RwLock<Vec<SmtpCommand>>,
        encrypted: bool,
    ) -> io::Result<Next>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            line.clear();
            if stream.read_line(&mut line).await? == 0 {
                return Ok(Next::Close);
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line.as_str(), ""));
            let verb = verb.to_uppercase();

            if script.stall_on == Some(verb.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(Next::Close);
            }

            let (command, reply) = match verb.as_str() {
                "EHLO" => {
                    let mut capabilities = script.ehlo_capabilities.clone();
                    if script.advertise_starttls && !encrypted {
                        capabilities.push("STARTTLS".to_string());
                    }

                    let mut reply = String::new();
                    let count = capabilities.len();
                    for (i, capability) in capabilities.iter().enumerate() {
                        let separator = if i + 1 == count { ' ' } else { '-' };
                        reply.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), reply.into_bytes())
                }
                "STARTTLS" => (SmtpCommand::StartTls, script.starttls.to_bytes()),
                "AUTH" => (SmtpCommand::Auth(argument.to_string()), script.auth.to_bytes()),
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    script.mail_from.to_bytes(),
                ),
                "RCPT" => (
                    SmtpCommand::RcptTo(argument.to_string()),
                    script.rcpt_to.to_bytes(),
                ),
                "DATA" => (SmtpCommand::Data, script.data.to_bytes()),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(Next::Close);
                }
                _ => (
                    SmtpCommand::Other(command_line.clone()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            let is_starttls = command == SmtpCommand::StartTls;
            commands.write().await.push(command);
            stream.write_all(&reply).await?;

            if is_starttls
                && script.starttls.code == 220
                && !encrypted
                && let Some(config) = &script.tls
            {
                return Ok(Next::StartTls(Arc::clone(config)));
            }

            if is_data && script.data.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await? == 0 {
                        return Ok(Next::Close);
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                stream.write_all(&script.data_end.to_bytes()).await?;
            }
        }
    }
}

fn self_signed_config() -> Arc<ServerConfig> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generate certificate");
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .expect("server TLS config");

    Arc::new(config)
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_auth_response(mut self, code: u16, message: &str) -> Self {
        self.script.auth = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: &str) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Advertise `STARTTLS` and complete a real handshake when asked.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.script.advertise_starttls = true;
        self.script.tls = Some(self_signed_config());
        self
    }

    /// Advertise `STARTTLS` but answer it with `code` instead of upgrading.
    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: &str) -> Self {
        self.script.advertise_starttls = true;
        self.script.starttls = Reply::new(code, message);
        self
    }

    /// Never answer the given verb, e.g. `"MAIL"`.
    #[must_use]
    pub const fn stall_on(mut self, verb: &'static str) -> Self {
        self.script.stall_on = Some(verb);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let accept_commands = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _peer)) = listener.accept().await {
                let script = Arc::clone(&script);
                let commands = Arc::clone(&accept_commands);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, script, commands).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer { addr, commands })
    }
}
