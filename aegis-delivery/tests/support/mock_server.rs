//! Minimal SMTP relay for exercising the real transport.
//!
//! Replies are configurable per command so tests can inject 4xx and 5xx
//! answers; every received command is recorded.

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message content received after DATA
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
struct Replies {
    rcpt_to: Reply,
    data_end: Reply,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            rcpt_to: Reply::new(250, "OK"),
            data_end: Reply::new(250, "OK: queued as MOCK1"),
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            replies: Replies::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    pub async fn message(&self) -> Option<String> {
        self.commands().await.into_iter().find_map(|command| match command {
            SmtpCommand::MessageContent(content) => Some(content),
            _ => None,
        })
    }

    async fn handle_client(
        mut stream: TcpStream,
        replies: Arc<Replies>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(b"220 mock.example.com ESMTP\r\n").await?;

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let input = line.trim_end().to_string();
            let (verb, argument) = input.split_once(' ').unwrap_or((input.as_str(), ""));

            let (command, reply) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (
                    SmtpCommand::Ehlo(argument.to_string()),
                    b"250-mock.example.com\r\n250 8BITMIME\r\n".to_vec(),
                ),
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    Reply::new(250, "OK").to_bytes(),
                ),
                "RCPT" => (
                    SmtpCommand::RcptTo(argument.to_string()),
                    replies.rcpt_to.to_bytes(),
                ),
                "RSET" | "NOOP" => (
                    SmtpCommand::Other(input.clone()),
                    Reply::new(250, "OK").to_bytes(),
                ),
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    writer
                        .write_all(&Reply::new(354, "End data with <CR><LF>.<CR><LF>").to_bytes())
                        .await?;

                    let mut content = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        content.push_str(&line);
                    }

                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MessageContent(content));
                    writer.write_all(&replies.data_end.to_bytes()).await?;
                    continue;
                }
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(input.clone()),
                    Reply::new(500, "Unknown command").to_bytes(),
                ),
            };

            commands.write().await.push(command);
            writer.write_all(&reply).await?;
        }
    }
}

pub struct MockSmtpServerBuilder {
    replies: Replies,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.replies.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.replies.data_end = Reply::new(code, message);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let replies = Arc::new(self.replies);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let task_commands = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let replies = Arc::clone(&replies);
                let commands = Arc::clone(&task_commands);
                tokio::spawn(async move {
                    let _ = MockSmtpServer::handle_client(stream, replies, commands).await;
                });
            }
        });

        Ok(MockSmtpServer { addr, commands })
    }
}
