use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

use crate::services::mailbox::MailboxError;

// An IMAP session is generic over the stream: here TLS over TCP,
// wrapped in the tokio compat layer.
pub type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

/// Open an implicit-TLS connection and LOGIN.
///
/// The password never reaches a log line; only the username does.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<ImapSession, MailboxError> {
    info!(host = %host, port = port, "Connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| MailboxError::Connection(format!("TCP connection failed: {}", e)))?;

    let tcp = tcp.compat();
    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp)
        .await
        .map_err(|e| MailboxError::Connection(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);

    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| login_error(e))?;

    debug!(username = %username, "IMAP login succeeded");
    Ok(session)
}

fn login_error(e: async_imap::error::Error) -> MailboxError {
    use async_imap::error::Error;

    match e {
        Error::No(msg) | Error::Bad(msg) => {
            warn!("IMAP server rejected login");
            MailboxError::Auth(format!("Login failed: {}", msg))
        }
        Error::Io(e) => MailboxError::Connection(format!("Connection dropped during login: {}", e)),
        Error::ConnectionLost => MailboxError::Connection("Connection lost during login".into()),
        other => MailboxError::Protocol(format!("Login failed: {}", other)),
    }
}
