//! Per-connection request handling.
//!
//! Reads fixed-size chunks from the client, serves the policy document on
//! the policy-file handshake, and echoes everything else back verbatim.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::policy::{PolicyDocument, POLICY_REQUEST};

/// Read buffer size
const BUFFER_SIZE: usize = 1024;

/// Handle a single client connection.
///
/// The write side is flushed and shut down on every exit path; close
/// failures are logged, never propagated. I/O errors terminate this
/// connection only.
pub async fn handle_connection<S>(mut stream: S, policy: PolicyDocument) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = serve(&mut stream, &policy).await;

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Error closing connection");
    }

    result
}

async fn serve<S>(stream: &mut S, policy: &PolicyDocument) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; BUFFER_SIZE];

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            trace!("Connection closed by client");
            return Ok(());
        }

        // Classify on the bytes actually received in this read. A handshake
        // split across reads is echoed back, not served.
        if &buf[..n] == POLICY_REQUEST {
            stream.write_all(policy.as_bytes()).await?;
            stream.flush().await?;
            debug!("Sent policy");
            return Ok(());
        }

        trace!(len = n, "Echoing request");
        stream.write_all(&buf[..n]).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_handshake_is_answered_with_policy() {
        let (mut client, server) = tokio::io::duplex(4096);
        let policy = PolicyDocument::default();
        let expected = policy.as_bytes().to_vec();

        let task = tokio::spawn(handle_connection(server, policy));

        client.write_all(POLICY_REQUEST).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        assert_eq!(response, expected);
        assert_ok!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_other_input_is_echoed_and_connection_stays_open() {
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(server, PolicyDocument::default()));

        let mut echo = [0u8; 16];

        client.write_all(b"hello\0").await.unwrap();
        client.read_exact(&mut echo[..6]).await.unwrap();
        assert_eq!(&echo[..6], b"hello\0");

        // Still open: a second message round-trips too.
        client.write_all(b"again\0").await.unwrap();
        client.read_exact(&mut echo[..6]).await.unwrap();
        assert_eq!(&echo[..6], b"again\0");

        drop(client);
        assert_ok!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_split_handshake_is_echoed_not_served() {
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(server, PolicyDocument::default()));

        let (head, tail) = POLICY_REQUEST.split_at(10);

        client.write_all(head).await.unwrap();
        let mut echo = vec![0u8; head.len()];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, head);

        client.write_all(tail).await.unwrap();
        let mut echo = vec![0u8; tail.len()];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(echo, tail);

        drop(client);
        assert_ok!(task.await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_23_byte_message_is_echoed() {
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(server, PolicyDocument::default()));

        let message = b"<policy-file-request/!\0";
        assert_eq!(message.len(), POLICY_REQUEST.len());

        client.write_all(message).await.unwrap();
        let mut echo = [0u8; 23];
        client.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, message);

        drop(client);
        assert_ok!(task.await.unwrap());
    }
}
