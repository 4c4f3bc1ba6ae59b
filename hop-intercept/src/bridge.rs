//! Bidirectional byte pump between a client and its destination

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// Side whose outbound stream finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// The client stopped sending
    Client,
    /// The destination stopped sending
    Remote,
}

/// Copy bytes both ways until either direction finishes
///
/// The other direction is abandoned as soon as one side reaches EOF or fails,
/// so bytes the remaining side has not yet forwarded are lost. Half-closed
/// connections are not drained.
pub async fn bridge<A, B>(client: A, remote: B) -> (Closed, io::Result<u64>)
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    tokio::select! {
        r = tokio::io::copy(&mut client_rd, &mut remote_wr) => (Closed::Client, r),
        r = tokio::io::copy(&mut remote_rd, &mut client_wr) => (Closed::Remote, r),
    }
}
