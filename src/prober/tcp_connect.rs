use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use super::SocketDetail;
use crate::error::AttemptError;
use crate::timestamp::monotonic_ns;

/// How one connect attempt ended, before it is counted.
#[derive(Debug)]
pub enum Handshake {
    Connected {
        stream: TcpStream,
        completed_ns: u64,
        socket: SocketDetail,
    },
    TimedOut {
        socket: SocketDetail,
    },
    Failed {
        error: AttemptError,
        socket: SocketDetail,
    },
}

/// Run one TCP handshake against `host:port`, bounded by `limit`.
pub async fn probe_tcp(host: &str, port: u16, limit: Duration) -> Handshake {
    let mut socket = SocketDetail::default();
    let res = timeout(limit, open(host, port, &mut socket)).await;
    let completed_ns = monotonic_ns();

    match res {
        Ok(Ok(stream)) => {
            socket.remote = stream.peer_addr().ok();
            Handshake::Connected { stream, completed_ns, socket }
        }
        Ok(Err(e)) => Handshake::Failed {
            error: AttemptError::from_io(&e),
            socket,
        },
        Err(_) => Handshake::TimedOut { socket },
    }
}

/// Graceful close of a completed handshake: half-close, then drop.
pub async fn close(mut stream: TcpStream) {
    let _ = stream.shutdown().await;
}

async fn open(host: &str, port: u16, detail: &mut SocketDetail) -> io::Result<TcpStream> {
    let addr = resolve(host, port).await?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if in_progress(&e) => {}
        Err(e) => return Err(e),
    }

    // the kernel binds the source port as soon as connect is issued
    detail.local = socket
        .local_addr()
        .ok()
        .and_then(|a| a.as_socket())
        .filter(|a| a.port() != 0);

    let stream = TcpStream::from_std(std::net::TcpStream::from(socket))?;
    stream.writable().await?;
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    Ok(stream)
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Could not resolve hostname: {}", host),
        )
    })
}

fn in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::EINPROGRESS) {
            return true;
        }
    }
    err.kind() == io::ErrorKind::WouldBlock
}
