//! Connection, server and pending-connect records, and the once-per-loop
//! readiness pump.

use crate::error::{ConnectError, NetError, NetResult};
use cmm_core::{Buffer, Dbref};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// One inbound read never exceeds this many bytes.
const READ_CHUNK: usize = 1024;

/// Stable token identifying a connection for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// An event reported by [`Bridge::pump`] or [`Bridge::flush_defunct`],
/// in delivery order.
#[derive(Debug)]
pub enum IoEvent {
    /// Inbound bytes for the owner's `parse` method.
    Parse {
        conn: ConnId,
        owner: Dbref,
        data: Buffer,
    },
    /// A server socket accepted a connection; the owner receives
    /// `connect(addr, port)`.
    Accepted {
        conn: ConnId,
        owner: Dbref,
        addr: String,
        port: u16,
    },
    /// A pending connect finished; the owner receives `connect(task_id)`.
    ConnectDone {
        conn: ConnId,
        owner: Dbref,
        task_id: i64,
    },
    /// A pending connect failed; the owner receives
    /// `failed(task_id, error)`.
    ConnectFailed {
        owner: Dbref,
        task_id: i64,
        error: ConnectError,
    },
    /// A write buffer drained; the owner receives `transmit()`.
    Transmit { conn: ConnId, owner: Dbref },
    /// A dead connection was reaped; the owner receives `disconnect()`.
    Disconnect { conn: ConnId, owner: Dbref },
}

enum ConnStream {
    Tcp(TcpStream),
    Unix(UnixStream),
    Pipe {
        stdin: ChildStdin,
        stdout: ChildStdout,
        child: Child,
    },
    Stdio {
        stdin: tokio::io::Stdin,
        stdout: tokio::io::Stdout,
    },
}

struct Connection {
    id: ConnId,
    owner: Dbref,
    stream: ConnStream,
    write_buf: Buffer,
    readable_eof: bool,
    dead: bool,
    is_pipe: bool,
    want_write_callback: bool,
}

struct Server {
    listener: TcpListener,
    port: u16,
    owner: Dbref,
    dead: bool,
}

struct Pending {
    task_id: i64,
    owner: Dbref,
    is_pipe: bool,
    fut: Pin<Box<dyn futures::Future<Output = Result<ConnStream, ConnectError>> + Send>>,
}

enum Activity {
    Read {
        conn: ConnId,
        data: Vec<u8>,
    },
    ReadFailed {
        conn: ConnId,
    },
    Wrote {
        conn: ConnId,
        n: usize,
    },
    WriteFailed {
        conn: ConnId,
    },
    Accepted {
        port: u16,
        stream: TcpStream,
        peer: SocketAddr,
    },
    PendingDone {
        at: usize,
        result: Result<ConnStream, ConnectError>,
    },
}

/// The bridge: three record lists and a per-iteration readiness pump.
#[derive(Default)]
pub struct Bridge {
    connections: Vec<Connection>,
    servers: Vec<Server>,
    pendings: Vec<Pending>,
    next_id: u64,
}

impl Bridge {
    pub fn new() -> Bridge {
        Bridge::default()
    }

    fn next_conn_id(&mut self) -> ConnId {
        self.next_id += 1;
        ConnId(self.next_id)
    }

    fn add_connection(&mut self, stream: ConnStream, owner: Dbref, is_pipe: bool) -> ConnId {
        let id = self.next_conn_id();
        self.connections.push(Connection {
            id,
            owner,
            stream,
            write_buf: Buffer::new(),
            readable_eof: false,
            dead: false,
            is_pipe,
            want_write_callback: true,
        });
        id
    }

    /// Wires the daemon's stdio as a connection owned by `owner`; used when
    /// no listening port was given.
    pub fn add_stdio(&mut self, owner: Dbref) -> ConnId {
        self.add_connection(
            ConnStream::Stdio {
                stdin: tokio::io::stdin(),
                stdout: tokio::io::stdout(),
            },
            owner,
            false,
        )
    }

    /// Binds a listening socket on `port` delivering its connections to
    /// `dbref`. Rebinding an existing port just retargets it.
    pub fn add_server(&mut self, port: u16, dbref: Dbref) -> NetResult<()> {
        if let Some(server) = self.servers.iter_mut().find(|s| s.port == port) {
            server.owner = dbref;
            server.dead = false;
            return Ok(());
        }
        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| NetError::Bind { port, source })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|source| NetError::Socket { source })?;
        let listener =
            TcpListener::from_std(std_listener).map_err(|source| NetError::Socket { source })?;
        info!(port, owner = dbref.0, "listening");
        self.servers.push(Server {
            listener,
            port,
            owner: dbref,
            dead: false,
        });
        Ok(())
    }

    /// Marks the server on `port` dead; reaped by the next defunct flush.
    pub fn remove_server(&mut self, port: u16) -> bool {
        match self.servers.iter_mut().find(|s| s.port == port) {
            Some(server) => {
                server.dead = true;
                true
            }
            None => false,
        }
    }

    /// Starts an outbound connection for `receiver`. Addresses beginning
    /// with `/` or `.` are Unix sockets; a leading `|` spawns the named
    /// command and wires its stdio. Address and socket failures are
    /// reported immediately; everything else arrives as a pump event
    /// carrying `task_id`.
    pub fn make_connection(
        &mut self,
        addr: &str,
        port: u16,
        receiver: Dbref,
        task_id: i64,
    ) -> Result<(), ConnectError> {
        let (fut, is_pipe): (
            Pin<Box<dyn futures::Future<Output = Result<ConnStream, ConnectError>> + Send>>,
            bool,
        ) = if addr.starts_with('/') || addr.starts_with('.') {
            let path = addr.to_owned();
            (
                Box::pin(async move {
                    UnixStream::connect(&path)
                        .await
                        .map(ConnStream::Unix)
                        .map_err(|e| ConnectError::from_io(&e))
                }),
                false,
            )
        } else if let Some(command_line) = addr.strip_prefix('|') {
            let mut parts = command_line.split_whitespace();
            let program = parts.next().ok_or(ConnectError::Address)?.to_owned();
            let args: Vec<String> = parts.map(str::to_owned).collect();
            let mut child = Command::new(&program)
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .spawn()
                .map_err(|_| ConnectError::Socket)?;
            let stdin = child.stdin.take().ok_or(ConnectError::Socket)?;
            let stdout = child.stdout.take().ok_or(ConnectError::Socket)?;
            (
                Box::pin(async move {
                    Ok(ConnStream::Pipe {
                        stdin,
                        stdout,
                        child,
                    })
                }),
                true,
            )
        } else {
            let ip: IpAddr = addr.parse().map_err(|_| ConnectError::Address)?;
            let target = SocketAddr::new(ip, port);
            (
                Box::pin(async move {
                    TcpStream::connect(target)
                        .await
                        .map(ConnStream::Tcp)
                        .map_err(|e| ConnectError::from_io(&e))
                }),
                false,
            )
        };

        self.pendings.push(Pending {
            task_id,
            owner: receiver,
            is_pipe,
            fut,
        });
        Ok(())
    }

    /// Appends `buf` to every live connection owned by `dbref`.
    pub fn tell(&mut self, dbref: Dbref, buf: &Buffer) {
        for conn in &mut self.connections {
            if conn.owner == dbref && !conn.dead {
                conn.write_buf.append(buf);
            }
        }
    }

    /// Marks every connection owned by `dbref` dead. Returns how many.
    pub fn boot(&mut self, dbref: Dbref) -> usize {
        let mut count = 0;
        for conn in &mut self.connections {
            if conn.owner == dbref {
                conn.dead = true;
                count += 1;
            }
        }
        count
    }

    /// Reassigns the owner of a connection. False if the connection is
    /// gone.
    pub fn set_owner(&mut self, conn: ConnId, dbref: Dbref) -> bool {
        match self.connections.iter_mut().find(|c| c.id == conn) {
            Some(c) => {
                c.owner = dbref;
                true
            }
            None => false,
        }
    }

    /// Live connection tokens owned by `dbref`.
    pub fn connections_of(&self, dbref: Dbref) -> Vec<ConnId> {
        self.connections
            .iter()
            .filter(|c| c.owner == dbref && !c.dead)
            .map(|c| c.id)
            .collect()
    }

    /// Reaps dead records whose output has drained, reporting each reaped
    /// connection so the owner can be told it disconnected.
    pub fn flush_defunct(&mut self) -> Vec<IoEvent> {
        let mut events = Vec::new();
        self.connections.retain_mut(|conn| {
            if conn.dead && conn.write_buf.is_empty() {
                events.push(IoEvent::Disconnect {
                    conn: conn.id,
                    owner: conn.owner,
                });
                if let ConnStream::Pipe { child, .. } = &mut conn.stream {
                    // Reap the child so it does not linger as a zombie.
                    let _ = child.start_kill();
                }
                false
            } else {
                true
            }
        });
        self.servers.retain(|server| {
            if server.dead {
                info!(port = server.port, "server closed");
            }
            !server.dead
        });
        events
    }

    /// Waits up to `timeout` for I/O, performs the reads and write flushes,
    /// and returns the resulting events in the order they were observed.
    pub async fn pump(&mut self, timeout: Duration) -> Vec<IoEvent> {
        let activities = self.wait_for_activity(timeout).await;
        let mut events = Vec::new();
        // Pending completions carry indices; collect then remove from the
        // back so they stay valid.
        let mut finished_pendings: Vec<usize> = Vec::new();

        for activity in activities {
            match activity {
                Activity::Read { conn, data } => {
                    let Some(c) = self.connections.iter_mut().find(|c| c.id == conn) else {
                        continue;
                    };
                    if data.is_empty() {
                        c.dead = true;
                        c.readable_eof = true;
                    } else {
                        events.push(IoEvent::Parse {
                            conn,
                            owner: c.owner,
                            data: Buffer::from_vec(data),
                        });
                    }
                }
                Activity::ReadFailed { conn } => {
                    if let Some(c) = self.connections.iter_mut().find(|c| c.id == conn) {
                        c.dead = true;
                    }
                }
                Activity::Wrote { conn, n } => {
                    let Some(c) = self.connections.iter_mut().find(|c| c.id == conn) else {
                        continue;
                    };
                    c.write_buf.truncate(-(n as i64).min(c.write_buf.len() as i64));
                    if c.write_buf.is_empty() && c.want_write_callback && !c.dead {
                        events.push(IoEvent::Transmit {
                            conn,
                            owner: c.owner,
                        });
                    }
                }
                Activity::WriteFailed { conn } => {
                    if let Some(c) = self.connections.iter_mut().find(|c| c.id == conn) {
                        c.dead = true;
                        c.write_buf = Buffer::new();
                    }
                }
                Activity::Accepted { port, stream, peer } => {
                    let Some(server) = self.servers.iter().find(|s| s.port == port) else {
                        continue;
                    };
                    let owner = server.owner;
                    let conn = self.add_connection(ConnStream::Tcp(stream), owner, false);
                    debug!(port, peer = %peer, "accepted connection");
                    events.push(IoEvent::Accepted {
                        conn,
                        owner,
                        addr: peer.ip().to_string(),
                        port: peer.port(),
                    });
                }
                Activity::PendingDone { at, result } => {
                    finished_pendings.push(at);
                    let pending = &self.pendings[at];
                    let owner = pending.owner;
                    let task_id = pending.task_id;
                    let is_pipe = pending.is_pipe;
                    match result {
                        Ok(stream) => {
                            let conn = self.add_connection(stream, owner, is_pipe);
                            events.push(IoEvent::ConnectDone {
                                conn,
                                owner,
                                task_id,
                            });
                        }
                        Err(error) => {
                            warn!(owner = owner.0, ?error, "outbound connect failed");
                            events.push(IoEvent::ConnectFailed {
                                owner,
                                task_id,
                                error,
                            });
                        }
                    }
                }
            }
        }

        finished_pendings.sort_unstable();
        for at in finished_pendings.into_iter().rev() {
            self.pendings.remove(at);
        }
        events
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Vec<Activity> {
        let mut futs: FuturesUnordered<BoxFuture<'_, Activity>> = FuturesUnordered::new();

        for conn in self.connections.iter_mut() {
            if conn.dead && conn.write_buf.is_empty() {
                continue;
            }
            futs.push(conn_activity(conn).boxed());
        }
        for server in self.servers.iter_mut().filter(|s| !s.dead) {
            let port = server.port;
            let listener = &mut server.listener;
            futs.push(
                async move {
                    match listener.accept().await {
                        Ok((stream, peer)) => Activity::Accepted { port, stream, peer },
                        Err(err) => {
                            warn!(port, %err, "accept failed");
                            // Swallow the error; the pump retries next loop.
                            futures::future::pending::<()>().await;
                            unreachable!()
                        }
                    }
                }
                .boxed(),
            );
        }
        for (at, pending) in self.pendings.iter_mut().enumerate() {
            let fut = &mut pending.fut;
            futs.push(
                async move {
                    let result = fut.as_mut().await;
                    Activity::PendingDone { at, result }
                }
                .boxed(),
            );
        }

        if futs.is_empty() {
            drop(futs);
            tokio::time::sleep(timeout).await;
            return Vec::new();
        }

        let mut activities = Vec::new();
        match tokio::time::timeout(timeout, futs.next()).await {
            Ok(Some(first)) => {
                activities.push(first);
                // Drain whatever else is already ready without waiting.
                while let Some(Some(more)) = futs.next().now_or_never() {
                    activities.push(more);
                }
            }
            Ok(None) | Err(_) => {}
        }
        activities
    }

    /// Final blocking-ish flush of all write buffers, used at shutdown.
    /// Buffers are not updated; the process is about to exit.
    pub async fn flush_output(&mut self) {
        for conn in self.connections.iter_mut() {
            let data = conn.write_buf.clone();
            if data.is_empty() {
                continue;
            }
            let write = async {
                let mut sent = 0;
                while sent < data.len() {
                    match conn.stream.write(&data.as_bytes()[sent..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sent += n,
                    }
                }
                let _ = conn.stream.flush().await;
            };
            let _ = tokio::time::timeout(Duration::from_secs(2), write).await;
        }
    }
}

/// What a connection managed to do first.
enum ConnDone {
    Read(std::io::Result<usize>),
    Wrote(std::io::Result<usize>),
}

/// Waits for the first thing this connection can do: deliver inbound bytes
/// or flush part of its write buffer.
async fn conn_activity(conn: &mut Connection) -> Activity {
    let id = conn.id;
    let mut read_buf = [0u8; READ_CHUNK];
    let pending_write = conn.write_buf.clone();
    let readable = !conn.dead && !conn.readable_eof;

    let done = if pending_write.is_empty() {
        if !readable {
            futures::future::pending::<()>().await;
        }
        ConnDone::Read(conn.stream.read(&mut read_buf).await)
    } else {
        match &mut conn.stream {
            ConnStream::Tcp(stream) => {
                let (mut rh, mut wh) = stream.split();
                tokio::select! {
                    read = rh.read(&mut read_buf), if readable => ConnDone::Read(read),
                    wrote = wh.write(pending_write.as_bytes()) => ConnDone::Wrote(wrote),
                }
            }
            ConnStream::Unix(stream) => {
                let (mut rh, mut wh) = stream.split();
                tokio::select! {
                    read = rh.read(&mut read_buf), if readable => ConnDone::Read(read),
                    wrote = wh.write(pending_write.as_bytes()) => ConnDone::Wrote(wrote),
                }
            }
            ConnStream::Pipe { stdin, stdout, .. } => {
                tokio::select! {
                    read = stdout.read(&mut read_buf), if readable => ConnDone::Read(read),
                    wrote = stdin.write(pending_write.as_bytes()) => ConnDone::Wrote(wrote),
                }
            }
            ConnStream::Stdio { stdin, stdout } => {
                tokio::select! {
                    read = stdin.read(&mut read_buf), if readable => ConnDone::Read(read),
                    wrote = stdout.write(pending_write.as_bytes()) => ConnDone::Wrote(wrote),
                }
            }
        }
    };

    match done {
        ConnDone::Read(Ok(n)) => Activity::Read {
            conn: id,
            data: read_buf[..n].to_vec(),
        },
        ConnDone::Read(Err(_)) => Activity::ReadFailed { conn: id },
        ConnDone::Wrote(Ok(0)) | ConnDone::Wrote(Err(_)) => Activity::WriteFailed { conn: id },
        ConnDone::Wrote(Ok(n)) => Activity::Wrote { conn: id, n },
    }
}

impl ConnStream {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ConnStream::Tcp(s) => s.read(buf).await,
            ConnStream::Unix(s) => s.read(buf).await,
            ConnStream::Pipe { stdout, .. } => stdout.read(buf).await,
            ConnStream::Stdio { stdin, .. } => stdin.read(buf).await,
        }
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            ConnStream::Tcp(s) => s.write(data).await,
            ConnStream::Unix(s) => s.write(data).await,
            ConnStream::Pipe { stdin, .. } => stdin.write(data).await,
            ConnStream::Stdio { stdout, .. } => stdout.write(data).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ConnStream::Tcp(s) => s.flush().await,
            ConnStream::Unix(s) => s.flush().await,
            ConnStream::Pipe { stdin, .. } => stdin.flush().await,
            ConnStream::Stdio { stdout, .. } => stdout.flush().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn owner(n: i64) -> Dbref {
        Dbref(n)
    }

    #[tokio::test]
    async fn accept_parse_tell_transmit_disconnect() {
        let mut bridge = Bridge::new();
        bridge.add_server(0, owner(0)).expect("cannot pre-pick port");
        // Port 0 picked by the OS; find it back.
        let port = bridge.servers[0]
            .listener
            .local_addr()
            .expect("local addr")
            .port();

        let mut client = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect");
        let events = bridge.pump(Duration::from_secs(2)).await;
        let conn = match &events[..] {
            [IoEvent::Accepted { conn, owner, .. }] => {
                assert_eq!(owner.0, 0);
                *conn
            }
            other => panic!("expected accept, got {other:?}"),
        };

        client.write_all(b"look\r\n").await.expect("client write");
        let events = bridge.pump(Duration::from_secs(2)).await;
        match &events[..] {
            [IoEvent::Parse { data, .. }] => assert_eq!(data.as_bytes(), b"look\r\n"),
            other => panic!("expected parse, got {other:?}"),
        }

        bridge.tell(owner(0), &Buffer::from_bytes(b"welcome\r\n"));
        let events = bridge.pump(Duration::from_secs(2)).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, IoEvent::Transmit { conn: c, .. } if *c == conn)));
        let mut got = [0u8; 32];
        let n = client.read(&mut got).await.expect("client read");
        assert_eq!(&got[..n], b"welcome\r\n");

        drop(client);
        let events = bridge.pump(Duration::from_secs(2)).await;
        assert!(events.is_empty());
        let events = bridge.flush_defunct();
        assert!(matches!(events[..], [IoEvent::Disconnect { .. }]));
        assert!(bridge.connections_of(owner(0)).is_empty());
    }

    #[tokio::test]
    async fn outbound_connect_reports_task_id() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listen");
        let port = listener.local_addr().expect("addr").port();

        let mut bridge = Bridge::new();
        bridge
            .make_connection("127.0.0.1", port, owner(7), 99)
            .expect("start connect");
        let events = bridge.pump(Duration::from_secs(2)).await;
        match &events[..] {
            [IoEvent::ConnectDone { owner, task_id, .. }] => {
                assert_eq!(owner.0, 7);
                assert_eq!(*task_id, 99);
            }
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connect_reports_failure() {
        // Bind-then-drop leaves a port with no listener.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listen");
            listener.local_addr().expect("addr").port()
        };
        let mut bridge = Bridge::new();
        bridge
            .make_connection("127.0.0.1", port, owner(3), 12)
            .expect("start connect");
        let events = bridge.pump(Duration::from_secs(2)).await;
        match &events[..] {
            [IoEvent::ConnectFailed {
                owner,
                task_id,
                error,
            }] => {
                assert_eq!(owner.0, 3);
                assert_eq!(*task_id, 12);
                assert_eq!(*error, ConnectError::Refused);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_addresses_fail_immediately() {
        let mut bridge = Bridge::new();
        let err = bridge
            .make_connection("no.such.host.example", 80, owner(1), 5)
            .expect_err("names are not resolved here");
        assert_eq!(err, ConnectError::Address);
    }

    #[tokio::test]
    async fn boot_marks_dead_and_drains_first() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listen");
        let port = listener.local_addr().expect("addr").port();
        let mut bridge = Bridge::new();
        bridge
            .make_connection("127.0.0.1", port, owner(4), 1)
            .expect("start");
        let _ = bridge.pump(Duration::from_secs(2)).await;
        assert_eq!(bridge.connections_of(owner(4)).len(), 1);

        bridge.tell(owner(4), &Buffer::from_bytes(b"bye"));
        assert_eq!(bridge.boot(owner(4)), 1);
        // Not reaped until the write buffer drains.
        assert!(bridge.flush_defunct().is_empty());
        let _ = bridge.pump(Duration::from_secs(2)).await;
        let events = bridge.flush_defunct();
        assert!(matches!(events[..], [IoEvent::Disconnect { .. }]));
    }
}
