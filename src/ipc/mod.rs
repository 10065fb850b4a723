//! Control socket server
//!
//! A non-blocking Unix socket listener with a bounded set of client
//! connections. The event loop calls [`IpcServer::accept`] and
//! [`IpcServer::poll`] once per tick; neither ever blocks. Each connection
//! keeps only its partial input frame and unsent output between ticks.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::error::ProtocolError;
use crate::protocol::{FrameDecoder, Reply, Request, Response, HEADER_LEN};

#[derive(Debug, Clone, Copy)]
pub struct IpcOptions {
    pub max_clients: usize,
    pub max_request_bytes: usize,
}

impl Default for IpcOptions {
    fn default() -> Self {
        Self {
            max_clients: 8,
            max_request_bytes: crate::protocol::DEFAULT_MAX_REQUEST,
        }
    }
}

/// Rounds of read, handle, write per connection and tick.
const MAX_ROUNDS: usize = 16;

#[derive(Debug)]
struct Connection {
    id: u64,
    stream: UnixStream,
    decoder: FrameDecoder,
    outbox: Vec<u8>,
    /// Peer finished sending; requests already buffered are still served.
    eof: bool,
    /// No further requests are handled. Kept until the outbox drains.
    closing: bool,
    /// Socket error. Dropped without flushing.
    broken: bool,
}

impl Connection {
    fn new(id: u64, stream: UnixStream, max_request_bytes: usize) -> Self {
        Self {
            id,
            stream,
            decoder: FrameDecoder::new(max_request_bytes),
            outbox: Vec::new(),
            eof: false,
            closing: false,
            broken: false,
        }
    }

    /// Read until the socket would block or `limit` bytes are buffered.
    fn fill(&mut self, limit: usize) {
        let mut buf = [0u8; 1024];
        while self.decoder.buffered() < limit {
            let want = (limit - self.decoder.buffered()).min(buf.len());
            match self.stream.read(&mut buf[..want]) {
                Ok(0) => {
                    self.eof = true;
                    return;
                }
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("client {}: read failed: {}", self.id, e);
                    self.broken = true;
                    return;
                }
            }
        }
    }

    /// Handle buffered requests until none is complete or `cap` bytes of
    /// output are waiting.
    fn decode<F>(&mut self, handle: &mut F, cap: usize) -> usize
    where
        F: FnMut(&Request) -> Reply,
    {
        let mut handled = 0;
        while !self.closing && self.outbox.len() < cap {
            let body = match self.decoder.next_frame() {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    warn!("client {}: {}", self.id, e);
                    self.send(&Response::error("request too large"));
                    self.closing = true;
                    break;
                }
            };

            match Request::decode_body(&body) {
                Ok(request) => {
                    let reply = handle(&request);
                    handled += 1;
                    self.send(&reply.response);
                    self.closing = reply.close;
                }
                Err(e @ (ProtocolError::Truncated(_) | ProtocolError::InvalidEncoding)) => {
                    warn!("client {}: {}", self.id, e);
                    self.send(&Response::error("malformed request"));
                }
                Err(e) => {
                    warn!("client {}: {}", self.id, e);
                    self.closing = true;
                }
            }
        }
        handled
    }

    /// Write as much pending output as the socket takes. Returns false on error.
    fn flush(&mut self) -> bool {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return false,
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("client {}: write failed: {}", self.id, e);
                    return false;
                }
            }
        }
        true
    }

    fn send(&mut self, response: &Response) {
        self.outbox.extend_from_slice(&response.encode());
    }

    /// One tick of service. A client that stops reading its replies stops
    /// being read from once `options.max_request_bytes` of output is queued.
    fn service<F>(&mut self, handle: &mut F, options: &IpcOptions) -> usize
    where
        F: FnMut(&Request) -> Reply,
    {
        let input_limit = options.max_request_bytes + HEADER_LEN;
        let cap = options.max_request_bytes;
        let mut handled = 0;

        for _ in 0..MAX_ROUNDS {
            if !self.eof && !self.closing && self.outbox.len() < cap {
                self.fill(input_limit);
            }
            if self.broken {
                break;
            }

            let n = self.decode(handle, cap);
            handled += n;
            // Below the cap means decoding ran out of complete frames.
            if self.eof && self.outbox.len() < cap {
                self.closing = true;
            }

            if !self.flush() {
                self.broken = true;
                break;
            }
            if n == 0 || self.closing || !self.outbox.is_empty() {
                break;
            }
        }
        handled
    }

    fn finished(&self) -> bool {
        self.broken || (self.closing && self.outbox.is_empty())
    }
}

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    options: IpcOptions,
    clients: Vec<Connection>,
    next_client: u64,
}

impl IpcServer {
    /// Bind the control socket, replacing a stale socket file.
    pub fn bind(socket_path: impl AsRef<Path>, options: IpcOptions) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove existing socket: {:?}", socket_path)
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;
        listener
            .set_nonblocking(true)
            .context("Failed to make control socket non-blocking")?;

        info!("control socket listening on {:?}", socket_path);
        Ok(Self {
            listener,
            socket_path,
            options,
            clients: Vec::new(),
            next_client: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accept at most one pending connection. A connection beyond the cap
    /// gets an error response and is closed straight away.
    pub fn accept(&mut self) -> bool {
        let stream = match self.listener.accept() {
            Ok((stream, _)) => stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(e) => {
                warn!("accept failed: {}", e);
                return false;
            }
        };

        if self.clients.len() >= self.options.max_clients {
            warn!(
                "rejecting client: {} connections already open",
                self.clients.len()
            );
            let mut stream = stream;
            if let Err(e) = stream.write_all(&Response::error("too many clients").encode()) {
                warn!("failed to notify rejected client: {}", e);
            }
            return false;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            warn!("dropping client: {}", e);
            return false;
        }

        let id = self.next_client;
        self.next_client += 1;
        debug!("client {} connected", id);
        self.clients
            .push(Connection::new(id, stream, self.options.max_request_bytes));
        true
    }

    /// Serve every connection and hand each complete request to `handle`
    /// in arrival order. Returns the number of requests handled.
    pub fn poll<F>(&mut self, mut handle: F) -> usize
    where
        F: FnMut(&Request) -> Reply,
    {
        let options = self.options;
        let mut handled = 0;
        for conn in &mut self.clients {
            handled += conn.service(&mut handle, &options);
        }

        self.clients.retain(|conn| {
            if conn.finished() {
                debug!("client {} disconnected", conn.id);
            }
            !conn.finished()
        });
        handled
    }

    /// Reply bytes queued for clients that are not reading.
    pub fn pending_output(&self) -> usize {
        self.clients.iter().map(|c| c.outbox.len()).sum()
    }

    /// Request bytes read but not yet handled.
    pub fn buffered_input(&self) -> usize {
        self.clients.iter().map(|c| c.decoder.buffered()).sum()
    }

    /// Close every connection.
    pub fn disconnect_all(&mut self) {
        for conn in &mut self.clients {
            conn.flush();
        }
        self.clients.clear();
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.disconnect_all();
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("failed to remove socket {:?}: {}", self.socket_path, e);
            } else {
                debug!("removed socket {:?}", self.socket_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::WindowId;
    use std::thread;
    use std::time::Duration;

    fn server(dir: &tempfile::TempDir, max_clients: usize) -> IpcServer {
        IpcServer::bind(
            dir.path().join("flux.sock"),
            IpcOptions {
                max_clients,
                max_request_bytes: 64,
            },
        )
        .unwrap()
    }

    fn client(server: &IpcServer) -> UnixStream {
        let stream = UnixStream::connect(server.socket_path()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
    }

    fn read_response(stream: &mut UnixStream) -> Response {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(header) as usize];
        stream.read_exact(&mut body).unwrap();
        Response::decode_body(&body).unwrap()
    }

    fn echo_window(req: &Request) -> Reply {
        Reply {
            response: Response::Window(WindowId(req.window)),
            close: req.command == "SHUTDOWN",
        }
    }

    #[test]
    fn serves_requests_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 4);
        let mut c = client(&server);
        assert!(server.accept());
        assert!(!server.accept());

        let mut bytes = Request::new(1, "SHOW").encode();
        bytes.extend(Request::new(2, "HIDE").encode());
        c.write_all(&bytes).unwrap();

        let mut seen = Vec::new();
        assert_eq!(
            server.poll(|r| {
                seen.push(r.command.clone());
                echo_window(r)
            }),
            2
        );
        assert_eq!(seen, ["SHOW", "HIDE"]);
        assert_eq!(read_response(&mut c), Response::Window(WindowId(1)));
        assert_eq!(read_response(&mut c), Response::Window(WindowId(2)));
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 4);
        let mut c = client(&server);
        server.accept();

        let bytes = Request::new(3, "RENDER").encode();
        c.write_all(&bytes[..5]).unwrap();
        assert_eq!(server.poll(echo_window), 0);
        c.write_all(&bytes[5..]).unwrap();
        assert_eq!(server.poll(echo_window), 1);
        assert_eq!(read_response(&mut c), Response::Window(WindowId(3)));
    }

    #[test]
    fn disconnects_are_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 4);
        let a = client(&server);
        let mut b = client(&server);
        server.accept();
        server.accept();
        assert_eq!(server.client_count(), 2);

        drop(a);
        b.write_all(&Request::new(0, "SHUTDOWN").encode()).unwrap();
        server.poll(echo_window);
        assert_eq!(server.client_count(), 0);
        assert_eq!(read_response(&mut b), Response::Window(WindowId(0)));
    }

    #[test]
    fn oversized_frame_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 4);
        let mut c = client(&server);
        server.accept();

        c.write_all(&1000u32.to_le_bytes()).unwrap();
        server.poll(echo_window);
        assert_eq!(server.client_count(), 0);
        assert_eq!(read_response(&mut c), Response::error("request too large"));
    }

    #[test]
    fn connection_cap_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 1);
        let _first = client(&server);
        let mut second = client(&server);
        assert!(server.accept());
        assert!(!server.accept());
        assert_eq!(server.client_count(), 1);
        assert_eq!(read_response(&mut second), Response::error("too many clients"));
    }

    #[test]
    fn closing_connection_delivers_its_last_reply() {
        const N: u32 = 100_000;
        let dir = tempfile::tempdir().unwrap();
        let mut server = server(&dir, 4);
        let c = client(&server);
        server.accept();

        let mut writer = c.try_clone().unwrap();
        let sender = thread::spawn(move || {
            let mut bytes = Vec::new();
            for i in 0..N {
                bytes.extend(Request::new(i, "SHOW").encode());
            }
            bytes.extend(Request::new(0, "SHUTDOWN").encode());
            writer.write_all(&bytes).unwrap();
        });

        // Nobody reads yet, so the server has to hold back.
        for _ in 0..200 {
            server.poll(echo_window);
            assert!(server.pending_output() < 64 + 9);
            assert!(server.buffered_input() <= 64 + 4);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(server.client_count(), 1);

        let mut reader = c;
        reader
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let receiver = thread::spawn(move || {
            let mut decoder = FrameDecoder::new(64);
            let mut buf = [0u8; 4096];
            let mut count = 0u32;
            let mut last = None;
            loop {
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    return (count, last);
                }
                decoder.push(&buf[..n]);
                while let Some(body) = decoder.next_frame().unwrap() {
                    last = Some(Response::decode_body(&body).unwrap());
                    count += 1;
                }
            }
        });

        for _ in 0..1_000_000 {
            if receiver.is_finished() {
                break;
            }
            server.poll(echo_window);
        }
        sender.join().unwrap();
        let (count, last) = receiver.join().unwrap();
        assert_eq!(count, N + 1);
        assert_eq!(last, Some(Response::Window(WindowId(0))));
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn socket_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let server = server(&dir, 1);
            assert!(server.socket_path().exists());
            server.socket_path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
