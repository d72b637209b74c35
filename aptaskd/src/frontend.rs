// The net frontend and its session queue. Single-threaded cooperative poll
// loop over the listening socket, the control channel shared with the
// daemon, and every currently-open client socket that has not yet submitted
// a request. Uses `futures::stream::FuturesUnordered` to drive many
// concurrent connection futures from one task without spawning one task per
// socket.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::warn;

/// One request frame is at most this many bytes.
const MAX_REQUEST_SIZE: usize = 2048;

/// The only contract between the net frontend and the daemon loop: the
/// frontend never calls into the manager directly, and the daemon never
/// writes to a client socket directly.
#[derive(Debug)]
pub enum ControlMessage {
    Data { sid: u64, payload: String },
    Quit,
}

/// A random-access queue keyed by a monotonic session id. Holds the
/// bookkeeping that lets the net frontend correlate an asynchronous response
/// with its socket without blocking inside the accept/read loop.
struct SessionQueue {
    sockets: HashMap<u64, TcpStream>,
    next_id: u64,
}

impl SessionQueue {
    fn new() -> Self {
        SessionQueue {
            sockets: HashMap::new(),
            next_id: 1,
        }
    }

    fn add(&mut self, socket: TcpStream) -> u64 {
        let sid = self.next_id;
        self.next_id += 1;
        self.sockets.insert(sid, socket);
        sid
    }

    fn remove(&mut self, sid: u64) -> Option<TcpStream> {
        self.sockets.remove(&sid)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sockets.len()
    }
}

enum ReadOutcome {
    /// The client closed its write side without sending anything.
    Empty,
    /// A complete request, read up to connection close.
    Payload(String),
    /// More than `MAX_REQUEST_SIZE` bytes were offered before close.
    Oversized,
    Error(io::Error),
}

/// Reads one connection to completion (the connection boundary frames the
/// message) and hands the socket back alongside the outcome so the caller
/// can park it in the session queue or drop it.
async fn read_request(mut socket: TcpStream) -> (TcpStream, ReadOutcome) {
    let mut buf = Vec::with_capacity(MAX_REQUEST_SIZE);
    let mut chunk = [0u8; MAX_REQUEST_SIZE + 1];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_REQUEST_SIZE {
                    return (socket, ReadOutcome::Oversized);
                }
            }
            Err(e) => return (socket, ReadOutcome::Error(e)),
        }
    }
    if buf.is_empty() {
        return (socket, ReadOutcome::Empty);
    }
    match String::from_utf8(buf) {
        Ok(payload) => (socket, ReadOutcome::Payload(payload)),
        Err(_) => (socket, ReadOutcome::Oversized),
    }
}

type PendingRead = Pin<Box<dyn std::future::Future<Output = (TcpStream, ReadOutcome)> + Send>>;

/// Runs until a `Quit` control message is received, or the listener itself
/// fails unrecoverably. Spawned as a task by the daemon loop rather than
/// forked as a separate OS process; the two never share memory, only the
/// channels passed in here.
pub async fn run(
    listener: TcpListener,
    to_daemon: mpsc::Sender<(u64, String)>,
    mut from_daemon: mpsc::Receiver<ControlMessage>,
) {
    let mut sessions = SessionQueue::new();
    let mut pending_reads: FuturesUnordered<PendingRead> = FuturesUnordered::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, _addr)) => {
                        pending_reads.push(Box::pin(read_request(socket)));
                    }
                    Err(e) => warn!("[frontend] accept failed: {:?}", e),
                }
            }

            Some((socket, outcome)) = pending_reads.next(), if !pending_reads.is_empty() => {
                match outcome {
                    ReadOutcome::Empty => {
                        // close and drop: `socket` goes out of scope here.
                    }
                    ReadOutcome::Error(e) => {
                        warn!("[frontend] error reading client socket: {:?}", e);
                    }
                    ReadOutcome::Oversized => {
                        let mut socket = socket;
                        let body = aptask_core::malformed();
                        if let Err(e) = socket.write_all(body.as_bytes()).await {
                            warn!("[frontend] error replying to oversized request: {:?}", e);
                        }
                    }
                    ReadOutcome::Payload(payload) => {
                        let sid = sessions.add(socket);
                        if to_daemon.send((sid, payload)).await.is_err() {
                            warn!("[frontend] daemon control channel closed; exiting");
                            return;
                        }
                    }
                }
            }

            Some(message) = from_daemon.recv() => {
                match message {
                    ControlMessage::Quit => {
                        // orderly close of every tracked socket.
                        sessions.sockets.clear();
                        return;
                    }
                    ControlMessage::Data { sid, payload } => {
                        if let Some(mut socket) = sessions.remove(sid) {
                            if let Err(e) = socket.write_all(payload.as_bytes()).await {
                                warn!("[frontend] error writing response: {:?}", e);
                            }
                            // socket dropped here: server closes after reply.
                        }
                    }
                }
            }
        }
    }
}
