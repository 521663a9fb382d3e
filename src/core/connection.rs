use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::command::{self, Cmd};
use super::{fold_transaction, Connection, Connector};
use crate::cluster::NodeAddress;
use crate::error::TransportError;
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::reply::Reply;

/// Default queue size for multiplexed connections.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

type ReplyTx = oneshot::Sender<Result<Vec<Reply>, TransportError>>;

/// Encoded commands written as one contiguous chunk, expecting `replies` answers.
struct Request {
    payload: BytesMut,
    replies: usize,
    response_tx: ReplyTx,
}

enum Message {
    Request(Request),
    Close,
}

/// Opens [`TcpConnection`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    queue_size: usize,
}

impl TcpConnector {
    /// Creates a connector whose connections queue up to `queue_size` requests.
    pub fn new(queue_size: usize) -> Self {
        Self { queue_size }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl Connector for TcpConnector {
    type Connection = TcpConnection;

    fn connect<'a>(&'a self, address: &'a NodeAddress) -> BoxFuture<'a, io::Result<TcpConnection>> {
        async move {
            let stream = TcpStream::connect((address.host(), address.port())).await?;
            stream.set_nodelay(true)?;
            debug!(%address, "connected");
            Ok(TcpConnection::new(stream, address.clone(), self.queue_size))
        }
        .boxed()
    }
}

/// A multiplexed RESP connection over TCP.
///
/// Requests from any number of tasks are funneled through a writer task;
/// a reader task hands replies back in order.
pub struct TcpConnection {
    address: NodeAddress,
    sender: mpsc::Sender<Message>,
    open: Arc<AtomicBool>,
}

impl TcpConnection {
    /// Wraps an established stream and spawns its reader and writer tasks.
    pub fn new(stream: TcpStream, address: NodeAddress, queue_size: usize) -> Self {
        let (reader, writer) = stream.into_split();
        let (request_tx, request_rx) = mpsc::channel(queue_size);
        let (waiter_tx, waiter_rx) = mpsc::channel(queue_size);
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(run_writer(writer, request_rx, waiter_tx, open.clone()));
        tokio::spawn(run_reader(reader, waiter_rx, open.clone()));

        Self {
            address,
            sender: request_tx,
            open,
        }
    }

    /// The node this connection talks to.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn request(&self, cmds: &[Cmd]) -> Result<Vec<Reply>, TransportError> {
        let mut encoder = Encoder::new();
        for cmd in cmds {
            encoder.encode(cmd);
        }

        let (response_tx, response_rx) = oneshot::channel();
        let request = Request {
            payload: encoder.take(),
            replies: cmds.len(),
            response_tx,
        };

        self.sender
            .send(Message::Request(request))
            .await
            .map_err(|_| TransportError::Closed)?;

        response_rx.await.map_err(|_| TransportError::Closed)?
    }
}

impl Connection for TcpConnection {
    fn send(&self, cmd: Cmd) -> BoxFuture<'_, Result<Reply, TransportError>> {
        async move {
            let mut replies = self.request(std::slice::from_ref(&cmd)).await?;
            replies.pop().ok_or(TransportError::Closed)
        }
        .boxed()
    }

    fn transaction(&self, cmds: Vec<Cmd>) -> BoxFuture<'_, Result<Reply, TransportError>> {
        async move {
            let mut framed = Vec::with_capacity(cmds.len() + 2);
            framed.push(command::multi());
            framed.extend(cmds);
            framed.push(command::exec());
            fold_transaction(self.request(&framed).await?)
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        async move {
            self.open.store(false, Ordering::Release);
            let _ = self.sender.send(Message::Close).await;
        }
        .boxed()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("address", &self.address)
            .field("open", &self.is_open())
            .finish()
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut request_rx: mpsc::Receiver<Message>,
    waiter_tx: mpsc::Sender<(usize, ReplyTx)>,
    open: Arc<AtomicBool>,
) {
    while let Some(message) = request_rx.recv().await {
        let req = match message {
            Message::Request(req) => req,
            Message::Close => {
                let _ = writer.shutdown().await;
                break;
            }
        };

        if let Err(e) = writer.write_all(&req.payload).await {
            error!(error = ?e, "failed to write request");
            let _ = req.response_tx.send(Err(TransportError::Io { source: e }));
            break;
        }

        // Reader task is gone.
        if waiter_tx.send((req.replies, req.response_tx)).await.is_err() {
            break;
        }
    }
    open.store(false, Ordering::Release);
}

async fn run_reader(
    mut reader: OwnedReadHalf,
    mut waiter_rx: mpsc::Receiver<(usize, ReplyTx)>,
    open: Arc<AtomicBool>,
) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        // The socket is watched while idle so a peer close is noticed
        // before the next request is queued.
        let (expected, tx) = tokio::select! {
            waiter = waiter_rx.recv() => match waiter {
                Some(waiter) => waiter,
                None => break,
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("peer closed idle connection");
                    break;
                }
                Ok(n) => {
                    decoder.append(&buf[..n]);
                    continue;
                }
                Err(e) => {
                    warn!(error = ?e, "idle connection failed");
                    break;
                }
            },
        };

        let mut replies = Vec::with_capacity(expected);
        while replies.len() < expected {
            match decoder.decode() {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => match reader.read(&mut buf).await {
                    Ok(0) => {
                        let _ = tx.send(Err(TransportError::Closed));
                        open.store(false, Ordering::Release);
                        return;
                    }
                    Ok(n) => decoder.append(&buf[..n]),
                    Err(e) => {
                        error!(error = ?e, "failed to read reply");
                        let _ = tx.send(Err(TransportError::Io { source: e }));
                        open.store(false, Ordering::Release);
                        return;
                    }
                },
                Err(e) => {
                    error!(error = ?e, "failed to decode reply");
                    let _ = tx.send(Err(e));
                    open.store(false, Ordering::Release);
                    return;
                }
            }
        }
        let _ = tx.send(Ok(replies));
    }
    open.store(false, Ordering::Release);
}
