//! TCP accept loop shared by the four channels

use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serves one accepted connection until the peer leaves or `cancel` fires
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Channel name used in logs
    fn channel(&self) -> &'static str;

    async fn handle(&self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) -> ChannelResult<()>;
}

pub async fn bind(addr: &str) -> ChannelResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ChannelError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept connections and spawn one task per connection until cancelled
pub async fn serve<H: ConnectionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> ChannelResult<()> {
    let local = listener.local_addr()?;
    info!(channel = handler.channel(), "Listening on {}", local);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }

                    let handler = handler.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        match handler.handle(stream, peer, cancel).await {
                            Ok(()) | Err(ChannelError::ConnectionClosed) => {
                                debug!(channel = handler.channel(), "Connection from {} finished", peer);
                            }
                            Err(e) => {
                                warn!(channel = handler.channel(), "Connection from {} failed: {}", peer, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(channel = handler.channel(), "Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    info!(channel = handler.channel(), "Listener on {} stopped", local);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{Framed, LinesCodec};

    struct Echo;

    #[async_trait]
    impl ConnectionHandler for Echo {
        fn channel(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, stream: TcpStream, _peer: SocketAddr, cancel: CancellationToken) -> ChannelResult<()> {
            let mut framed = Framed::new(stream, LinesCodec::new());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    line = framed.next() => match line {
                        Some(line) => framed.send(line?).await?,
                        None => return Err(ChannelError::ConnectionClosed),
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_serve_and_cancel() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::new(Echo), cancel.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, LinesCodec::new());
        client.send("ping").await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), "ping");

        cancel.cancel();
        server.await.unwrap().unwrap();
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_names_address() {
        let err = bind("not-an-address").await.unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }
}
