use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::trace;

/// The bidirectional byte stream behind an egress connection.
pub trait EgressStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> EgressStream for T {}

/// This is an abstraction for opening the outbound byte stream, introduced to facilitate
///  mocking the I/O part away for testing. Name resolution is the connector's business: the
///  target is passed through as `host:port` exactly as it came off the wire.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EgressConnector: Send + Sync + 'static {
    async fn connect(&self, target: &str) -> std::io::Result<Box<dyn EgressStream>>;
}

pub struct TcpConnector;

#[async_trait]
impl EgressConnector for TcpConnector {
    async fn connect(&self, target: &str) -> std::io::Result<Box<dyn EgressStream>> {
        trace!("opening TCP connection to {}", target);
        let stream = TcpStream::connect(target).await?;
        Ok(Box::new(stream))
    }
}
