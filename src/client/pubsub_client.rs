use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::auth::compute_proof;
use crate::protocol::{FrameCodec, Message};
use crate::utils::ClientError;

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identity the publisher authenticated as.
    pub identity: String,
    pub channel: String,
    pub payload: Bytes,
}

/// An authenticated connection to a broker.
pub struct Client<S = TcpStream> {
    framed: Framed<S, FrameCodec>,
    identity: String,
    broker_name: String,
}

impl Client<TcpStream> {
    /// Connect to `addr` and authenticate as `identity`.
    ///
    /// Returns once `Auth` has been sent. The broker does not acknowledge a
    /// successful login; a rejected one shows up as an `Error` on the next
    /// read.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        identity: &str,
        secret: &str,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, identity, secret).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the handshake over an already connected stream.
    pub async fn handshake(stream: S, identity: &str, secret: &str) -> Result<Self, ClientError> {
        let mut framed = Framed::new(stream, FrameCodec::default());

        let (banner, nonce) = match framed.next().await {
            Some(Ok(Message::Info { banner, nonce })) => (banner, nonce),
            Some(Ok(Message::Error { reason })) => return Err(ClientError::Broker(reason)),
            Some(Ok(_)) => return Err(ClientError::UnexpectedMessage("expected Info")),
            Some(Err(err)) => return Err(err.into()),
            None => return Err(ClientError::Closed),
        };
        debug!(broker = %banner, "received broker info");

        let proof = compute_proof(&nonce, secret);
        framed
            .send(Message::Auth {
                identity: identity.to_string(),
                proof: Bytes::copy_from_slice(&proof),
            })
            .await?;

        Ok(Self {
            framed,
            identity: identity.to_string(),
            broker_name: banner,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Banner from the broker's `Info` greeting.
    pub fn broker_name(&self) -> &str {
        &self.broker_name
    }

    pub async fn subscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        self.framed
            .send(Message::Subscribe {
                channel: channel.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        self.framed
            .send(Message::Unsubscribe {
                channel: channel.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn publish(
        &mut self,
        channel: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        self.framed
            .send(Message::Publish {
                identity: self.identity.clone(),
                channel: channel.to_string(),
                payload: payload.into(),
            })
            .await?;
        Ok(())
    }

    /// Wait for the next delivery.
    pub async fn read(&mut self) -> Result<Delivery, ClientError> {
        match self.framed.next().await {
            Some(Ok(Message::Publish {
                identity,
                channel,
                payload,
            })) => Ok(Delivery {
                identity,
                channel,
                payload,
            }),
            Some(Ok(Message::Error { reason })) => Err(ClientError::Broker(reason)),
            Some(Ok(_)) => Err(ClientError::UnexpectedMessage("expected Publish")),
            Some(Err(err)) => Err(err.into()),
            None => Err(ClientError::Closed),
        }
    }

    /// Flush pending frames and shut the write half down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.framed.close().await?;
        Ok(())
    }
}
