//! Channel trait — abstraction for outbound chat delivery.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::{Channel, OutboundMessage};

/// Channel adapter trait — implement this for each chat platform.
///
/// Messages carrying a `reply_token` answer a specific inbound event; all others are
/// pushed to `chat_id`.
///
/// # Example
///
/// ```rust,ignore
/// struct MyChannel;
///
/// #[async_trait]
/// impl ChannelAdapter for MyChannel {
///     fn channel_type(&self) -> Channel { Channel::Line }
///     async fn send(&self, msg: OutboundMessage) -> Result<()> { /* deliver */ Ok(()) }
/// }
/// ```
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel type identifier.
    fn channel_type(&self) -> Channel;

    /// Send a message through this channel.
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    /// Send several messages in order, stopping at the first failure.
    async fn send_all(&self, msgs: Vec<OutboundMessage>) -> Result<()> {
        for msg in msgs {
            self.send(msg).await?;
        }
        Ok(())
    }
}
