//! Role-specific offer/answer behaviour
//!
//! The publisher waits for offers and answers the first viewer that sends
//! one; the subscriber offers as soon as the channel opens. Candidate
//! buffering and state surfacing are shared and live in the attempt
//! context.

use super::session::AttemptContext;
use crate::config::Role;
use crate::signaling::{OutboundMessage, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info};

/// Offer/answer driver for one role
#[async_trait]
pub(crate) trait RoleStrategy: Send + Sync {
    /// Role this strategy negotiates as
    fn role(&self) -> Role;

    /// The signaling channel just opened
    async fn on_open(&mut self, ctx: &mut AttemptContext) -> Result<()>;

    /// An offer arrived
    async fn on_offer(
        &mut self,
        ctx: &mut AttemptContext,
        description: SessionDescription,
        sender: Option<String>,
    ) -> Result<()>;

    /// An answer arrived
    async fn on_answer(
        &mut self,
        ctx: &mut AttemptContext,
        description: SessionDescription,
        sender: Option<String>,
    ) -> Result<()>;

    /// Whether a remote candidate from `sender` belongs to this negotiation
    fn accepts_candidate_from(&self, sender: Option<&str>) -> bool;

    /// Remote participant local candidates are addressed to
    fn remote_client_id(&self) -> Option<&str>;
}

/// Strategy for `role`
pub(crate) fn for_role(role: Role) -> Box<dyn RoleStrategy> {
    match role {
        Role::Publisher => Box::new(PublisherNegotiation::default()),
        Role::Subscriber => Box::new(SubscriberNegotiation::default()),
    }
}

/// Answers the first offer; later offers are ignored
#[derive(Debug, Default)]
pub(crate) struct PublisherNegotiation {
    remote: Option<String>,
}

#[async_trait]
impl RoleStrategy for PublisherNegotiation {
    fn role(&self) -> Role {
        Role::Publisher
    }

    async fn on_open(&mut self, _ctx: &mut AttemptContext) -> Result<()> {
        info!("Signaling open; waiting for a viewer offer");
        Ok(())
    }

    async fn on_offer(
        &mut self,
        ctx: &mut AttemptContext,
        description: SessionDescription,
        sender: Option<String>,
    ) -> Result<()> {
        if let Some(remote) = &self.remote {
            debug!(
                "Ignoring offer from {} while negotiating with {}",
                sender.as_deref().unwrap_or("-"),
                remote
            );
            return Ok(());
        }

        let Some(sender) = sender else {
            return Err(Error::SignalingProtocolError(
                "Offer carries no sender client id".to_string(),
            ));
        };

        info!("Answering offer from {}", sender);
        self.remote = Some(sender.clone());

        ctx.transport.set_remote_description(description).await?;
        let answer = ctx.transport.create_answer().await?;
        ctx.transport.set_local_description(answer.clone()).await?;
        ctx.send(OutboundMessage::Answer(answer), Some(sender.as_str())).await?;

        ctx.flush_candidates(Some(sender.as_str())).await
    }

    async fn on_answer(
        &mut self,
        _ctx: &mut AttemptContext,
        _description: SessionDescription,
        sender: Option<String>,
    ) -> Result<()> {
        Err(Error::SignalingProtocolError(format!(
            "Publisher received an answer from {}",
            sender.as_deref().unwrap_or("-")
        )))
    }

    fn accepts_candidate_from(&self, sender: Option<&str>) -> bool {
        match (&self.remote, sender) {
            (None, _) => true,
            (Some(remote), Some(sender)) => remote == sender,
            (Some(_), None) => false,
        }
    }

    fn remote_client_id(&self) -> Option<&str> {
        self.remote.as_deref()
    }
}

/// Sends one offer on open and applies the single answer
#[derive(Debug, Default)]
pub(crate) struct SubscriberNegotiation {
    offered: bool,
    answered: bool,
}

#[async_trait]
impl RoleStrategy for SubscriberNegotiation {
    fn role(&self) -> Role {
        Role::Subscriber
    }

    async fn on_open(&mut self, ctx: &mut AttemptContext) -> Result<()> {
        if self.offered {
            return Ok(());
        }

        let offer = ctx.transport.create_offer().await?;
        ctx.transport.set_local_description(offer.clone()).await?;
        ctx.send(OutboundMessage::Offer(offer), None).await?;
        self.offered = true;

        info!("Sent offer");
        Ok(())
    }

    async fn on_offer(
        &mut self,
        _ctx: &mut AttemptContext,
        _description: SessionDescription,
        sender: Option<String>,
    ) -> Result<()> {
        Err(Error::SignalingProtocolError(format!(
            "Subscriber received an offer from {}",
            sender.as_deref().unwrap_or("-")
        )))
    }

    async fn on_answer(
        &mut self,
        ctx: &mut AttemptContext,
        description: SessionDescription,
        _sender: Option<String>,
    ) -> Result<()> {
        if !self.offered {
            return Err(Error::SignalingProtocolError(
                "Answer arrived before any offer was sent".to_string(),
            ));
        }
        if self.answered {
            return Err(Error::SignalingProtocolError(
                "Duplicate answer".to_string(),
            ));
        }

        info!("Applying answer");
        self.answered = true;
        ctx.transport.set_remote_description(description).await?;

        ctx.flush_candidates(None).await
    }

    fn accepts_candidate_from(&self, _sender: Option<&str>) -> bool {
        true
    }

    fn remote_client_id(&self) -> Option<&str> {
        None
    }
}
