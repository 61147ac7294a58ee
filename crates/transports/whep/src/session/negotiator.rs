//! Offer/answer negotiation for one session

use crate::config::WhepConfig;
use crate::error::NegotiationError;
use crate::media::{MediaHandle, MediaTrack};
use crate::observer::Subscription;
use crate::peer::{
    ConnectionResource, IceGatheringWaiter, PeerState, ResourceEvent, ResourceFactory,
};
use crate::session::context::SessionContext;
use crate::signaling::sdp::candidate_count;
use crate::signaling::WhepClient;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Outcome of a successful attempt
#[derive(Debug)]
pub struct Negotiated {
    /// Stream holding the first inbound track
    pub media: MediaHandle,
    /// Resource events queued since the answer was applied, later tracks
    /// and transport changes included
    pub events: Subscription<ResourceEvent>,
}

/// Drives one negotiation attempt from resource creation to first track
pub struct SessionNegotiator {
    config: WhepConfig,
    factory: Arc<dyn ResourceFactory>,
    signaling: WhepClient,
}

impl SessionNegotiator {
    pub fn new(config: WhepConfig, factory: Arc<dyn ResourceFactory>, signaling: WhepClient) -> Self {
        Self {
            config,
            factory,
            signaling,
        }
    }

    /// Negotiate a receive-only session with `session`'s endpoint
    ///
    /// The created resource is handed to the session's release slot before
    /// anything else happens; releasing it is the caller's job on every
    /// outcome. Resolves only once the first inbound track arrives.
    ///
    /// Resource creation itself is not interrupted: a resource finished after
    /// cancellation is handed to the slot, which closes it when the session
    /// was already released.
    #[instrument(skip_all, fields(session_id = %session.id(), endpoint = %session.endpoint()))]
    pub async fn negotiate(
        &self,
        session: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<Negotiated, NegotiationError> {
        let attempt = self.run(session, cancel);

        match self.config.negotiation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(NegotiationError::Timeout(format!(
                    "no inbound track within {:?}",
                    limit
                ))),
            },
            None => attempt.await,
        }
    }

    async fn run(
        &self,
        session: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<Negotiated, NegotiationError> {
        if cancel.is_cancelled() {
            return Err(NegotiationError::Cancelled);
        }

        let resource = self.factory.create(&self.config).await?;
        session.slot().install(Arc::clone(&resource)).await?;

        let offer = cancellable(cancel, resource.create_receive_offer()).await?;

        let outcome = cancellable(cancel, async {
            Ok(IceGatheringWaiter::wait(resource.as_ref(), self.config.ice_gathering_timeout()).await)
        })
        .await?;

        // Local description now carries the gathered candidates
        let local_sdp = resource.local_description().await.unwrap_or(offer);
        session.set_local_sdp(local_sdp.clone());

        info!(
            "Posting offer for session {} ({} candidates, gathering {})",
            session.id(),
            candidate_count(&local_sdp).max(outcome.candidates().len()),
            if outcome.is_complete() { "complete" } else { "partial" }
        );

        let answer = cancellable(cancel, self.signaling.exchange(session.endpoint(), &local_sdp)).await?;
        session.set_location(answer.location.clone());
        session.set_remote_sdp(answer.sdp.clone());

        // Subscribe before applying so an early track is not missed
        let mut events = resource.subscribe_events();
        cancellable(cancel, resource.apply_answer(&answer.sdp)).await?;

        let track = cancellable(cancel, wait_for_track(resource.as_ref(), &mut events)).await?;
        info!(
            "Session {} receiving {} track {}",
            session.id(),
            track.kind(),
            track.track_id()
        );

        Ok(Negotiated {
            media: MediaHandle::new(track),
            events,
        })
    }
}

/// Run `step` unless `cancel` fires first; a cancelled step's future is
/// dropped, aborting whatever it had in flight
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, NegotiationError>>,
) -> Result<T, NegotiationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NegotiationError::Cancelled),
        result = step => result,
    }
}

async fn wait_for_track(
    resource: &dyn ConnectionResource,
    events: &mut Subscription<ResourceEvent>,
) -> Result<MediaTrack, NegotiationError> {
    loop {
        match events.recv().await {
            Some(ResourceEvent::Track(media)) => return Ok(media),
            Some(ResourceEvent::PeerStateChanged(PeerState::Failed)) => {
                return Err(NegotiationError::PeerConnection(
                    "transport failed before the first track".to_string(),
                ))
            }
            Some(ResourceEvent::PeerStateChanged(PeerState::Closed)) | None => {
                return Err(NegotiationError::PeerConnection(
                    "connection closed before the first track".to_string(),
                ))
            }
            Some(ResourceEvent::PeerStateChanged(state)) => {
                debug!("Connection {} transport state {:?}", resource.id(), state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockBehavior, MockResourceFactory};
    use std::time::Duration;
    use url::Url;

    fn session() -> SessionContext {
        SessionContext::new(
            // Port 9 (discard) on loopback refuses connections
            Url::parse("http://127.0.0.1:9/cam01/whep").unwrap(),
            WhepClient::new(Duration::from_secs(1), None).unwrap(),
            false,
        )
    }

    fn negotiator(factory: Arc<MockResourceFactory>) -> SessionNegotiator {
        let config = WhepConfig::lan_preset();
        let signaling = WhepClient::new(config.request_timeout(), None).unwrap();
        SessionNegotiator::new(config, factory, signaling)
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let factory = Arc::new(MockResourceFactory::new(MockBehavior::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = negotiator(Arc::clone(&factory)).negotiate(&session(), &cancel).await;
        assert_eq!(result.unwrap_err(), NegotiationError::Cancelled);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_creation_hands_resource_to_slot() {
        let factory = Arc::new(MockResourceFactory::new(MockBehavior {
            create_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        }));
        let session = session();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };

        let result = negotiator(Arc::clone(&factory))
            .negotiate(&session, &cancel)
            .await;
        canceller.await.unwrap();

        assert_eq!(result.unwrap_err(), NegotiationError::Cancelled);
        assert_eq!(factory.created(), 1);
        assert!(session.slot().resource().await.is_some());

        assert!(session.release().await);
        assert_eq!(factory.live(), 0);
        assert_eq!(factory.last().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_offer_failure_installs_resource_first() {
        let factory = Arc::new(MockResourceFactory::new(MockBehavior {
            fail_offer: true,
            ..Default::default()
        }));
        let session = session();

        let result = negotiator(Arc::clone(&factory))
            .negotiate(&session, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(NegotiationError::PeerConnection(_))));
        assert!(session.slot().resource().await.is_some());
        assert!(session.release().await);
        assert_eq!(factory.live(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_records_local_sdp() {
        let factory = Arc::new(MockResourceFactory::new(MockBehavior::default()));
        let session = session();

        let result = negotiator(factory)
            .negotiate(&session, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(NegotiationError::EndpointUnreachable(_)) | Err(NegotiationError::Timeout(_))
        ));
        let local = session.local_sdp().unwrap();
        assert!(local.contains("a=candidate:"));
        assert!(session.remote_sdp().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_track_reports_failed_transport() {
        let factory = MockResourceFactory::new(MockBehavior::default());
        let resource = factory.create(&WhepConfig::default()).await.unwrap();
        let mut events = resource.subscribe_events();

        let mock = factory.last().unwrap();
        mock.emit_peer_state(PeerState::Connecting);
        mock.emit_peer_state(PeerState::Failed);

        let err = wait_for_track(resource.as_ref(), &mut events).await.unwrap_err();
        assert!(err.to_string().contains("transport failed"));
    }
}
