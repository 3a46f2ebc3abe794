//! Message Bus Dispatcher
//!
//! Channel-backed implementation of the bus contract: registration,
//! at-least-once fan-out publish, and correlated request/response with
//! bounded waits. Delivery order is FIFO per sender per topic, not
//! global. Dispatcher failure is the only process-fatal error class;
//! everything else stays local to the calling service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BusMessage, BusPayload, ServiceId, Topic};

/// Bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no service registered on topic {0}")]
    NoResponder(String),

    #[error("request on topic {0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(Uuid),

    #[error("bus transport closed")]
    ChannelClosed,
}

struct Subscriber {
    service: ServiceId,
    tx: mpsc::UnboundedSender<BusMessage>,
}

struct PendingRequest {
    topic: Topic,
    tx: oneshot::Sender<BusMessage>,
}

struct BusInner {
    subscribers: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
}

/// The process-wide message bus. Cheap to clone; all clones share the
/// same routing table.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a service under a topic. The returned receiver yields
    /// every message published to that topic from this point on; nothing
    /// published earlier is replayed.
    pub async fn register(
        &self,
        service: ServiceId,
        topic: Topic,
    ) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers
            .entry(topic.clone())
            .or_default()
            .push(Subscriber { service: service.clone(), tx });
        debug!(%service, %topic, "service registered on bus");
        rx
    }

    /// Drop a service's registration on a topic.
    pub async fn unregister(&self, service: &ServiceId, topic: &Topic) {
        let mut subscribers = self.inner.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(topic) {
            subs.retain(|s| &s.service != service);
            if subs.is_empty() {
                subscribers.remove(topic);
            }
        }
        debug!(%service, %topic, "service unregistered from bus");
    }

    /// Deliver a payload to all current subscribers of a topic. Returns
    /// the number of live subscribers reached; zero is not an error.
    pub async fn publish(
        &self,
        source: ServiceId,
        topic: Topic,
        payload: BusPayload,
    ) -> Result<usize, BusError> {
        self.dispatch(BusMessage {
            topic,
            source,
            correlation: None,
            payload,
        })
        .await
    }

    /// Correlated round-trip: deliver a request to the topic's
    /// subscribers and wait for one of them to respond, within the
    /// caller's timeout. Fails fast when nobody is registered.
    pub async fn request(
        &self,
        source: ServiceId,
        topic: Topic,
        payload: BusPayload,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        let correlation = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(
                correlation,
                PendingRequest {
                    topic: topic.clone(),
                    tx,
                },
            );
        }

        let delivered = self
            .dispatch(BusMessage {
                topic: topic.clone(),
                source,
                correlation: Some(correlation),
                payload,
            })
            .await?;

        if delivered == 0 {
            self.inner.pending.lock().await.remove(&correlation);
            return Err(BusError::NoResponder(topic.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                // Responder dropped the pending slot without replying
                self.inner.pending.lock().await.remove(&correlation);
                Err(BusError::ChannelClosed)
            }
            Err(_) => {
                self.inner.pending.lock().await.remove(&correlation);
                Err(BusError::Timeout(topic.to_string(), timeout))
            }
        }
    }

    /// Answer a correlated request. The reply is routed straight to the
    /// waiting caller, not re-published to the topic.
    pub async fn respond(
        &self,
        source: ServiceId,
        correlation: Uuid,
        payload: BusPayload,
    ) -> Result<(), BusError> {
        let pending = {
            let mut pending = self.inner.pending.lock().await;
            pending.remove(&correlation)
        };
        match pending {
            Some(PendingRequest { topic, tx }) => {
                let reply = BusMessage {
                    topic,
                    source,
                    correlation: Some(correlation),
                    payload,
                };
                tx.send(reply).map_err(|_| BusError::ChannelClosed)
            }
            None => {
                // Caller already timed out; the reply has nowhere to go
                warn!(%correlation, "response for expired or unknown request");
                Err(BusError::UnknownCorrelation(correlation))
            }
        }
    }

    async fn dispatch(&self, message: BusMessage) -> Result<usize, BusError> {
        let mut delivered = 0;
        let mut dead = false;
        {
            let subscribers = self.inner.subscribers.read().await;
            match subscribers.get(&message.topic) {
                Some(subs) => {
                    for sub in subs {
                        if sub.tx.send(message.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            dead = true;
                        }
                    }
                }
                None => {
                    debug!(topic = %message.topic, "publish to topic with no subscribers");
                }
            }
        }

        if dead {
            // Prune receivers whose services have gone away
            let mut subscribers = self.inner.subscribers.write().await;
            if let Some(subs) = subscribers.get_mut(&message.topic) {
                subs.retain(|s| !s.tx.is_closed());
                if subs.is_empty() {
                    subscribers.remove(&message.topic);
                }
            }
        }

        Ok(delivered)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{CtlReply, CtlRequest};
    use crate::types::{Blockchain, SwapEvent, SwapEventKind, SwapId};

    fn event_payload(seq: u64) -> BusPayload {
        BusPayload::Event(SwapEvent {
            seq,
            kind: SwapEventKind::UserAbort,
        })
    }

    #[tokio::test]
    async fn test_publish_fanout_and_fifo() {
        let bus = MessageBus::new();
        let swap_id = SwapId::random();
        let topic = Topic::Swap(swap_id);

        let mut rx1 = bus.register(ServiceId::Swap(swap_id), topic.clone()).await;
        let mut rx2 = bus.register(ServiceId::Daemon, topic.clone()).await;

        for seq in 1..=3 {
            let delivered = bus
                .publish(ServiceId::Control, topic.clone(), event_payload(seq))
                .await
                .unwrap();
            assert_eq!(delivered, 2);
        }

        for rx in [&mut rx1, &mut rx2] {
            for expected in 1..=3u64 {
                let msg = rx.recv().await.unwrap();
                match msg.payload {
                    BusPayload::Event(ev) => assert_eq!(ev.seq, expected),
                    other => panic!("unexpected payload: {:?}", other),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_publishes() {
        let bus = MessageBus::new();
        let topic = Topic::Syncer(Blockchain::Arbitrating);

        bus.publish(ServiceId::Daemon, topic.clone(), event_payload(1))
            .await
            .unwrap();

        let mut rx = bus
            .register(ServiceId::Syncer(Blockchain::Arbitrating), topic.clone())
            .await;
        bus.publish(ServiceId::Daemon, topic.clone(), event_payload(2))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        match msg.payload {
            BusPayload::Event(ev) => assert_eq!(ev.seq, 2),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_response_roundtrip() {
        let bus = MessageBus::new();
        let mut rx = bus.register(ServiceId::Control, Topic::Control).await;

        let responder_bus = bus.clone();
        tokio::spawn(async move {
            let msg = rx.recv().await.unwrap();
            let correlation = msg.correlation.unwrap();
            responder_bus
                .respond(
                    ServiceId::Control,
                    correlation,
                    BusPayload::CtlReply(CtlReply::failure("TEST", "ok")),
                )
                .await
                .unwrap();
        });

        let reply = bus
            .request(
                ServiceId::Rpc,
                Topic::Control,
                BusPayload::Ctl(CtlRequest::Info),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(
            reply.payload,
            BusPayload::CtlReply(CtlReply::Failure { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_without_responder_fails_fast() {
        let bus = MessageBus::new();
        let err = bus
            .request(
                ServiceId::Rpc,
                Topic::Wallet,
                BusPayload::Ctl(CtlRequest::Info),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoResponder(_)));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let bus = MessageBus::new();
        // Registered but never responds
        let _rx = bus.register(ServiceId::Wallet, Topic::Wallet).await;

        let err = bus
            .request(
                ServiceId::Rpc,
                Topic::Wallet,
                BusPayload::Ctl(CtlRequest::Info),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_, _)));
    }

    #[tokio::test]
    async fn test_respond_after_timeout_is_rejected() {
        let bus = MessageBus::new();
        let mut rx = bus.register(ServiceId::Wallet, Topic::Wallet).await;

        let err = bus
            .request(
                ServiceId::Rpc,
                Topic::Wallet,
                BusPayload::Ctl(CtlRequest::Info),
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout(_, _)));

        let msg = rx.recv().await.unwrap();
        let correlation = msg.correlation.unwrap();
        let err = bus
            .respond(
                ServiceId::Wallet,
                correlation,
                BusPayload::CtlReply(CtlReply::failure("LATE", "too late")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownCorrelation(_)));
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let bus = MessageBus::new();
        let topic = Topic::Wallet;
        let mut rx = bus.register(ServiceId::Wallet, topic.clone()).await;

        bus.unregister(&ServiceId::Wallet, &topic).await;
        let delivered = bus
            .publish(ServiceId::Daemon, topic, event_payload(1))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert!(rx.recv().await.is_none());
    }
}
