//! Bookkeeping for operations waiting on a broker acknowledgement
//!
//! Publishes and subscribes share one packet id space, as they do on the
//! wire. Every entry owns the sender half of a oneshot; removing an entry for
//! any reason other than its acknowledgement fails that sender explicitly, so
//! a waiting caller is never left hanging on a dropped callback.

use std::collections::HashMap;
use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use super::error::{Operation, SessionError};
use super::session::SubscribeGrant;
use super::MessageId;

pub(crate) type DeliveryReply = oneshot::Sender<Result<(), SessionError>>;
pub(crate) type SubscribeReply = oneshot::Sender<Result<SubscribeGrant, SessionError>>;

struct PendingPublish {
    reply: DeliveryReply,
    deadline: Option<Instant>,
}

struct PendingSubscribe {
    topic: String,
    requested: QoS,
    reply: SubscribeReply,
    deadline: Option<Instant>,
}

pub(crate) struct Inflight {
    last_id: MessageId,
    timeout: Option<Duration>,
    publishes: HashMap<MessageId, PendingPublish>,
    subscribes: HashMap<MessageId, PendingSubscribe>,
}

impl Inflight {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            last_id: 0,
            timeout,
            publishes: HashMap::new(),
            subscribes: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.publishes.len() + self.subscribes.len()
    }

    fn in_use(&self, id: MessageId) -> bool {
        self.publishes.contains_key(&id) || self.subscribes.contains_key(&id)
    }

    /// Next free packet id after the last one handed out, wrapping past
    /// 65535 and never yielding 0.
    pub(crate) fn next_id(&mut self) -> Result<MessageId, SessionError> {
        let mut candidate = self.last_id;
        for _ in 0..usize::from(MessageId::MAX) {
            candidate = candidate.checked_add(1).unwrap_or(1);
            if !self.in_use(candidate) {
                self.last_id = candidate;
                return Ok(candidate);
            }
        }
        Err(SessionError::InflightFull(self.len()))
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    pub(crate) fn insert_publish(&mut self, id: MessageId, reply: DeliveryReply) {
        let deadline = self.deadline();
        self.publishes.insert(id, PendingPublish { reply, deadline });
    }

    pub(crate) fn insert_subscribe(
        &mut self,
        id: MessageId,
        topic: String,
        requested: QoS,
        reply: SubscribeReply,
    ) {
        let deadline = self.deadline();
        self.subscribes.insert(
            id,
            PendingSubscribe {
                topic,
                requested,
                reply,
                deadline,
            },
        );
    }

    /// Resolves the publish waiting on `id`. Returns false for ids that are
    /// not pending, e.g. a duplicate acknowledgement or one that arrives
    /// after the operation timed out.
    pub(crate) fn complete_publish(&mut self, id: MessageId) -> bool {
        match self.publishes.remove(&id) {
            Some(pending) => {
                let _ = pending.reply.send(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Resolves the subscribe waiting on `id` with the broker's answer.
    /// Returns the grant on success so the caller can log it.
    pub(crate) fn complete_subscribe(
        &mut self,
        id: MessageId,
        granted: Option<QoS>,
    ) -> Option<Result<SubscribeGrant, SessionError>> {
        let pending = self.subscribes.remove(&id)?;
        let result = match granted {
            Some(granted) => Ok(SubscribeGrant {
                topic: pending.topic,
                requested: pending.requested,
                granted,
            }),
            None => Err(SessionError::SubscribeFailed {
                topic: pending.topic,
                reason: "broker returned failure code".to_string(),
            }),
        };
        let _ = pending.reply.send(result.clone());
        Some(result)
    }

    /// Fails whichever operation holds `id`.
    pub(crate) fn fail(&mut self, id: MessageId, error: SessionError) -> bool {
        if let Some(pending) = self.publishes.remove(&id) {
            let _ = pending.reply.send(Err(error));
            true
        } else if let Some(pending) = self.subscribes.remove(&id) {
            let _ = pending.reply.send(Err(error));
            true
        } else {
            false
        }
    }

    /// Fails every pending operation with the same error.
    pub(crate) fn fail_all(&mut self, error: SessionError) -> usize {
        let count = self.len();
        for (_, pending) in self.publishes.drain() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        for (_, pending) in self.subscribes.drain() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let publishes = self.publishes.values().filter_map(|p| p.deadline);
        let subscribes = self.subscribes.values().filter_map(|s| s.deadline);
        publishes.chain(subscribes).min()
    }

    /// Fails every operation whose deadline is at or before `now` with
    /// [`SessionError::Timeout`] and returns what expired.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Operation> {
        let due = |deadline: Option<Instant>| deadline.is_some_and(|d| d <= now);

        let mut expired: Vec<Operation> = self
            .publishes
            .iter()
            .filter(|(_, p)| due(p.deadline))
            .map(|(id, _)| Operation::Publish(*id))
            .collect();
        expired.extend(
            self.subscribes
                .iter()
                .filter(|(_, s)| due(s.deadline))
                .map(|(id, _)| Operation::Subscribe(*id)),
        );

        for operation in &expired {
            if let Operation::Publish(id) | Operation::Subscribe(id) = operation {
                debug!("Expiring {}", operation);
                self.fail(*id, SessionError::Timeout(*operation));
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_reply() -> (DeliveryReply, oneshot::Receiver<Result<(), SessionError>>) {
        oneshot::channel()
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut inflight = Inflight::new(None);
        assert_eq!(inflight.next_id(), Ok(1));
        assert_eq!(inflight.next_id(), Ok(2));
        assert_eq!(inflight.next_id(), Ok(3));
    }

    #[test]
    fn ids_wrap_without_zero_and_skip_pending() {
        let mut inflight = Inflight::new(None);
        let (reply, _rx) = publish_reply();
        inflight.insert_publish(1, reply);
        inflight.last_id = MessageId::MAX - 1;

        assert_eq!(inflight.next_id(), Ok(MessageId::MAX));
        // 0 is skipped by the wrap and 1 is still waiting for its ack
        assert_eq!(inflight.next_id(), Ok(2));
    }

    #[test]
    fn exhausted_id_space_is_an_error() {
        let mut inflight = Inflight::new(None);
        for id in 1..=MessageId::MAX {
            let (reply, _rx) = publish_reply();
            inflight.insert_publish(id, reply);
        }
        assert_eq!(
            inflight.next_id(),
            Err(SessionError::InflightFull(usize::from(MessageId::MAX)))
        );
    }

    #[test]
    fn completing_a_publish_resolves_it_once() {
        let mut inflight = Inflight::new(None);
        let (reply, mut rx) = publish_reply();
        inflight.insert_publish(4, reply);

        assert!(inflight.complete_publish(4));
        assert!(!inflight.complete_publish(4));
        assert_eq!(rx.try_recv(), Ok(Ok(())));
    }

    #[test]
    fn downgraded_suback_is_a_grant() {
        let mut inflight = Inflight::new(None);
        let (reply, mut rx) = oneshot::channel();
        inflight.insert_subscribe(9, "test/message".into(), QoS::ExactlyOnce, reply);

        let grant = inflight
            .complete_subscribe(9, Some(QoS::AtLeastOnce))
            .expect("pending subscribe")
            .expect("granted");
        assert!(grant.is_downgraded());
        assert_eq!(rx.try_recv().unwrap().unwrap().granted, QoS::AtLeastOnce);
    }

    #[test]
    fn failure_suback_is_an_error() {
        let mut inflight = Inflight::new(None);
        let (reply, mut rx) = oneshot::channel();
        inflight.insert_subscribe(2, "test/message".into(), QoS::ExactlyOnce, reply);

        inflight.complete_subscribe(2, None);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(SessionError::SubscribeFailed { .. })
        ));
    }

    #[test]
    fn fail_all_reaches_every_waiter() {
        let mut inflight = Inflight::new(None);
        let (first, mut first_rx) = publish_reply();
        let (second, mut second_rx) = publish_reply();
        inflight.insert_publish(1, first);
        inflight.insert_publish(2, second);

        assert_eq!(inflight.fail_all(SessionError::Closed), 2);
        assert_eq!(first_rx.try_recv(), Ok(Err(SessionError::Closed)));
        assert_eq!(second_rx.try_recv(), Ok(Err(SessionError::Closed)));
        assert_eq!(inflight.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_operations_time_out() {
        let mut inflight = Inflight::new(Some(Duration::from_millis(500)));
        let (reply, mut rx) = publish_reply();
        inflight.insert_publish(3, reply);
        let deadline = inflight.next_deadline().expect("deadline");

        let just_before = deadline - Duration::from_millis(1);
        assert!(inflight.expire(just_before).is_empty());
        assert_eq!(inflight.expire(deadline), vec![Operation::Publish(3)]);
        assert_eq!(
            rx.try_recv(),
            Ok(Err(SessionError::Timeout(Operation::Publish(3))))
        );
        assert_eq!(inflight.next_deadline(), None);
    }
}
