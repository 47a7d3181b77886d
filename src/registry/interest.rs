//! Standing interest subscriptions.
//!
//! A subscriber states an [`Interest`] and receives the current matching views
//! as `Add` notifications followed by every live change that matches. The
//! snapshot and the stream receiver are both captured while the registry's
//! mutation serializer is held, so there is no gap and no duplicate between
//! the two.
//!
//! A subscriber that falls behind the change stream has missed notifications
//! and can no longer keep its view correct. Its stream ends, [`InterestStream::is_lagged`]
//! reports why, and the caller resubscribes for a fresh snapshot, much like a
//! watch cancelled on a compacted revision.

use crate::model::{ChangeNotification, InstanceRecord};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Which instances a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Every instance.
    Full,
    /// Instances of one application.
    Application(String),
    /// Instances serving a VIP.
    Vip(String),
    /// Instances serving a secure VIP.
    SecureVip(String),
    /// A single instance id.
    Instance(String),
    /// Union of several interests.
    Composite(Vec<Interest>),
}

impl Interest {
    pub fn matches(&self, record: &InstanceRecord) -> bool {
        match self {
            Self::Full => true,
            Self::Application(name) => record.app_name == *name,
            Self::Vip(name) => record.vip_addresses().any(|vip| vip == name),
            Self::SecureVip(name) => record.secure_vip_addresses().any(|vip| vip == name),
            Self::Instance(id) => record.id == *id,
            Self::Composite(interests) => interests.iter().any(|i| i.matches(record)),
        }
    }
}

/// Snapshot-then-live stream of notifications for one interest.
#[derive(Debug)]
pub struct InterestStream {
    interest: Interest,
    backlog: VecDeque<ChangeNotification>,
    receiver: broadcast::Receiver<ChangeNotification>,
    lagged: u64,
}

impl InterestStream {
    pub(crate) fn new(
        interest: Interest,
        snapshot: Vec<ChangeNotification>,
        receiver: broadcast::Receiver<ChangeNotification>,
    ) -> Self {
        Self {
            interest,
            backlog: snapshot.into(),
            receiver,
            lagged: 0,
        }
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Notifications dropped because this subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Whether the stream ended because notifications were dropped. The
    /// caller must resubscribe to get a consistent view again.
    pub fn is_lagged(&self) -> bool {
        self.lagged > 0
    }

    fn end_lagged(&mut self, skipped: u64) {
        self.lagged += skipped;
        tracing::warn!(
            skipped,
            interest = ?self.interest,
            "interest subscriber lagged; stream ended"
        );
    }

    /// Next matching notification; `None` once the registry shuts down or the
    /// subscriber lagged.
    pub async fn next(&mut self) -> Option<ChangeNotification> {
        if let Some(notification) = self.backlog.pop_front() {
            return Some(notification);
        }
        if self.is_lagged() {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(notification) => {
                    if self.interest.matches(notification.record()) {
                        return Some(notification);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.end_lagged(skipped);
                    return None;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching notification if one is already available.
    pub fn try_next(&mut self) -> Option<ChangeNotification> {
        if let Some(notification) = self.backlog.pop_front() {
            return Some(notification);
        }
        if self.is_lagged() {
            return None;
        }
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => {
                    if self.interest.matches(notification.record()) {
                        return Some(notification);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    self.end_lagged(skipped);
                    return None;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently available.
    pub fn drain_ready(&mut self) -> Vec<ChangeNotification> {
        let mut out = Vec::new();
        while let Some(notification) = self.try_next() {
            out.push(notification);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use std::sync::Arc;

    fn rec(id: &str, app: &str) -> Arc<InstanceRecord> {
        Arc::new(
            InstanceRecord::builder(id, app)
                .vip_address("a.vip,b.vip")
                .build(),
        )
    }

    #[test]
    fn test_interest_matching() {
        let r = rec("i1", "A");
        assert!(Interest::Full.matches(&r));
        assert!(Interest::Application("A".into()).matches(&r));
        assert!(!Interest::Application("B".into()).matches(&r));
        assert!(Interest::Vip("b.vip".into()).matches(&r));
        assert!(!Interest::SecureVip("b.vip".into()).matches(&r));
        assert!(Interest::Instance("i1".into()).matches(&r));
        assert!(Interest::Composite(vec![
            Interest::Instance("nope".into()),
            Interest::Application("A".into()),
        ])
        .matches(&r));
    }

    #[test]
    fn test_backlog_then_live_filtered() {
        let (tx, rx) = broadcast::channel(16);
        let source = Source::local("c", "1");
        let snapshot = vec![ChangeNotification::add(rec("i1", "A"), source.clone())];
        let mut stream = InterestStream::new(Interest::Application("A".into()), snapshot, rx);

        tx.send(ChangeNotification::add(rec("i2", "B"), source.clone())).unwrap();
        tx.send(ChangeNotification::delete(rec("i1", "A"), source)).unwrap();

        let got = stream.drain_ready();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].instance_id(), "i1");
        assert_eq!(got[1].kind(), crate::model::ChangeKind::Delete);
    }

    #[tokio::test]
    async fn test_lag_ends_the_stream() {
        let (tx, rx) = broadcast::channel(2);
        let source = Source::local("c", "1");
        let mut stream = InterestStream::new(Interest::Full, Vec::new(), rx);
        for i in 0..5 {
            tx.send(ChangeNotification::add(rec(&format!("i{i}"), "A"), source.clone()))
                .unwrap();
        }

        assert!(stream.next().await.is_none());
        assert!(stream.is_lagged());
        assert_eq!(stream.lagged(), 3);

        tx.send(ChangeNotification::add(rec("i9", "A"), source)).unwrap();
        assert!(stream.try_next().is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_next_returns_none_when_closed() {
        let (tx, rx) = broadcast::channel::<ChangeNotification>(4);
        let mut stream = InterestStream::new(Interest::Full, Vec::new(), rx);
        drop(tx);
        assert!(stream.next().await.is_none());
    }
}
