//! Shared per-connection handle.
//!
//! A [`SessionHandle`] is what scripts hold to talk back to the peer that
//! invoked them. It is cheap to clone and always addresses the connection
//! it was created for.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::pending::{PendingRequests, RequestError};
use crate::objects::{ObjectRef, ObjectRegistry};
use crate::protocol::{decode, OutboundMessage, Value};

struct SessionInner {
    id: String,
    registry: Arc<ObjectRegistry>,
    frame_tx: UnboundedSender<Vec<u8>>,
    pending: PendingRequests,
    closed: CancellationToken,
    last_activity: Mutex<Instant>,
}

/// Handle to one live connection.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Create a session and the receiver its write loop drains.
    pub fn new(
        id: impl Into<String>,
        registry: Arc<ObjectRegistry>,
    ) -> (Self, UnboundedReceiver<Vec<u8>>) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                registry,
                frame_tx,
                pending: PendingRequests::new(),
                closed: CancellationToken::new(),
                last_activity: Mutex::new(Instant::now()),
            }),
        };
        (handle, frame_rx)
    }

    /// Connection identifier (e.g. `conn-3`).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Object registry used to decode replies.
    pub fn registry(&self) -> &ObjectRegistry {
        &self.inner.registry
    }

    /// Correlation table for this connection.
    pub fn pending(&self) -> &PendingRequests {
        &self.inner.pending
    }

    /// Queue a message for the write loop.
    ///
    /// Returns `false` if the write loop is gone.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        log::trace!("[Conn {}] -> {}", self.inner.id, message.command());
        self.inner.frame_tx.send(message.encode().into_bytes()).is_ok()
    }

    /// Ask the peer to run `name` with `args` and wait for its reply.
    ///
    /// Objects in `args` travel as bare serials.
    ///
    /// # Errors
    ///
    /// [`RequestError::Disconnected`] if the connection closes first;
    /// [`RequestError::Decode`] if the reply is an error marker or cannot
    /// be decoded.
    pub async fn send_request(&self, name: &str, args: Vec<Value>) -> Result<Value, RequestError> {
        let (id, reply) = self.inner.pending.register()?;
        let message = OutboundMessage::Do {
            id,
            name: name.to_string(),
            args,
        };
        self.await_reply(id, &message, reply).await
    }

    /// Ask the peer for `member` of `obj` and wait for its reply.
    ///
    /// # Errors
    ///
    /// Same as [`send_request`](Self::send_request).
    pub async fn query_object_info(&self, obj: ObjectRef, member: &str) -> Result<Value, RequestError> {
        let (id, reply) = self.inner.pending.register()?;
        let message = OutboundMessage::Qry {
            id,
            obj,
            member: member.to_string(),
        };
        self.await_reply(id, &message, reply).await
    }

    async fn await_reply(
        &self,
        id: u64,
        message: &OutboundMessage,
        reply: super::pending::ReplyReceiver,
    ) -> Result<Value, RequestError> {
        if !self.send(message) {
            self.inner.pending.cancel(id);
            return Err(RequestError::Disconnected);
        }
        let raw = reply.await.unwrap_or(Err(RequestError::Disconnected))?;
        Ok(decode(&raw, &self.inner.registry)?)
    }

    /// Deliver a raw `doret` payload. Returns `false` for unknown ids.
    pub fn complete_request(&self, id: u64, reply: serde_json::Value) -> bool {
        self.inner.pending.complete(id, reply)
    }

    /// Close the session: wake the connection loops and fail every
    /// pending request. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        let oldest = self.inner.pending.oldest_age();
        let abandoned = self.inner.pending.abandon_all();
        if let Some(oldest) = oldest {
            log::info!(
                "[Conn {}] Abandoned {} pending request(s), oldest waited {:?}",
                self.inner.id,
                abandoned,
                oldest
            );
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Record traffic on the connection.
    pub fn touch(&self) {
        *self
            .inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time of the last read or write.
    pub fn last_activity(&self) -> Instant {
        *self
            .inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last read or write.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Character;
    use serde_json::json;

    fn session() -> (SessionHandle, UnboundedReceiver<Vec<u8>>) {
        SessionHandle::new("conn-test", Arc::new(ObjectRegistry::with_defaults()))
    }

    async fn next_frame(rx: &mut UnboundedReceiver<Vec<u8>>) -> String {
        String::from_utf8(rx.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_send_request_round_trip() {
        let (session, mut rx) = session();
        let requester = session.clone();
        let task = tokio::spawn(async move {
            requester
                .send_request("SendSysMessage", vec![Value::from("hi")])
                .await
        });

        assert_eq!(next_frame(&mut rx).await, "do\n[1,\"SendSysMessage\",[\"hi\"]]\n");
        assert!(session.complete_request(1, json!("$sent")));
        assert_eq!(task.await.unwrap().unwrap(), Value::from("sent"));
    }

    #[tokio::test]
    async fn test_query_object_info() {
        let (session, mut rx) = session();
        let requester = session.clone();
        let task = tokio::spawn(async move {
            requester
                .query_object_info(Arc::new(Character::new(1001)), "name")
                .await
        });

        assert_eq!(next_frame(&mut rx).await, "qry\n[1,\"@mr1001\",\"name\"]\n");
        session.complete_request(1, json!("$Aragorn"));
        assert_eq!(task.await.unwrap().unwrap(), Value::from("Aragorn"));
    }

    #[tokio::test]
    async fn test_remote_error_reply_fails_request() {
        let (session, mut rx) = session();
        let requester = session.clone();
        let task = tokio::spawn(async move { requester.send_request("Explode", vec![]).await });

        next_frame(&mut rx).await;
        session.complete_request(1, json!("€no such command"));
        match task.await.unwrap() {
            Err(RequestError::Decode(e)) => assert_eq!(e.to_string(), "no such command"),
            other => panic!("Expected decode error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_resolve_to_own_reply() {
        let (session, mut rx) = session();
        let mut tasks = Vec::new();
        for n in 0..4i64 {
            let requester = session.clone();
            tasks.push(tokio::spawn(async move {
                requester.send_request("Echo", vec![Value::Int(n)]).await
            }));
        }

        let mut sent = Vec::new();
        for _ in 0..4 {
            let frame = next_frame(&mut rx).await;
            let args: serde_json::Value =
                serde_json::from_str(frame.lines().nth(1).unwrap()).unwrap();
            sent.push((args[0].as_u64().unwrap(), args[2][0].as_i64().unwrap()));
        }

        // Reply in reverse order, echoing each request's own argument.
        for (id, n) in sent.iter().rev() {
            assert!(session.complete_request(*id, json!(format!("#{n}"))));
        }
        for (n, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), Value::Int(n as i64));
        }
    }

    #[tokio::test]
    async fn test_close_fails_pending_request() {
        let (session, mut rx) = session();
        let requester = session.clone();
        let task = tokio::spawn(async move { requester.send_request("Wait", vec![]).await });

        next_frame(&mut rx).await;
        session.close();
        assert!(matches!(
            task.await.unwrap(),
            Err(RequestError::Disconnected)
        ));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_request_after_close_fails_immediately() {
        let (session, _rx) = session();
        session.close();
        assert!(matches!(
            session.send_request("Late", vec![]).await,
            Err(RequestError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_request_fails_when_writer_gone() {
        let (session, rx) = session();
        drop(rx);
        assert!(matches!(
            session.send_request("Nobody", vec![]).await,
            Err(RequestError::Disconnected)
        ));
        assert!(session.pending().is_empty());
    }

    #[test]
    fn test_touch_updates_last_activity() {
        let (session, _rx) = session();
        let before = session.last_activity();
        std::thread::sleep(Duration::from_millis(5));
        session.touch();
        assert!(session.last_activity() > before);
        assert!(session.idle_for() < Duration::from_secs(5));
    }
}
