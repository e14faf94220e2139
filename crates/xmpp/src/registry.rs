//! Correlates outbound IQ requests with their result or error replies.
//!
//! The registry stores continuations keyed by stanza id and never creates
//! ids itself. Continuations receive the owning context mutably, so the
//! registry hands entries back to the caller instead of invoking them while
//! it is still borrowed.

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    error::{RegistryError, RequestError},
    jid,
    sink::StanzaSink,
    stanza::{IqType, Stanza, StanzaKind},
};

pub type SuccessFn<C> = Box<dyn FnOnce(&mut C, Stanza) + Send>;
pub type FailureFn<C> = Box<dyn FnOnce(&mut C, RequestError) + Send>;

pub struct PendingRequest<C> {
    id: String,
    target: Option<String>,
    issued_at: Instant,
    timeout: Duration,
    on_success: SuccessFn<C>,
    on_failure: FailureFn<C>,
}

impl<C> PendingRequest<C> {
    pub fn new(
        id: impl Into<String>,
        target: Option<String>,
        issued_at: Instant,
        timeout: Duration,
        on_success: SuccessFn<C>,
        on_failure: FailureFn<C>,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            issued_at,
            timeout,
            on_success,
            on_failure,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.issued_at + self.timeout
    }

    pub fn succeed(self, ctx: &mut C, response: Stanza) {
        (self.on_success)(ctx, response);
    }

    pub fn fail(self, ctx: &mut C, error: RequestError) {
        (self.on_failure)(ctx, error);
    }

    /// Outcome carried by a reply: results succeed, errors fail remotely.
    pub fn complete(self, ctx: &mut C, response: Stanza) {
        match response.iq_type() {
            Some(IqType::Error) => {
                let (condition, text) = response
                    .error_condition()
                    .unwrap_or_else(|| ("undefined-condition".to_string(), None));
                self.fail(ctx, RequestError::Remote { condition, text });
            }
            _ => self.succeed(ctx, response),
        }
    }
}

impl<C> std::fmt::Debug for PendingRequest<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("issued_at", &self.issued_at)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub struct RequestRegistry<C> {
    pending: HashMap<String, PendingRequest<C>>,
    own_jid: Option<String>,
}

impl<C> Default for RequestRegistry<C> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            own_jid: None,
        }
    }
}

impl<C> RequestRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our full or bare address. Replies to `to`-less requests may come from
    /// it, from its domain, or carry no `from` at all.
    pub fn set_own_jid(&mut self, jid: Option<String>) {
        self.own_jid = jid;
    }

    pub fn register(&mut self, request: PendingRequest<C>) -> Result<(), RegistryError> {
        if request.id.is_empty() {
            return Err(RegistryError::MissingId);
        }
        if self.pending.contains_key(&request.id) {
            return Err(RegistryError::DuplicateId(request.id));
        }
        debug!(id = %request.id, target = ?request.target, "request registered");
        self.pending.insert(request.id.clone(), request);
        Ok(())
    }

    /// Removes and returns the entry answered by `stanza`, if any.
    ///
    /// Only IQ results and errors are considered. A reply from an
    /// unexpected sender is ignored and the entry stays outstanding.
    pub fn take_response(&mut self, stanza: &Stanza) -> Option<PendingRequest<C>> {
        if stanza.kind() != StanzaKind::Iq
            || !matches!(stanza.iq_type(), Some(IqType::Result | IqType::Error))
        {
            return None;
        }

        let id = stanza.id()?;
        let request = self.pending.get(id)?;
        if !self.is_expected_responder(request.target.as_deref(), stanza.from()) {
            warn!(
                id,
                from = stanza.from().unwrap_or_default(),
                expected = request.target.as_deref().unwrap_or_default(),
                "reply from unexpected sender ignored"
            );
            return None;
        }

        self.pending.remove(id)
    }

    /// Removes and returns every entry whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingRequest<C>> {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, request)| request.deadline() <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut requests: Vec<PendingRequest<C>> = expired
            .iter()
            .filter_map(|id| self.pending.remove(id))
            .collect();
        requests.sort_by_key(PendingRequest::deadline);
        requests
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(PendingRequest::deadline).min()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_expected_responder(&self, target: Option<&str>, from: Option<&str>) -> bool {
        match (target, from) {
            (Some(target), Some(from)) => match (jid::parse(target), jid::parse(from)) {
                (Ok(target), Ok(from)) if target.is_full() => target == from,
                (Ok(target), Ok(from)) => target.to_bare() == from.to_bare(),
                _ => target == from,
            },
            (Some(_), None) => false,
            (None, None) => true,
            (None, Some(from)) => match &self.own_jid {
                Some(own) => jid::is_self_or_server(from, own),
                None => true,
            },
        }
    }
}

/// Access a context gives the request helpers below.
pub trait Correlator: Sized {
    fn registry(&mut self) -> &mut RequestRegistry<Self>;
    fn sink(&self) -> &dyn StanzaSink;
}

/// Sends `stanza` and registers its continuations under the stanza's id.
///
/// A send failure or a duplicate id invokes `on_failure` immediately.
pub fn send_request<C: Correlator>(
    ctx: &mut C,
    stanza: Stanza,
    timeout: Duration,
    on_success: SuccessFn<C>,
    on_failure: FailureFn<C>,
) {
    let Some(id) = stanza.id().map(str::to_string) else {
        warn!(stanza = %stanza, "request without id not sent");
        on_failure(ctx, RequestError::Rejected(RegistryError::MissingId));
        return;
    };

    if ctx.registry().contains(&id) {
        warn!(id = %id, "request id already outstanding, not sent");
        on_failure(ctx, RequestError::Rejected(RegistryError::DuplicateId(id)));
        return;
    }

    let target = stanza.to().map(str::to_string);
    let request = PendingRequest::new(
        id.clone(),
        target,
        Instant::now(),
        timeout,
        on_success,
        on_failure,
    );
    if let Err(error) = ctx.registry().register(request) {
        warn!(%error, "request not registered");
        return;
    }

    if let Err(error) = ctx.sink().send(stanza) {
        warn!(id = %id, %error, "request send failed");
        if let Some(request) = ctx.registry().pending.remove(&id) {
            request.fail(ctx, RequestError::Transport(error));
        }
    }
}

/// Routes an IQ reply to its continuation. Returns `false` when nothing was
/// waiting for it.
pub fn dispatch_response<C: Correlator>(ctx: &mut C, stanza: &Stanza) -> bool {
    match ctx.registry().take_response(stanza) {
        Some(request) => {
            debug!(id = request.id(), "request answered");
            request.complete(ctx, stanza.clone());
            true
        }
        None => false,
    }
}

/// Fails every request whose deadline has passed with a timeout.
pub fn expire_requests<C: Correlator>(ctx: &mut C, now: Instant) -> usize {
    let expired = ctx.registry().take_expired(now);
    let count = expired.len();
    for request in expired {
        let timeout = request.timeout;
        debug!(id = request.id(), ?timeout, "request timed out");
        request.fail(ctx, RequestError::Timeout(timeout));
    }
    count
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ConnectionError;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Stanza>>,
        fail: bool,
    }

    impl StanzaSink for RecordingSink {
        fn send(&self, stanza: Stanza) -> Result<(), ConnectionError> {
            if self.fail {
                return Err(ConnectionError::NotConnected);
            }
            self.sent.lock().unwrap().push(stanza);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Ctx {
        registry: RequestRegistry<Ctx>,
        sink: RecordingSink,
        successes: Vec<String>,
        failures: Vec<RequestError>,
    }

    impl Correlator for Ctx {
        fn registry(&mut self) -> &mut RequestRegistry<Self> {
            &mut self.registry
        }

        fn sink(&self) -> &dyn StanzaSink {
            &self.sink
        }
    }

    fn iq(xml: &str) -> Stanza {
        Stanza::parse_str(xml).unwrap()
    }

    fn send(ctx: &mut Ctx, stanza: Stanza, timeout: Duration) {
        send_request(
            ctx,
            stanza,
            timeout,
            Box::new(|ctx: &mut Ctx, reply: Stanza| {
                ctx.successes.push(reply.id().unwrap_or_default().to_string())
            }),
            Box::new(|ctx: &mut Ctx, error: RequestError| ctx.failures.push(error)),
        );
    }

    fn ping(id: &str, to: Option<&str>) -> Stanza {
        let to = to.map(|to| format!(" to='{to}'")).unwrap_or_default();
        iq(&format!(
            "<iq xmlns='jabber:client' type='get' id='{id}'{to}><ping xmlns='urn:xmpp:ping'/></iq>"
        ))
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn result_invokes_success_once() {
        let mut ctx = Ctx::default();
        send(&mut ctx, ping("p1", Some("example.com")), Duration::from_secs(30));
        assert_eq!(ctx.sink.sent.lock().unwrap().len(), 1);
        assert!(ctx.registry.contains("p1"));

        let reply = iq("<iq xmlns='jabber:client' type='result' id='p1' from='example.com'/>");
        assert!(dispatch_response(&mut ctx, &reply));
        assert!(!dispatch_response(&mut ctx, &reply), "second reply is a no-op");

        assert_eq!(ctx.successes, ["p1"]);
        assert!(ctx.failures.is_empty());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn error_reply_invokes_failure_with_condition() {
        let mut ctx = Ctx::default();
        send(&mut ctx, ping("p2", Some("bob@example.com")), Duration::from_secs(30));

        let reply = iq(
            "<iq xmlns='jabber:client' type='error' id='p2' from='bob@example.com/phone'>\
               <error type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>\
             </iq>",
        );
        assert!(dispatch_response(&mut ctx, &reply));

        assert_eq!(
            ctx.failures,
            [RequestError::Remote {
                condition: "service-unavailable".to_string(),
                text: None
            }]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn times_out_after_deadline() {
        let mut ctx = Ctx::default();
        send(&mut ctx, ping("p3", None), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(expire_requests(&mut ctx, Instant::now()), 0);
        assert!(ctx.registry.contains("p3"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(expire_requests(&mut ctx, Instant::now()), 1);

        assert_eq!(
            ctx.failures,
            [RequestError::Timeout(Duration::from_secs(30))]
        );
        assert!(!ctx.registry.contains("p3"));

        let late = iq("<iq xmlns='jabber:client' type='result' id='p3'/>");
        assert!(!dispatch_response(&mut ctx, &late));
        assert!(ctx.successes.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn next_deadline_is_earliest() {
        let mut ctx = Ctx::default();
        let start = Instant::now();
        send(&mut ctx, ping("slow", None), Duration::from_secs(60));
        send(&mut ctx, ping("fast", None), Duration::from_secs(5));

        assert_eq!(ctx.registry.next_deadline(), Some(start + Duration::from_secs(5)));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn duplicate_id_is_rejected() {
        let mut registry: RequestRegistry<()> = RequestRegistry::new();
        let entry = || {
            PendingRequest::new(
                "dup",
                None,
                Instant::now(),
                Duration::from_secs(1),
                Box::new(|_: &mut (), _: Stanza| {}),
                Box::new(|_: &mut (), _: RequestError| {}),
            )
        };

        registry.register(entry()).unwrap();
        assert_eq!(
            registry.register(entry()),
            Err(RegistryError::DuplicateId("dup".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn send_failure_fails_immediately_and_unregisters() {
        let mut ctx = Ctx {
            sink: RecordingSink {
                fail: true,
                ..Default::default()
            },
            ..Default::default()
        };
        send(&mut ctx, ping("p4", None), Duration::from_secs(30));

        assert_eq!(
            ctx.failures,
            [RequestError::Transport(ConnectionError::NotConnected)]
        );
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn reply_from_wrong_sender_is_ignored() {
        let mut ctx = Ctx::default();
        send(&mut ctx, ping("p5", Some("bob@example.com")), Duration::from_secs(30));

        let spoofed = iq("<iq xmlns='jabber:client' type='result' id='p5' from='eve@example.com'/>");
        assert!(!dispatch_response(&mut ctx, &spoofed));
        assert!(ctx.registry.contains("p5"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn to_less_request_accepts_server_or_self() {
        let mut ctx = Ctx::default();
        ctx.registry.set_own_jid(Some("alice@example.com/desk".to_string()));

        for id in ["a", "b", "c", "d"] {
            send(&mut ctx, ping(id, None), Duration::from_secs(30));
        }

        let replies = [
            "<iq xmlns='jabber:client' type='result' id='a'/>",
            "<iq xmlns='jabber:client' type='result' id='b' from='example.com'/>",
            "<iq xmlns='jabber:client' type='result' id='c' from='alice@example.com'/>",
            "<iq xmlns='jabber:client' type='result' id='d' from='mallory@evil.net'/>",
        ];
        let matched: Vec<bool> = replies
            .iter()
            .map(|xml| dispatch_response(&mut ctx, &iq(xml)))
            .collect();

        assert_eq!(matched, [true, true, true, false]);
        assert_eq!(ctx.registry.len(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn requests_are_not_treated_as_replies() {
        let mut ctx = Ctx::default();
        send(&mut ctx, ping("p6", None), Duration::from_secs(30));

        assert!(!dispatch_response(&mut ctx, &ping("p6", None)));
        assert!(ctx.registry.contains("p6"));
    }
}
