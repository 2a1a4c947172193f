//! The mDNS service facade: lifecycle, packet dispatch, and the query and
//! answer APIs.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::dns::consts::{
    Ipv6Scope, RecordType, ScopeSelector, CLASS_IN, HOST_RECORD_TTL_SECS, IP_UDP_OVERHEAD,
    LEGACY_TTL_CAP_SECS, MAX_PACKET_SIZE, MDNS_PORT, NON_HOST_TTL_SECS,
};
use crate::dns::decoder::decode;
use crate::dns::encoder::{encode, encode_truncated};
use crate::dns::message::{names_equal, DnsMessage, Question};
use crate::error::{Error, Result};
use crate::events::{CallbackList, Subscription};
use crate::net::interface::{InterfaceFilter, InterfaceInfo, InterfaceSnapshot, NetworkMonitor};
use crate::net::socket::unicast_sender;
use crate::net::transport::{MulticastTransport, PacketHandler, TransportOptions};
use crate::recent::RecentSet;

/// Per-instance configuration, read once at [`MulticastService::start`].
#[derive(Clone)]
pub struct MdnsConfig {
    /// Participate on IPv4. Defaults to whether the OS supports it.
    pub use_ipv4: bool,
    /// Participate on IPv6. Defaults to whether the OS supports it.
    pub use_ipv6: bool,
    /// Drop inbound packets already seen within the last second.
    pub ignore_duplicate_messages: bool,
    /// Include loopback interfaces in discovery.
    pub include_loopback: bool,
    /// Allow unicast answers to queriers that asked for them.
    pub enable_unicast_answers: bool,
    /// TTL applied to host records (A, AAAA, SRV, HINFO, PTR) on send.
    pub host_record_ttl: u32,
    /// TTL applied to all other records on send.
    pub non_host_ttl: u32,
    /// Selects the IPv6 multicast scope for a local address.
    pub scope_selector: ScopeSelector,
    /// Optional predicate narrowing the discovered interface set.
    pub interface_filter: Option<InterfaceFilter>,
    /// How often the interface set is re-checked for changes.
    pub interface_poll_interval: Duration,
}

fn os_supports(domain: Domain) -> bool {
    Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).is_ok()
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            use_ipv4: os_supports(Domain::IPV4),
            use_ipv6: os_supports(Domain::IPV6),
            ignore_duplicate_messages: true,
            include_loopback: false,
            enable_unicast_answers: true,
            host_record_ttl: HOST_RECORD_TTL_SECS,
            non_host_ttl: NON_HOST_TTL_SECS,
            scope_selector: Arc::new(|_| Ipv6Scope::LinkLocal),
            interface_filter: None,
            interface_poll_interval: Duration::from_secs(10),
        }
    }
}

impl MdnsConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable IPv4.
    pub fn with_ipv4(mut self, enable: bool) -> Self {
        self.use_ipv4 = enable;
        self
    }

    /// Enable or disable IPv6.
    pub fn with_ipv6(mut self, enable: bool) -> Self {
        self.use_ipv6 = enable;
        self
    }

    /// Enable or disable inbound duplicate suppression.
    pub fn with_ignore_duplicates(mut self, enable: bool) -> Self {
        self.ignore_duplicate_messages = enable;
        self
    }

    /// Include loopback interfaces in discovery.
    pub fn with_loopback(mut self, enable: bool) -> Self {
        self.include_loopback = enable;
        self
    }

    /// Allow or forbid unicast answers.
    pub fn with_unicast_answers(mut self, enable: bool) -> Self {
        self.enable_unicast_answers = enable;
        self
    }

    /// Override the TTL applied to host records on send.
    pub fn with_host_record_ttl(mut self, ttl: u32) -> Self {
        self.host_record_ttl = ttl;
        self
    }

    /// Override the TTL applied to non-host records on send.
    pub fn with_non_host_ttl(mut self, ttl: u32) -> Self {
        self.non_host_ttl = ttl;
        self
    }

    /// Supply an IPv6 multicast scope selector.
    pub fn with_scope_selector(mut self, selector: ScopeSelector) -> Self {
        self.scope_selector = selector;
        self
    }

    /// Supply an interface predicate.
    pub fn with_interface_filter(
        mut self,
        filter: impl Fn(&InterfaceInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.interface_filter = Some(Arc::new(filter));
        self
    }
}

impl std::fmt::Debug for MdnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsConfig")
            .field("use_ipv4", &self.use_ipv4)
            .field("use_ipv6", &self.use_ipv6)
            .field("ignore_duplicate_messages", &self.ignore_duplicate_messages)
            .field("include_loopback", &self.include_loopback)
            .field("enable_unicast_answers", &self.enable_unicast_answers)
            .field("host_record_ttl", &self.host_record_ttl)
            .field("non_host_ttl", &self.non_host_ttl)
            .field("interface_poll_interval", &self.interface_poll_interval)
            .finish_non_exhaustive()
    }
}

/// A decoded message together with the peer that sent it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The decoded message.
    pub message: DnsMessage,
    /// Source endpoint of the datagram.
    pub remote: SocketAddr,
}

impl ReceivedMessage {
    /// A query is legacy-unicast iff its source port is not 5353
    /// (RFC 6762 section 6.7). Legacy queriers expect a unicast answer
    /// mirroring their transaction id and questions.
    pub fn is_legacy_unicast(&self) -> bool {
        self.remote.port() != MDNS_PORT
    }
}

/// Multicast DNS engine: joins the mDNS groups on the usable interfaces,
/// dispatches inbound queries and answers to subscribers, and sends
/// queries and answers per RFC 6762.
pub struct MulticastService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: MdnsConfig,
    monitor: NetworkMonitor,
    recent_inbound: RecentSet,
    recent_outbound: RecentSet,
    active: Mutex<Option<ActiveState>>,
    query_received: Arc<CallbackList<ReceivedMessage>>,
    answer_received: Arc<CallbackList<ReceivedMessage>>,
    malformed_message: Arc<CallbackList<Vec<u8>>>,
    interfaces_discovered: Arc<CallbackList<Vec<InterfaceInfo>>>,
}

struct ActiveState {
    transport: Arc<MulticastTransport>,
    unicast_v4: Option<Arc<UdpSocket>>,
    unicast_v6: Option<Arc<UdpSocket>>,
    max_payload: usize,
}

impl MulticastService {
    /// Create a service with the given configuration. Nothing touches the
    /// network until [`MulticastService::start`].
    pub fn new(config: MdnsConfig) -> Self {
        let monitor = NetworkMonitor::new(
            config.include_loopback,
            config.interface_filter.clone(),
            config.interface_poll_interval,
        );
        Self {
            inner: Arc::new(ServiceInner {
                config,
                monitor,
                recent_inbound: RecentSet::default(),
                recent_outbound: RecentSet::default(),
                active: Mutex::new(None),
                query_received: Arc::new(CallbackList::default()),
                answer_received: Arc::new(CallbackList::default()),
                malformed_message: Arc::new(CallbackList::default()),
                interfaces_discovered: Arc::new(CallbackList::default()),
            }),
        }
    }

    /// The configuration this service was created with.
    pub fn config(&self) -> &MdnsConfig {
        &self.inner.config
    }

    /// Discover the usable interfaces, join the mDNS groups, and start
    /// receiving. Idempotent; a second call after [`MulticastService::stop`]
    /// re-initializes.
    pub async fn start(&self) -> Result<()> {
        if self.inner.active.lock().unwrap().is_some() {
            return Ok(());
        }

        self.inner.monitor.reset();
        let snapshot = self.inner.monitor.refresh()?;
        let transport = self.inner.build_transport(&snapshot.interfaces)?;

        let unicast_v4 = if self.inner.config.use_ipv4 {
            Some(Arc::new(unicast_sender(false)?))
        } else {
            None
        };
        let unicast_v6 = if self.inner.config.use_ipv6 {
            Some(Arc::new(unicast_sender(true)?))
        } else {
            None
        };

        *self.inner.active.lock().unwrap() = Some(ActiveState {
            transport: Arc::new(transport),
            unicast_v4,
            unicast_v6,
            max_payload: MAX_PACKET_SIZE - IP_UDP_OVERHEAD,
        });

        let weak = Arc::downgrade(&self.inner);
        self.inner.monitor.subscribe(move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                inner.on_interfaces_changed(snapshot);
            }
        });

        info!(
            "mDNS service started on {} interface(s)",
            snapshot.interfaces.len()
        );
        if !snapshot.added.is_empty() {
            self.inner.interfaces_discovered.emit(&snapshot.added);
        }
        Ok(())
    }

    /// Stop receiving, release the sockets, and drop all subscriptions.
    /// The service can be started again afterwards.
    pub async fn stop(&self) {
        self.inner.monitor.unsubscribe();
        let state = self.inner.active.lock().unwrap().take();
        if let Some(state) = state {
            state.transport.dispose().await;
        }
        self.inner.query_received.clear();
        self.inner.answer_received.clear();
        self.inner.malformed_message.clear();
        self.inner.interfaces_discovered.clear();
        debug!("mDNS service stopped");
    }

    /// Register a callback for inbound queries.
    pub fn on_query(
        &self,
        callback: impl Fn(&ReceivedMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.query_received.subscribe(callback)
    }

    /// Register a callback for inbound answers.
    pub fn on_answer(
        &self,
        callback: impl Fn(&ReceivedMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.answer_received.subscribe(callback)
    }

    /// Register a callback for inbound packets that failed to decode.
    pub fn on_malformed(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Subscription {
        self.inner
            .malformed_message
            .subscribe(move |bytes: &Vec<u8>| callback(bytes))
    }

    /// Register a callback for newly discovered interfaces.
    pub fn on_interfaces_discovered(
        &self,
        callback: impl Fn(&[InterfaceInfo]) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .interfaces_discovered
            .subscribe(move |nics: &Vec<InterfaceInfo>| callback(nics))
    }

    /// Send a query message to the mDNS groups.
    pub async fn send_query(&self, mut message: DnsMessage) -> Result<()> {
        self.inner.apply_ttl_policy(&mut message, false);
        let bytes = encode(&message);
        let (transport, max_payload) = self.inner.transport()?;
        if bytes.len() > max_payload {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                max: max_payload,
            });
        }
        trace!("sending {}", message.summary());
        transport.send(&bytes).await;
        Ok(())
    }

    /// Query for records of `name`.
    pub async fn query(&self, name: &str, qtype: RecordType) -> Result<()> {
        self.send_query(question_message(name, qtype, false)).await
    }

    /// Query for records of `name`, asking for a unicast reply (QU bit).
    pub async fn unicast_query(&self, name: &str, qtype: RecordType) -> Result<()> {
        self.send_query(question_message(name, qtype, true)).await
    }

    /// Send `request` and wait for the first answer message whose Answer
    /// section covers every question name in the request.
    ///
    /// No timeout is enforced here; cancel via `cancel` to give up.
    pub async fn resolve(
        &self,
        request: DnsMessage,
        cancel: CancellationToken,
    ) -> Result<DnsMessage> {
        let names: Vec<String> = request
            .questions
            .iter()
            .map(|question| question.name.clone())
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = self.on_answer(move |event| {
            let message = &event.message;
            let covered = names.iter().all(|name| {
                message
                    .answers
                    .iter()
                    .any(|answer| names_equal(&answer.name, name))
            });
            if covered {
                let _ = tx.send(message.clone());
            }
        });

        self.send_query(request).await?;

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            message = rx.recv() => message.ok_or(Error::Cancelled),
        }
    }

    /// Send an answer message.
    ///
    /// The message is normalized for mDNS (QR=1, AA=1, id=0, standard
    /// opcode, RA/AD/CD cleared, questions removed), record TTLs are
    /// rewritten per policy, and the result is truncated to the maximum
    /// payload with the TC flag set if records were dropped.
    ///
    /// With `check_duplicate`, a byte-identical answer sent within the
    /// last second is suppressed. With a `unicast` endpoint (and unicast
    /// answers enabled), the answer goes to that peer instead of the
    /// groups.
    pub async fn send_answer(
        &self,
        mut answer: DnsMessage,
        check_duplicate: bool,
        unicast: Option<SocketAddr>,
    ) -> Result<()> {
        normalize_answer(&mut answer);
        self.inner.apply_ttl_policy(&mut answer, false);
        self.inner
            .send_response(answer, check_duplicate, unicast)
            .await
    }

    /// Send an answer for a received query.
    ///
    /// A legacy unicast query (source port other than 5353) gets a unicast
    /// reply to its source mirroring the query's transaction id and
    /// questions, with TTLs clamped to 10 seconds. Any other query is
    /// answered like [`MulticastService::send_answer`], with `unicast`
    /// passed through — hand it `query.remote` to honor a QU question with
    /// a unicast reply.
    pub async fn send_answer_to(
        &self,
        mut answer: DnsMessage,
        query: &ReceivedMessage,
        check_duplicate: bool,
        unicast: Option<SocketAddr>,
    ) -> Result<()> {
        if !query.is_legacy_unicast() {
            return self.send_answer(answer, check_duplicate, unicast).await;
        }

        normalize_answer(&mut answer);
        answer.id = query.message.id;
        answer.questions = query.message.questions.clone();
        self.inner.apply_ttl_policy(&mut answer, true);
        self.inner
            .send_response(answer, check_duplicate, Some(query.remote))
            .await
    }
}

impl ServiceInner {
    fn transport(&self) -> Result<(Arc<MulticastTransport>, usize)> {
        let active = self.active.lock().unwrap();
        let state = active.as_ref().ok_or(Error::NotStarted)?;
        Ok((Arc::clone(&state.transport), state.max_payload))
    }

    fn build_transport(self: &Arc<Self>, nics: &[InterfaceInfo]) -> Result<MulticastTransport> {
        let weak = Arc::downgrade(self);
        let handler: PacketHandler = Arc::new(move |remote, bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_datagram(remote, bytes);
            }
        });
        let options = TransportOptions {
            use_ipv4: self.config.use_ipv4,
            use_ipv6: self.config.use_ipv6,
            scope_selector: Arc::clone(&self.config.scope_selector),
        };
        MulticastTransport::bind(nics, &options, handler)
    }

    /// Replace the transport after an interface change.
    fn on_interfaces_changed(self: Arc<Self>, snapshot: InterfaceSnapshot) {
        if !snapshot.changed() {
            return;
        }

        match self.build_transport(&snapshot.interfaces) {
            Ok(transport) => {
                let mut active = self.active.lock().unwrap();
                let Some(state) = active.as_mut() else {
                    // Stopped while the snapshot was taken.
                    return;
                };
                info!(
                    added = snapshot.added.len(),
                    removed = snapshot.removed.len(),
                    "interfaces changed, rebuilt transport"
                );
                state.transport = Arc::new(transport);
            }
            Err(err) => {
                warn!("transport rebuild failed: {}", err);
                return;
            }
        }

        if !snapshot.added.is_empty() {
            self.interfaces_discovered.emit(&snapshot.added);
        }
    }

    /// Inbound pipeline: duplicate filter, decode, opcode/rcode filter,
    /// dispatch.
    fn handle_datagram(&self, remote: SocketAddr, bytes: &[u8]) {
        if self.config.ignore_duplicate_messages && !self.recent_inbound.try_add(bytes) {
            trace!("dropping duplicate packet from {}", remote);
            return;
        }

        let message = match decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                debug!("undecodable packet from {}: {}", remote, err);
                self.malformed_message.emit(&bytes.to_vec());
                return;
            }
        };

        // RFC 6762 section 18.3 and 18.11: anything but a standard query
        // with NoError is silently ignored.
        if message.opcode() != 0 || message.rcode() != 0 {
            trace!(
                "ignoring packet from {} (opcode {}, rcode {})",
                remote,
                message.opcode(),
                message.rcode()
            );
            return;
        }

        trace!("{} from {}", message.summary(), remote);
        let event = ReceivedMessage { message, remote };
        if event.message.is_query() && !event.message.questions.is_empty() {
            self.query_received.emit(&event);
        } else if event.message.is_response() && !event.message.answers.is_empty() {
            self.answer_received.emit(&event);
        }
    }

    /// Rewrite record TTLs per sending policy. Host records get the short
    /// TTL, everything else the long one; zero TTLs (goodbyes) are kept.
    /// Legacy answers are clamped to 10 seconds.
    fn apply_ttl_policy(&self, message: &mut DnsMessage, legacy: bool) {
        for record in message.records_mut() {
            if record.ttl == 0 {
                continue;
            }
            record.ttl = if record.rtype().is_host_record() {
                self.config.host_record_ttl
            } else {
                self.config.non_host_ttl
            };
            if legacy {
                record.ttl = record.ttl.min(LEGACY_TTL_CAP_SECS);
            }
        }
    }

    async fn send_response(
        &self,
        answer: DnsMessage,
        check_duplicate: bool,
        unicast: Option<SocketAddr>,
    ) -> Result<()> {
        let (transport, unicast_v4, unicast_v6, max_payload) = {
            let active = self.active.lock().unwrap();
            let state = active.as_ref().ok_or(Error::NotStarted)?;
            (
                Arc::clone(&state.transport),
                state.unicast_v4.clone(),
                state.unicast_v6.clone(),
                state.max_payload,
            )
        };

        let (bytes, truncated) = encode_truncated(&answer, max_payload)?;
        if truncated {
            debug!("answer truncated to {} bytes", bytes.len());
        }

        if check_duplicate && !self.recent_outbound.try_add(&bytes) {
            trace!("suppressing recently sent answer");
            return Ok(());
        }

        let unicast = unicast.filter(|_| self.config.enable_unicast_answers);
        match unicast {
            Some(endpoint) => {
                let socket = if endpoint.is_ipv4() {
                    unicast_v4
                } else {
                    unicast_v6
                };
                match socket {
                    Some(socket) => {
                        if let Err(err) = socket.send_to(&bytes, endpoint).await {
                            warn!("unicast answer to {} failed: {}", endpoint, err);
                        }
                    }
                    None => {
                        warn!("no unicast socket for {}, sending multicast", endpoint);
                        transport.send(&bytes).await;
                    }
                }
            }
            None => transport.send(&bytes).await,
        }
        Ok(())
    }
}

/// Normalize a message into an mDNS answer: authoritative response with a
/// zero transaction id, standard opcode, cleared RA/AD/CD, and no
/// questions.
fn normalize_answer(message: &mut DnsMessage) {
    message.set_response(true);
    message.set_authoritative(true);
    message.set_opcode(0);
    message.set_recursion_available(false);
    message.set_authentic_data(false);
    message.set_checking_disabled(false);
    message.id = 0;
    message.questions.clear();
}

fn question_message(name: &str, qtype: RecordType, unicast_response: bool) -> DnsMessage {
    let mut message = DnsMessage::new_query();
    message.questions.push(Question {
        name: name.to_string(),
        qtype,
        class: CLASS_IN,
        unicast_response,
    });
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::records::RData;
    use crate::dns::message::ResourceRecord;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn service() -> MulticastService {
        MulticastService::new(MdnsConfig::default())
    }

    fn query_packet(name: &str) -> Vec<u8> {
        encode(&question_message(name, RecordType::PTR, false))
    }

    fn response_packet(name: &str) -> Vec<u8> {
        let mut message = DnsMessage::new_response();
        message.set_authoritative(true);
        message.answers.push(ResourceRecord::new(
            name,
            120,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ));
        encode(&message)
    }

    fn remote(port: u16) -> SocketAddr {
        SocketAddr::new(Ipv4Addr::new(192, 0, 2, 99).into(), port)
    }

    #[test]
    fn test_query_dispatch_and_legacy_detection() {
        let service = service();
        let events: Arc<Mutex<Vec<ReceivedMessage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = service.on_query(move |event| sink.lock().unwrap().push(event.clone()));

        service
            .inner
            .handle_datagram(remote(53000), &query_packet("_http._tcp.local"));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].remote, remote(53000));
        assert!(events[0].is_legacy_unicast());
        assert_eq!(events[0].message.questions[0].name, "_http._tcp.local");
    }

    #[test]
    fn test_query_from_mdns_port_is_not_legacy() {
        let event = ReceivedMessage {
            message: DnsMessage::new_query(),
            remote: remote(MDNS_PORT),
        };
        assert!(!event.is_legacy_unicast());
    }

    #[test]
    fn test_answer_dispatch() {
        let service = service();
        let count = Arc::new(AtomicUsize::new(0));
        let queries = Arc::clone(&count);
        let _q = service.on_query(move |_| {
            queries.fetch_add(100, Ordering::SeqCst);
        });
        let answers = Arc::clone(&count);
        let _a = service.on_answer(move |_| {
            answers.fetch_add(1, Ordering::SeqCst);
        });

        service
            .inner
            .handle_datagram(remote(5353), &response_packet("host.local"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_sections_do_not_dispatch() {
        let service = service();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let _q = service.on_query(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _a = service.on_answer(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        // A query without questions and a response without answers.
        service
            .inner
            .handle_datagram(remote(5353), &encode(&DnsMessage::new_query()));
        service
            .inner
            .handle_datagram(remote(5353), &encode(&DnsMessage::new_response()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_query_opcode_is_dropped() {
        let service = service();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = service.on_query(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let mut message = question_message("host.local", RecordType::ANY, false);
        message.set_opcode(2);
        service.inner.handle_datagram(remote(5353), &encode(&message));

        let mut message = question_message("host.local", RecordType::ANY, false);
        message.set_rcode(3);
        service.inner.handle_datagram(remote(5353), &encode(&message));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_packet_emits_event_once() {
        let service = service();
        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = service.on_malformed(move |bytes| sink.lock().unwrap().push(bytes.to_vec()));

        service.inner.handle_datagram(remote(5353), &[0x01, 0x02, 0x03]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_duplicate_packets_dispatch_once() {
        let service = service();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = service.on_query(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let packet = query_packet("host.local");
        service.inner.handle_datagram(remote(5353), &packet);
        service.inner.handle_datagram(remote(5353), &packet);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_suppression_can_be_disabled() {
        let service = MulticastService::new(MdnsConfig::default().with_ignore_duplicates(false));
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let _sub = service.on_query(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let packet = query_packet("host.local");
        service.inner.handle_datagram(remote(5353), &packet);
        service.inner.handle_datagram(remote(5353), &packet);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ttl_policy() {
        let service = service();
        let mut message = DnsMessage::new_response();
        message
            .answers
            .push(ResourceRecord::new("a.local", 3000, RData::A(Ipv4Addr::LOCALHOST)));
        message.answers.push(ResourceRecord::new(
            "a.local",
            3000,
            RData::Txt(vec![b"k=v".to_vec()]),
        ));
        // Goodbye record keeps its zero TTL.
        message
            .additionals
            .push(ResourceRecord::new("a.local", 0, RData::A(Ipv4Addr::LOCALHOST)));

        service.inner.apply_ttl_policy(&mut message, false);
        assert_eq!(message.answers[0].ttl, 120);
        assert_eq!(message.answers[1].ttl, 4500);
        assert_eq!(message.additionals[0].ttl, 0);

        service.inner.apply_ttl_policy(&mut message, true);
        assert_eq!(message.answers[0].ttl, 10);
        assert_eq!(message.answers[1].ttl, 10);
        assert_eq!(message.additionals[0].ttl, 0);
    }

    #[test]
    fn test_normalize_answer() {
        let mut message = DnsMessage::new_query();
        message.id = 0x1234;
        message.set_opcode(1);
        message.set_recursion_available(true);
        message.set_authentic_data(true);
        message.set_checking_disabled(true);
        message
            .questions
            .push(Question::new("host.local", RecordType::ANY));

        normalize_answer(&mut message);
        assert!(message.is_response());
        assert!(message.is_authoritative());
        assert_eq!(message.id, 0);
        assert_eq!(message.opcode(), 0);
        assert!(!message.recursion_available());
        assert!(!message.authentic_data());
        assert!(!message.checking_disabled());
        assert!(message.questions.is_empty());
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let service = service();
        assert!(matches!(
            service.query("host.local", RecordType::ANY).await,
            Err(Error::NotStarted)
        ));
        assert!(matches!(
            service
                .send_answer(DnsMessage::new_response(), true, None)
                .await,
            Err(Error::NotStarted)
        ));
        assert!(matches!(
            service
                .resolve(
                    question_message("host.local", RecordType::ANY, false),
                    CancellationToken::new()
                )
                .await,
            Err(Error::NotStarted)
        ));
    }

    // The tests below need real sockets; they bail out quietly where the
    // environment does not allow them.

    #[tokio::test]
    async fn test_start_is_idempotent_and_restartable() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }
        service.start().await.unwrap();
        service.stop().await;
        if service.start().await.is_err() {
            return;
        }
        service.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_subscriptions() {
        let service = service();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        service
            .on_query(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .forget();

        service.stop().await;
        service
            .inner
            .handle_datagram(remote(5353), &query_packet("host.local"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_query_too_large() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }

        let mut message = DnsMessage::new_query();
        message.answers.push(ResourceRecord::new(
            "big.local",
            120,
            RData::Unknown {
                rtype: 2873,
                data: vec![0u8; 9000],
            },
        ));
        assert!(matches!(
            service.send_query(message).await,
            Err(Error::MessageTooLarge { .. })
        ));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_legacy_answer_mirrors_query() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }

        // A legacy querier on an ephemeral port.
        let querier = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut query = question_message("_http._tcp.local", RecordType::PTR, true);
        query.id = 0x1234;
        let query = ReceivedMessage {
            message: query,
            remote: querier.local_addr().unwrap(),
        };
        assert!(query.is_legacy_unicast());

        let mut answer = DnsMessage::new_response();
        answer.answers.push(ResourceRecord::new(
            "_http._tcp.local",
            4500,
            RData::Ptr("web._http._tcp.local".to_string()),
        ));
        service
            .send_answer_to(answer, &query, true, None)
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), querier.recv_from(&mut buf))
            .await
            .expect("no unicast answer arrived")
            .unwrap();
        let received = decode(&buf[..len]).unwrap();

        assert!(received.is_response());
        assert!(received.is_authoritative());
        assert_eq!(received.id, 0x1234);
        assert_eq!(received.questions, query.message.questions);
        assert!(received.answers.iter().all(|record| record.ttl <= 10));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_qu_question_answered_unicast_via_endpoint() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }

        // A modern querier on port 5353 that set the QU bit; the caller
        // routes the reply unicast by passing the query's source endpoint.
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut query = question_message("host.local", RecordType::A, true);
        query.id = 0x0042;
        let query = ReceivedMessage {
            message: query,
            remote: SocketAddr::new(
                listener.local_addr().unwrap().ip(),
                MDNS_PORT,
            ),
        };
        assert!(!query.is_legacy_unicast());
        assert!(query.message.questions[0].unicast_response);

        let mut answer = DnsMessage::new_response();
        answer.answers.push(ResourceRecord::new(
            "host.local",
            120,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ));
        service
            .send_answer_to(answer, &query, true, Some(listener.local_addr().unwrap()))
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .expect("no unicast answer arrived")
            .unwrap();
        let received = decode(&buf[..len]).unwrap();

        // Non-legacy answers are fully normalized, not mirrored.
        assert!(received.is_response());
        assert_eq!(received.id, 0);
        assert!(received.questions.is_empty());
        assert_eq!(received.answers[0].ttl, 120);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_large_answer_is_truncated_not_rejected() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }

        let querier = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let query = ReceivedMessage {
            message: question_message("big.local", RecordType::TXT, false),
            remote: querier.local_addr().unwrap(),
        };

        let mut answer = DnsMessage::new_response();
        for i in 0..80 {
            answer.answers.push(ResourceRecord::new(
                format!("r{}.big.local", i),
                4500,
                RData::Txt(vec![vec![b'x'; 150]]),
            ));
        }
        service
            .send_answer_to(answer, &query, false, None)
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, _) = timeout(Duration::from_secs(2), querier.recv_from(&mut buf))
            .await
            .expect("no unicast answer arrived")
            .unwrap();
        assert!(len <= MAX_PACKET_SIZE - IP_UDP_OVERHEAD);
        let received = decode(&buf[..len]).unwrap();
        assert!(received.is_truncated());
        assert!(received.answers.len() < 80);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_outbound_duplicate_answer_suppressed() {
        let service = service();
        if service.start().await.is_err() {
            return;
        }

        let querier = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut query = question_message("host.local", RecordType::A, false);
        query.id = 7;
        let query = ReceivedMessage {
            message: query,
            remote: querier.local_addr().unwrap(),
        };

        let mut answer = DnsMessage::new_response();
        answer.answers.push(ResourceRecord::new(
            "host.local",
            120,
            RData::A(Ipv4Addr::new(192, 0, 2, 10)),
        ));

        service
            .send_answer_to(answer.clone(), &query, true, None)
            .await
            .unwrap();
        service
            .send_answer_to(answer.clone(), &query, true, None)
            .await
            .unwrap();

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        timeout(Duration::from_secs(2), querier.recv_from(&mut buf))
            .await
            .expect("first answer should arrive")
            .unwrap();
        // The identical re-send within the window was suppressed.
        assert!(
            timeout(Duration::from_millis(300), querier.recv_from(&mut buf))
                .await
                .is_err()
        );

        // Disabling the check lets the same bytes out again.
        service
            .send_answer_to(answer, &query, false, None)
            .await
            .unwrap();
        timeout(Duration::from_secs(2), querier.recv_from(&mut buf))
            .await
            .expect("unchecked re-send should arrive")
            .unwrap();
        service.stop().await;
    }

    #[tokio::test]
    async fn test_resolve_completes_on_matching_answer() {
        let service = Arc::new(service());
        if service.start().await.is_err() {
            return;
        }

        let request = question_message("x.local", RecordType::ANY, false);
        let token = CancellationToken::new();
        let resolver = {
            let service = Arc::clone(&service);
            let token = token.clone();
            tokio::spawn(async move { service.resolve(request, token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // An answer for an unrelated name does not complete the resolve.
        service
            .inner
            .handle_datagram(remote(5353), &response_packet("other.local"));
        // The matching one does.
        service
            .inner
            .handle_datagram(remote(5353), &response_packet("x.local"));

        let resolved = timeout(Duration::from_secs(2), resolver)
            .await
            .expect("resolve should complete")
            .unwrap()
            .unwrap();
        assert!(resolved
            .answers
            .iter()
            .any(|record| names_equal(&record.name, "x.local")));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_resolve_cancelled() {
        let service = Arc::new(service());
        if service.start().await.is_err() {
            return;
        }

        let request = question_message("x.local", RecordType::ANY, false);
        let token = CancellationToken::new();
        let resolver = {
            let service = Arc::clone(&service);
            let token = token.clone();
            tokio::spawn(async move { service.resolve(request, token).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = timeout(Duration::from_secs(2), resolver)
            .await
            .expect("cancelled resolve should return")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        service.stop().await;
    }
}
