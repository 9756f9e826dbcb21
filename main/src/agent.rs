use crate::candidate::Candidate;
use crate::candidate::CandidateFactory;
use crate::config::AgentConfig;
use crate::config::ConfigError;
use crate::enumerator::InterfaceEnumerator;
use crate::event::CandidateEvent;
use crate::event::CandidateEventBus;
use crate::event::CandidateStream;
use crate::id::IdGenerator;
use crate::id::UuidGenerator;
use crate::nat::ExternalIpMap;
use crate::nat::Nat1To1Translator;
use crate::network::NetworkType;
use crate::port::ListenError;
use crate::port::PortRangeAllocator;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
    Failed(GatherError),
}

/// Terminal error of a gathering pass.
#[derive(Error, Debug, Clone)]
pub enum GatherError {
    #[error("Failed to enumerate local network interfaces")]
    Interfaces(#[source] Arc<std::io::Error>),

    #[error("Failed to allocate a UDP socket")]
    Listen(#[from] ListenError),

    #[error("Failed to inspect a bound socket")]
    Socket(#[source] Arc<std::io::Error>),
}

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Agent is closed")]
    Closed,

    #[error("Candidate gathering is already in progress")]
    AlreadyGathering,

    #[error("Trickle mode requires a candidate subscriber before gathering")]
    NoSubscriber,

    #[error("Candidate gathering failed")]
    Gather(#[from] GatherError),
}

/// Gathers local candidates in the background and hands them out to subscribers.
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    network_types: Vec<NetworkType>,
    enumerator: InterfaceEnumerator,
    allocator: PortRangeAllocator,
    translator: Nat1To1Translator,
    factory: CandidateFactory,
    port_min: u16,
    port_max: u16,
    trickle: bool,
    log_target: Arc<str>,
    candidates: RwLock<Vec<Candidate>>,
    events: CandidateEventBus,
    state: watch::Sender<GatheringState>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, ConfigError> {
        Self::with_id_generator(config, Box::new(UuidGenerator))
    }

    pub fn with_id_generator(
        config: AgentConfig,
        id_generator: Box<dyn IdGenerator + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        let translator = config.validate()?;
        let log_target: Arc<str> = config.log_target.as_str().into();
        log::debug!(target: &*log_target, "Creating agent with {:?}", config);

        let (state, _) = watch::channel(GatheringState::New);
        let inner = AgentInner {
            network_types: config.effective_network_types(),
            enumerator: InterfaceEnumerator::new(
                config.network.clone(),
                config.interface_filter.clone(),
                log_target.clone(),
            ),
            allocator: PortRangeAllocator::new(config.network.clone(), log_target.clone()),
            translator,
            factory: CandidateFactory::new(id_generator),
            port_min: config.port_min,
            port_max: config.port_max,
            trickle: config.trickle,
            log_target,
            candidates: Default::default(),
            events: Default::default(),
            state,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Starts a gathering pass on a background task and returns immediately.
    ///
    /// Must be called within a Tokio runtime.
    pub fn gather_candidates(&self) -> Result<(), AgentError> {
        self.ensure_open()?;
        if self.inner.trickle && self.inner.events.subscriber_count() == 0 {
            return Err(AgentError::NoSubscriber);
        }

        let mut started = false;
        self.inner.state.send_if_modified(|state| {
            if let GatheringState::Gathering = state {
                return false;
            }
            *state = GatheringState::Gathering;
            started = true;
            true
        });
        if !started {
            return Err(AgentError::AlreadyGathering);
        }

        log::info!(target: &*self.inner.log_target, "Gathering candidates");
        tokio::spawn(self.inner.clone().run());
        Ok(())
    }

    pub fn subscribe(&self) -> Result<CandidateStream, AgentError> {
        self.ensure_open()?;
        Ok(self.inner.events.subscribe())
    }

    /// Calls `handler` with every event on a separate task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn on_candidate<F>(&self, mut handler: F) -> Result<(), AgentError>
    where
        F: FnMut(CandidateEvent) + Send + 'static,
    {
        let mut events = self.subscribe()?;
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                handler(event);
            }
        });
        Ok(())
    }

    /// Candidates discovered so far, in discovery order.
    pub fn local_candidates(&self) -> Result<Vec<Candidate>, AgentError> {
        self.ensure_open()?;
        Ok(self
            .inner
            .candidates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    pub fn gathering_state(&self) -> GatheringState {
        self.inner.state.borrow().clone()
    }

    /// Resolves once the current gathering pass ends, with the outcome of that pass.
    ///
    /// Resolves immediately if gathering has never started.
    pub async fn wait_for_gathering(&self) -> Result<(), AgentError> {
        let mut state = self.inner.state.subscribe();
        loop {
            self.ensure_open()?;
            let outcome = match &*state.borrow_and_update() {
                GatheringState::Gathering => None,
                GatheringState::Failed(e) => Some(Err(e.clone().into())),
                GatheringState::New | GatheringState::Complete => Some(Ok(())),
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(AgentError::Closed),
                changed = state.changed() => changed.map_err(|_| AgentError::Closed)?,
            }
        }
    }

    /// Stops gathering and releases every socket.
    ///
    /// Candidates stay inspectable but can no longer send or receive.
    pub fn close(&self) -> Result<(), AgentError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(AgentError::Closed);
        }
        self.inner.shutdown.cancel();

        let released = self
            .inner
            .candidates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.socket().close())
            .count();
        self.inner.events.close();
        log::info!(
            target: &*self.inner.log_target,
            "Agent closed, released {} sockets",
            released
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), AgentError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(AgentError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl AgentInner {
    async fn run(self: Arc<Self>) {
        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                log::debug!(target: &*self.log_target, "Gathering cancelled");
                return;
            }
            outcome = self.gather() => outcome,
        };
        match outcome {
            Ok(()) => {
                log::info!(target: &*self.log_target, "Gathering complete");
                self.finish(GatheringState::Complete, CandidateEvent::Completed);
            }
            Err(e) => {
                log::warn!(target: &*self.log_target, "Gathering failed: {}", e);
                self.finish(GatheringState::Failed(e.clone()), CandidateEvent::Failed(e));
            }
        }
    }

    async fn gather(&self) -> Result<(), GatherError> {
        let addresses = self
            .enumerator
            .local_addresses(&self.network_types)
            .await
            .map_err(|e| GatherError::Interfaces(Arc::new(e)))?;
        let external_ips = if self.translator.is_enabled() {
            let external_ips = self.translator.resolve(&addresses, &self.log_target);
            if external_ips.is_empty() {
                log::warn!(
                    target: &*self.log_target,
                    "1:1 NAT is configured but matches no local address"
                );
            } else {
                log::debug!(
                    target: &*self.log_target,
                    "1:1 NAT covers {} local addresses",
                    external_ips.len()
                );
            }
            external_ips
        } else {
            ExternalIpMap::default()
        };
        if self.network_types.iter().any(|t| t.is_tcp()) {
            log::debug!(
                target: &*self.log_target,
                "Only UDP candidates are gathered, skipping TCP network types"
            );
        }

        // Without trickle, candidates are held back until the pass ends.
        let mut pending = vec![];
        let result = self
            .gather_on(&addresses, &external_ips, &mut pending)
            .await;
        self.commit(pending);
        result
    }

    async fn gather_on(
        &self,
        addresses: &[IpAddr],
        external_ips: &ExternalIpMap,
        pending: &mut Vec<Candidate>,
    ) -> Result<(), GatherError> {
        for &ip in addresses {
            let network_types = self
                .network_types
                .iter()
                .copied()
                .filter(|t| t.is_udp() && t.supports(ip));
            for network_type in network_types {
                let conn = self
                    .allocator
                    .listen_udp(self.port_min, self.port_max, network_type, ip)
                    .await?;
                let external = external_ips
                    .external_ip(ip)
                    .map(|e| (e, self.translator.candidate_type()));
                let candidates = self
                    .factory
                    .build(network_type, conn, external)
                    .map_err(|e| GatherError::Socket(Arc::new(e)))?;
                if self.trickle {
                    self.commit(candidates);
                } else {
                    pending.extend(candidates);
                }
            }
        }
        Ok(())
    }

    /// Records and announces candidates as one step, so a snapshot never runs ahead of
    /// the events.
    fn commit(&self, new_candidates: Vec<Candidate>) {
        if new_candidates.is_empty() {
            return;
        }
        let mut candidates = self
            .candidates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            new_candidates.iter().for_each(|c| {
                c.socket().close();
            });
            return;
        }
        for candidate in new_candidates {
            log::info!(target: &*self.log_target, "Discovered candidate {}", candidate);
            candidates.push(candidate.clone());
            self.events.publish(CandidateEvent::Discovered(candidate));
        }
    }

    fn finish(&self, state: GatheringState, event: CandidateEvent) {
        let _candidates = self
            .candidates
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            return;
        }
        self.events.publish(event);
        self.state.send_replace(state);
    }
}
