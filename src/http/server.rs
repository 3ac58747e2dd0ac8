//! Proxy server: accept loop, rule reloads and graceful drain.
//!
//! # Responsibilities
//! - Accept client connections under the connection limit
//! - Spawn one dispatcher task per connection, inside a tracing span
//! - Swap the routing rule snapshot when the config watcher reports a change
//! - Stop accepting on shutdown and wait for live connections to finish

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::http::dispatcher::{log_connection_error, Collaborators, DispatchLimits, Dispatcher};
use crate::net::connection::{ClientConnection, ConnectionTracker};
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;
use crate::routing::{LocalAddressClassifier, RoutingRuleSet};

/// The local proxy endpoint browsers are pointed at.
pub struct ProxyServer {
    config: ProxyConfig,
    rules: Arc<ArcSwap<RoutingRuleSet>>,
    classifier: Arc<LocalAddressClassifier>,
    collaborators: Collaborators,
    tracker: ConnectionTracker,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, collaborators: Collaborators) -> Self {
        let rules = Arc::new(ArcSwap::from_pointee(RoutingRuleSet::from_config(&config.routing)));
        Self {
            config,
            rules,
            classifier: Arc::new(LocalAddressClassifier::new()),
            collaborators,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the local-address classifier (tests use a fixed name set).
    pub fn with_classifier(mut self, classifier: LocalAddressClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Shared handle to the current routing rules.
    pub fn rules(&self) -> Arc<ArcSwap<RoutingRuleSet>> {
        Arc::clone(&self.rules)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Configs arriving on `config_updates` replace the routing rules for
    /// connections accepted afterwards.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let listener = Listener::from_tcp(listener, self.config.listener.max_connections);
        let limits = DispatchLimits::from_config(&self.config.limits, self.config.timeouts.idle_secs);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(ListenerError::Accept(e)) => {
                            tracing::warn!(error = %e, "Accept failed");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    metrics::record_connection();

                    let dispatcher = Dispatcher::new(
                        self.rules.load_full(),
                        Arc::clone(&self.classifier),
                        self.collaborators.clone(),
                        limits.clone(),
                    );
                    let guard = self.tracker.track();
                    let span = tracing::info_span!("connection", connection_id = %guard.id(), peer = %peer);

                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            let _guard = guard;
                            if let Err(e) = dispatcher.serve(ClientConnection::new(stream)).await {
                                log_connection_error(&e);
                            }
                        }
                        .instrument(span),
                    );
                }
                Some(update) = config_updates.recv() => {
                    self.rules.store(Arc::new(RoutingRuleSet::from_config(&update.routing)));
                    tracing::info!("Routing rules updated");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        let remaining = self
            .tracker
            .wait_for_drain(Duration::from_secs(self.config.timeouts.shutdown_secs))
            .await;
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown deadline reached with open connections");
        } else {
            tracing::info!("All connections drained");
        }
        Ok(())
    }
}
