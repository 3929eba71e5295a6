//! The request pipeline: decode, resolve, authenticate, execute, encode.
//!
//! Every failure is caught here and turned into response fields, so a
//! request always produces an encoded envelope. Fragments are combined with
//! first-write-wins: once refresh has put a renewed credential under `auth`,
//! neither the handler's result nor an error can displace it.

use crate::adapters::MsgpackCodec;
use crate::domain::envelope::{ResponseMap, KEY_AUTH};
use crate::domain::error::{NuboError, NuboResult};
use crate::handlers::CommandContext;
use crate::middleware::SyncMetrics;
use crate::ports::inbound::SyncApi;
use crate::ports::outbound::{
    ArchiveStorage, CredentialManager, EnvelopeCodec, StoreProvider, SyncStore,
};
use crate::registry::CommandRegistry;
use rmpv::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Store handle scoped to one request. Closed on drop if not released.
struct StoreSession {
    store: Box<dyn SyncStore>,
}

impl StoreSession {
    fn open(provider: &dyn StoreProvider) -> NuboResult<Self> {
        let store = provider.open().map_err(|e| {
            error!(error = %e, "Cannot open store");
            NuboError::database()
        })?;
        Ok(Self { store })
    }

    fn store(&mut self) -> &mut dyn SyncStore {
        self.store.as_mut()
    }

    fn release(mut self) {
        self.store.close();
    }
}

impl Drop for StoreSession {
    fn drop(&mut self) {
        if !self.store.is_closed() {
            self.store.close();
        }
    }
}

/// Runs requests against the command registry.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    codec: Arc<dyn EnvelopeCodec>,
    stores: Arc<dyn StoreProvider>,
    archives: Arc<dyn ArchiveStorage>,
    credentials: Arc<dyn CredentialManager>,
    metrics: Arc<SyncMetrics>,
}

impl Dispatcher {
    /// Standard commands, MessagePack codec, fresh metrics.
    pub fn new(
        stores: Arc<dyn StoreProvider>,
        archives: Arc<dyn ArchiveStorage>,
        credentials: Arc<dyn CredentialManager>,
    ) -> Self {
        Self {
            registry: CommandRegistry::standard(),
            codec: Arc::new(MsgpackCodec::new()),
            stores,
            archives,
            credentials,
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    pub fn with_registry(mut self, registry: Arc<CommandRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Processes one request body into the response fields.
    pub fn handle(&self, body: &[u8]) -> ResponseMap {
        let started = Instant::now();
        let mut response = ResponseMap::new();

        let outcome = self.run(body, &mut response);
        let error_code = outcome.as_ref().err().map(|e| e.code);
        if let Err(err) = outcome {
            response.merge(err.to_fields());
        }

        self.metrics
            .record_request(error_code, started.elapsed().as_millis() as u64);
        response
    }

    fn run(&self, body: &[u8], response: &mut ResponseMap) -> NuboResult<()> {
        let envelope = self.codec.decode_request(body).map_err(|e| {
            debug!(error = %e, "Rejected request envelope");
            NuboError::from(e)
        })?;

        let entry = self.registry.resolve(&envelope.cmd).ok_or_else(|| {
            debug!(cmd = %envelope.cmd, "Unknown command");
            NuboError::bad_command()
        })?;

        let credential = match (entry.requires_auth, envelope.auth.as_ref()) {
            (true, None) => {
                debug!(cmd = entry.name, "Protected command without credential");
                return Err(NuboError::forbidden());
            }
            (true, Some(auth)) => Some(auth),
            (false, _) => None,
        };

        let mut session = StoreSession::open(self.stores.as_ref())?;

        if let Some(credential) = credential {
            let renewed = self
                .credentials
                .refresh(session.store(), credential)
                .map_err(|e| {
                    warn!(cmd = entry.name, reason = %e, "Credential rejected");
                    NuboError::from(e)
                })?;
            response.insert_if_absent(KEY_AUTH, renewed);
            self.metrics.record_renewal();
        }

        debug!(cmd = entry.name, "Executing command");
        let result = {
            let mut ctx = CommandContext {
                store: session.store(),
                archives: self.archives.as_ref(),
                credentials: self.credentials.as_ref(),
            };
            // A panicking handler still answers with the renewed credential.
            panic::catch_unwind(AssertUnwindSafe(|| {
                (entry.handler)(&mut ctx, envelope.params.as_ref())
            }))
            .unwrap_or_else(|payload| {
                error!(
                    cmd = entry.name,
                    panic = panic_message(payload.as_ref()),
                    "Command handler panicked"
                );
                self.metrics.record_worker_failure();
                Err(NuboError::internal())
            })
        };
        session.release();

        response.merge(result?);
        Ok(())
    }

    fn encode(&self, response: ResponseMap) -> Vec<u8> {
        match self.codec.encode(&response.into_value()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Cannot encode response");
                self.error_body(&NuboError::internal())
            }
        }
    }
}

impl SyncApi for Dispatcher {
    fn process(&self, body: &[u8]) -> Vec<u8> {
        let response = self.handle(body);
        self.encode(response)
    }

    fn error_body(&self, error: &NuboError) -> Vec<u8> {
        let fields = error.to_fields().into_value();
        self.codec.encode(&fields).unwrap_or_else(|e| {
            // A flat map of scalars; only a broken codec gets here.
            error!(error = %e, "Cannot encode error envelope");
            encode_code_only(error)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// `{"error": <code>}` written by hand.
fn encode_code_only(error: &NuboError) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    let value = Value::Map(vec![(
        Value::from("error"),
        Value::from(error.code.code()),
    )]);
    if rmpv::encode::write_value(&mut out, &value).is_err() {
        out.clear();
    }
    out
}
