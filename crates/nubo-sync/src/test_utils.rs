//! Test fixtures shared by unit tests and the integration test crate.
//!
//! Enabled for `cfg(test)` and by the `test-utils` feature.

use crate::adapters::{InMemoryArchiveStorage, InMemoryStoreProvider, MsgpackCodec};
use crate::credentials::TokenCredentialManager;
use crate::dispatch::Dispatcher;
use crate::domain::credential::PasswordRecord;
use crate::domain::entities::{config_keys, Timestamp};
use crate::domain::envelope::{RequestEnvelope, ResponseMap};
use crate::domain::error::StoreError;
use crate::ports::inbound::SyncApi;
use crate::ports::outbound::{EnvelopeCodec, StoreProvider, SyncStore, TimeSource, TokenSource};
use crate::registry::CommandRegistry;
use rmpv::Value;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

pub const TEST_PASSWORD: &str = "correct horse";

/// Few rounds keep tests fast.
pub const TEST_ROUNDS: u32 = 16;

pub const TEST_SALT: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedTimeSource {
    now: AtomicI64,
}

impl FixedTimeSource {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Deterministic, never-repeating tokens: a zero-padded hex counter.
#[derive(Debug, Default)]
pub struct SequenceTokenSource {
    next: AtomicU64,
}

impl TokenSource for SequenceTokenSource {
    fn hex_token(&self, len: usize) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{n:0width$x}", width = len * 2)
    }
}

/// Writes the password record and salt the way `install` does.
pub fn install_password(store: &mut dyn SyncStore, password: &str) -> Result<(), StoreError> {
    let record = PasswordRecord::derive(password, TEST_SALT[..16].to_vec(), TEST_ROUNDS)
        .map_err(|e| StoreError::Query(e.to_string()))?;
    store.set_config_value(config_keys::PASSWORD, record.encode().as_bytes())?;
    store.set_config_value(config_keys::SALT, TEST_SALT)
}

/// Credential manager with a fixed clock and sequential tokens.
pub fn test_credentials() -> TokenCredentialManager {
    TokenCredentialManager::new(
        Arc::new(FixedTimeSource::new(1_700_000_000)),
        Arc::new(SequenceTokenSource::default()),
        16,
    )
}

/// Builds a string-keyed map.
pub fn params(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

pub fn init_params(password: &str, computer: &str, hostname: &str) -> Value {
    params(vec![
        ("password", Value::from(password)),
        ("computer", Value::from(computer)),
        ("hostname", Value::from(hostname)),
    ])
}

pub fn encode_request(envelope: &RequestEnvelope) -> Vec<u8> {
    encode_value(&envelope.to_value())
}

pub fn encode_value(value: &Value) -> Vec<u8> {
    MsgpackCodec.encode(value).expect("encodable value")
}

/// Decodes a response body; panics if it is not a string-keyed map.
pub fn decode_response(body: &[u8]) -> ResponseMap {
    let value = MsgpackCodec.decode(body).expect("decodable response");
    ResponseMap::from_value(value).expect("response is a map")
}

/// The `error` field of a response, if any.
pub fn error_code(response: &ResponseMap) -> Option<i64> {
    response.get("error").and_then(Value::as_i64)
}

/// A dispatcher over in-memory adapters with handles on each of them.
pub struct TestHarness {
    pub dispatcher: Dispatcher,
    pub stores: InMemoryStoreProvider,
    pub archives: Arc<InMemoryArchiveStorage>,
    pub clock: Arc<FixedTimeSource>,
}

impl TestHarness {
    /// Installed store with [`TEST_PASSWORD`] and the standard commands.
    pub fn new() -> Self {
        Self::with_registry(CommandRegistry::standard())
    }

    pub fn with_registry(registry: Arc<CommandRegistry>) -> Self {
        let stores = InMemoryStoreProvider::installed();
        {
            let mut store = stores.open().expect("installed store");
            install_password(store.as_mut(), TEST_PASSWORD).expect("password stored");
            store.close();
        }
        Self::build(stores, registry)
    }

    /// No store installed; every store-backed request fails.
    pub fn uninstalled() -> Self {
        Self::build(InMemoryStoreProvider::new(), CommandRegistry::standard())
    }

    fn build(stores: InMemoryStoreProvider, registry: Arc<CommandRegistry>) -> Self {
        let archives = Arc::new(InMemoryArchiveStorage::new());
        let clock = Arc::new(FixedTimeSource::new(1_700_000_000));
        let credentials = TokenCredentialManager::new(
            Arc::clone(&clock) as Arc<dyn TimeSource>,
            Arc::new(SequenceTokenSource::default()),
            16,
        );
        let dispatcher = Dispatcher::new(
            Arc::new(stores.clone()),
            Arc::clone(&archives) as _,
            Arc::new(credentials),
        )
        .with_registry(registry);
        Self {
            dispatcher,
            stores,
            archives,
            clock,
        }
    }

    pub fn send(&self, envelope: &RequestEnvelope) -> ResponseMap {
        self.send_raw(&encode_request(envelope))
    }

    pub fn send_raw(&self, body: &[u8]) -> ResponseMap {
        decode_response(&self.dispatcher.process(body))
    }

    /// Registers `computer` and returns its first credential.
    pub fn init(&self, computer: &str) -> Value {
        let response = self.send(
            &RequestEnvelope::new("init").with_params(init_params(TEST_PASSWORD, computer, "host")),
        );
        response.get("auth").cloned().expect("init returned auth")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
