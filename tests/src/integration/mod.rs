//! Integration scenarios.

pub mod http;
pub mod protocol;
pub mod sqlite;

use nubo_sync::test_utils::{
    decode_response, encode_request, error_code, init_params, params, TestHarness, TEST_PASSWORD,
};
use nubo_sync::{RequestEnvelope, ResponseMap, SyncApi};
use rmpv::Value;

/// Sends `cmd` with the current credential and swaps in the renewed one.
pub fn call_api(api: &dyn SyncApi, auth: &mut Value, cmd: &str, params: Value) -> ResponseMap {
    let envelope = RequestEnvelope::new(cmd)
        .with_auth(auth.clone())
        .with_params(params);
    let response = decode_response(&api.process(&encode_request(&envelope)));
    if let Some(renewed) = response.get("auth") {
        *auth = renewed.clone();
    }
    response
}

pub fn call(harness: &TestHarness, auth: &mut Value, cmd: &str, params: Value) -> ResponseMap {
    call_api(&harness.dispatcher, auth, cmd, params)
}

/// Runs `init` with the test password and returns the credential.
pub fn init_api(api: &dyn SyncApi, computer: &str) -> Value {
    let envelope =
        RequestEnvelope::new("init").with_params(init_params(TEST_PASSWORD, computer, "host"));
    let response = decode_response(&api.process(&encode_request(&envelope)));
    assert_ok(&response);
    response.get("auth").cloned().expect("init returned auth")
}

pub fn put_params(name: &str, hash: &str, mtime: i64, content: Option<&[u8]>) -> Value {
    let mut entries = vec![
        ("name", Value::from(name)),
        ("hash", Value::from(hash)),
        ("mtime", Value::from(mtime)),
    ];
    if let Some(content) = content {
        entries.push(("content", Value::Binary(content.to_vec())));
    }
    params(entries)
}

pub fn name_params(name: &str) -> Value {
    params(vec![("name", Value::from(name))])
}

/// Panics with the response when it carries an error.
pub fn assert_ok(response: &ResponseMap) {
    assert_eq!(error_code(response), None, "unexpected error: {response:?}");
}
