//! # Protocol Sessions
//!
//! Multi-request client sessions over the in-memory adapters:
//!
//! 1. **Bootstrap**: `init` with the install password issues the first credential
//! 2. **Rotation**: each request consumes its credential and returns the next
//! 3. **Theft detection**: replaying a consumed credential locks the computer out
//! 4. **File sync**: put / directory / get / delete across credential rotations

#[cfg(test)]
mod tests {
    use super::super::{assert_ok, call, name_params, put_params};
    use nubo_sync::domain::error::codes;
    use nubo_sync::ports::StoreProvider;
    use nubo_sync::test_utils::{
        error_code, init_params, params, TestHarness, TEST_PASSWORD, TEST_SALT,
    };
    use nubo_sync::RequestEnvelope;
    use rmpv::Value;

    // =============================================================================
    // BOOTSTRAP
    // =============================================================================

    #[test]
    fn test_wrong_password_gets_no_credential() {
        let harness = TestHarness::new();
        let response = harness.send(
            &RequestEnvelope::new("init").with_params(init_params("guess", "laptop", "home")),
        );
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));
        assert!(!response.contains_key("auth"));
    }

    #[test]
    fn test_init_ignores_presented_credential() {
        let harness = TestHarness::new();
        let response = harness.send(
            &RequestEnvelope::new("init")
                .with_auth(Value::from("garbage"))
                .with_params(init_params(TEST_PASSWORD, "laptop", "home")),
        );
        assert_eq!(error_code(&response), None);
        assert!(response.get("auth").and_then(Value::as_str).is_some());
    }

    #[test]
    fn test_init_hands_out_salt() {
        let harness = TestHarness::new();
        let mut init = init_params(TEST_PASSWORD, "laptop", "home");
        if let Value::Map(entries) = &mut init {
            entries.push((Value::from("salt"), Value::from(1)));
        }
        let response = harness.send(&RequestEnvelope::new("init").with_params(init));
        assert_eq!(response.get("salt"), Some(&Value::Binary(TEST_SALT.to_vec())));
    }

    #[test]
    fn test_reinit_replaces_registration() {
        let harness = TestHarness::new();
        let mut old = harness.init("laptop");
        let mut new = harness.init("laptop");

        let response = call(&harness, &mut old, "test", Value::Nil);
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));
        assert_ok(&call(&harness, &mut new, "test", Value::Nil));

        let store = harness.stores.open().unwrap();
        assert_eq!(store.list_computers().unwrap().len(), 1);
    }

    // =============================================================================
    // ROTATION AND THEFT DETECTION
    // =============================================================================

    #[test]
    fn test_credential_chain() {
        let harness = TestHarness::new();
        let mut auth = harness.init("laptop");
        let mut seen = vec![auth.clone()];
        for _ in 0..5 {
            assert_ok(&call(&harness, &mut auth, "test", Value::Nil));
            assert!(!seen.contains(&auth));
            seen.push(auth.clone());
        }
    }

    #[test]
    fn test_replay_locks_computer_out() {
        let harness = TestHarness::new();
        let first = harness.init("laptop");
        let mut current = first.clone();
        assert_ok(&call(&harness, &mut current, "test", Value::Nil));

        let mut replayed = first;
        let response = call(&harness, &mut replayed, "directory", Value::Nil);
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));
        assert!(!response.contains_key("auth"));

        // The legitimate holder is locked out too.
        let response = call(&harness, &mut current, "directory", Value::Nil);
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));

        let store = harness.stores.open().unwrap();
        assert!(!store.list_computers().unwrap()[0].authorized);

        // Running init again recovers.
        let mut fresh = harness.init("laptop");
        assert_ok(&call(&harness, &mut fresh, "directory", Value::Nil));
    }

    #[test]
    fn test_computers_are_independent() {
        let harness = TestHarness::new();
        let mut laptop = harness.init("laptop");
        let mut desktop = harness.init("desktop");

        let stale = laptop.clone();
        assert_ok(&call(&harness, &mut laptop, "test", Value::Nil));
        let mut stale = stale;
        call(&harness, &mut stale, "test", Value::Nil);

        assert_ok(&call(&harness, &mut desktop, "test", Value::Nil));
    }

    #[test]
    fn test_access_time_follows_clock() {
        let harness = TestHarness::new();
        let mut auth = harness.init("laptop");
        harness.clock.advance(3_600);
        assert_ok(&call(&harness, &mut auth, "test", Value::Nil));

        let store = harness.stores.open().unwrap();
        assert_eq!(
            store.list_computers().unwrap()[0].atime,
            Some(1_700_000_000 + 3_600)
        );
    }

    #[test]
    fn test_failed_command_still_rotates() {
        let harness = TestHarness::new();
        let mut auth = harness.init("laptop");
        let before = auth.clone();

        let response = call(&harness, &mut auth, "get", name_params("missing"));
        assert_eq!(error_code(&response), Some(codes::STORAGE));
        assert_ne!(auth, before);
        assert_ok(&call(&harness, &mut auth, "test", Value::Nil));
    }

    // =============================================================================
    // FILE SYNC
    // =============================================================================

    #[test]
    fn test_file_lifecycle() {
        let harness = TestHarness::new();
        let mut auth = harness.init("laptop");

        assert_ok(&call(&harness, &mut auth, "put", put_params("docs", "", 10, None)));
        assert_ok(&call(
            &harness,
            &mut auth,
            "put",
            put_params("docs/a.txt", "aaa", 11, Some(b"alpha")),
        ));

        let listing = call(&harness, &mut auth, "directory", Value::Nil);
        let expected = Value::Array(vec![
            params(vec![("f", Value::from("docs")), ("h", Value::from(""))]),
            params(vec![("f", Value::from("docs/a.txt")), ("h", Value::from("aaa"))]),
        ]);
        assert_eq!(listing.get("result"), Some(&expected));

        let fetched = call(&harness, &mut auth, "get", name_params("docs/a.txt"));
        assert_eq!(fetched.get("content"), Some(&Value::Binary(b"alpha".to_vec())));
        assert_eq!(fetched.get("mtime"), Some(&Value::from(11)));

        assert_ok(&call(
            &harness,
            &mut auth,
            "put",
            put_params("docs/a.txt", "bbb", 12, Some(b"beta")),
        ));
        let fetched = call(&harness, &mut auth, "get", name_params("docs/a.txt"));
        assert_eq!(fetched.get("hash"), Some(&Value::from("bbb")));
        assert_eq!(fetched.get("content"), Some(&Value::Binary(b"beta".to_vec())));

        assert_ok(&call(&harness, &mut auth, "delete", name_params("docs/a.txt")));
        let response = call(&harness, &mut auth, "get", name_params("docs/a.txt"));
        assert_eq!(error_code(&response), Some(codes::STORAGE));
        assert_eq!(harness.archives.len(), 0);
        assert_eq!(harness.stores.open_handles(), 0);
    }

    #[test]
    fn test_failed_put_changes_nothing() {
        let harness = TestHarness::new();
        let mut auth = harness.init("laptop");
        harness.archives.set_fail_writes(true);

        let response = call(&harness, &mut auth, "put", put_params("a", "h", 1, Some(b"x")));
        assert_eq!(error_code(&response), Some(codes::STORAGE));
        assert!(response.contains_key("auth"));

        harness.archives.set_fail_writes(false);
        let listing = call(&harness, &mut auth, "directory", Value::Nil);
        assert_eq!(listing.get("result"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn test_binary_keys_are_accepted() {
        let harness = TestHarness::new();
        let auth = harness.init("laptop");
        let envelope = Value::Map(vec![
            (Value::Binary(b"cmd".to_vec()), Value::from("test")),
            (Value::Binary(b"auth".to_vec()), auth),
            (Value::Binary(b"params".to_vec()), Value::from(7)),
        ]);
        let response = harness.send_raw(&nubo_sync::test_utils::encode_value(&envelope));
        assert_eq!(error_code(&response), None);
        assert_eq!(response.get("test"), Some(&Value::from(7)));
    }
}
