//! # SQLite Deployment
//!
//! The protocol over the production adapters: a database installed by the
//! admin surface, archive files in the data directory, random tokens and the
//! wall clock.

#[cfg(test)]
mod tests {
    use super::super::{assert_ok, call_api, init_api, name_params, put_params};
    use nubo_sync::admin;
    use nubo_sync::domain::error::codes;
    use nubo_sync::ports::StoreProvider;
    use nubo_sync::test_utils::{error_code, init_params, TEST_PASSWORD};
    use nubo_sync::{
        Dispatcher, FsArchiveStorage, ServerConfig, SqliteStoreProvider, TokenCredentialManager,
    };
    use rmpv::Value;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    struct Deployment {
        _tmp: TempDir,
        config: ServerConfig,
        stores: SqliteStoreProvider,
        archives: FsArchiveStorage,
    }

    impl Deployment {
        fn install() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let mut config = ServerConfig::default();
            config.storage.data_dir = tmp.path().join("data");
            config.security.password_rounds = 16;

            let stores = SqliteStoreProvider::new(config.database_path());
            admin::install(&config, &stores, TEST_PASSWORD).unwrap();
            let archives = FsArchiveStorage::new(config.storage.data_dir.clone());
            Self {
                _tmp: tmp,
                config,
                stores,
                archives,
            }
        }

        /// A fresh dispatcher, as after a server restart.
        fn dispatcher(&self) -> Dispatcher {
            Dispatcher::new(
                Arc::new(self.stores.clone()),
                Arc::new(self.archives.clone()),
                Arc::new(TokenCredentialManager::with_defaults(
                    self.config.security.token_bytes,
                )),
            )
        }

        fn file_id(&self, name: &str) -> i64 {
            let mut store = self.stores.open().unwrap();
            let id = store.find_file(name).unwrap().unwrap().file_id;
            store.close();
            id
        }
    }

    #[test]
    fn test_install_refuses_second_run() {
        let deployment = Deployment::install();
        let err = admin::install(&deployment.config, &deployment.stores, "another").unwrap_err();
        assert!(matches!(err, admin::AdminError::AlreadyInstalled(_)));
    }

    #[test]
    fn test_file_content_lives_in_archive() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();
        let mut auth = init_api(&dispatcher, "laptop");

        assert_ok(&call_api(
            &dispatcher,
            &mut auth,
            "put",
            put_params("report.pdf", "h1", 100, Some(b"%PDF-1.7")),
        ));
        let path = deployment.archives.path_for(deployment.file_id("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");

        let fetched = call_api(&dispatcher, &mut auth, "get", name_params("report.pdf"));
        assert_eq!(fetched.get("content"), Some(&Value::Binary(b"%PDF-1.7".to_vec())));

        assert_ok(&call_api(&dispatcher, &mut auth, "delete", name_params("report.pdf")));
        assert!(!path.exists());
    }

    #[test]
    fn test_state_survives_restart() {
        let deployment = Deployment::install();
        let mut auth = {
            let dispatcher = deployment.dispatcher();
            let mut auth = init_api(&dispatcher, "laptop");
            assert_ok(&call_api(
                &dispatcher,
                &mut auth,
                "put",
                put_params("a.txt", "h", 1, Some(b"a")),
            ));
            auth
        };

        let restarted = deployment.dispatcher();
        let listing = call_api(&restarted, &mut auth, "directory", Value::Nil);
        assert_ok(&listing);
        assert_eq!(
            listing.get("result").and_then(Value::as_array).map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn test_replay_is_recorded_for_admin() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();
        let first = init_api(&dispatcher, "laptop");
        let mut current = first.clone();
        assert_ok(&call_api(&dispatcher, &mut current, "test", Value::Nil));

        let mut replayed = first;
        let response = call_api(&dispatcher, &mut replayed, "test", Value::Nil);
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));

        let computers = admin::list_computers(&deployment.stores).unwrap();
        assert_eq!(computers.len(), 1);
        assert_eq!(computers[0].status, "auth failed");
    }

    #[test]
    fn test_admin_revoke_blocks_client() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();
        let mut auth = init_api(&dispatcher, "laptop");

        let computers = admin::list_computers(&deployment.stores).unwrap();
        assert_eq!(computers[0].status, "OK");
        admin::revoke_computer(&deployment.stores, computers[0].computer_id).unwrap();

        let response = call_api(&dispatcher, &mut auth, "test", Value::Nil);
        assert_eq!(error_code(&response), Some(codes::FORBIDDEN));
    }

    #[test]
    fn test_admin_remove_file_deletes_archive() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();
        let mut auth = init_api(&dispatcher, "laptop");
        assert_ok(&call_api(
            &dispatcher,
            &mut auth,
            "put",
            put_params("x.bin", "h", 1, Some(b"xyz")),
        ));

        let file_id = deployment.file_id("x.bin");
        let files = admin::list_files(&deployment.stores).unwrap();
        assert_eq!(files[0].name, "x.bin");

        admin::remove_file(&deployment.stores, &deployment.archives, file_id).unwrap();
        assert!(!deployment.archives.path_for(file_id).exists());
        let response = call_api(&dispatcher, &mut auth, "get", name_params("x.bin"));
        assert_eq!(error_code(&response), Some(codes::STORAGE));
    }

    #[test]
    fn test_concurrent_clients() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();

        std::thread::scope(|scope| {
            for client in 0..4 {
                let dispatcher = &dispatcher;
                scope.spawn(move || {
                    let mut auth = init_api(dispatcher, &format!("computer-{client}"));
                    for n in 0..5 {
                        let name = format!("c{client}/f{n}");
                        let response = call_api(
                            dispatcher,
                            &mut auth,
                            "put",
                            put_params(&name, "h", n, Some(name.as_bytes())),
                        );
                        assert_ok(&response);
                    }
                });
            }
        });

        let mut store = deployment.stores.open().unwrap();
        assert_eq!(store.list_files().unwrap().len(), 20);
        assert_eq!(store.list_computers().unwrap().len(), 4);
        store.close();
    }

    #[test]
    fn test_racing_requests_on_one_token() {
        let deployment = Deployment::install();
        let dispatcher = deployment.dispatcher();
        let token = init_api(&dispatcher, "laptop");
        let barrier = Barrier::new(4);

        let accepted = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let mut auth = token.clone();
                        let response = call_api(&dispatcher, &mut auth, "test", Value::Nil);
                        error_code(&response).is_none()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        // One request rotates the token; the others present a spent validator.
        assert_eq!(accepted, 1);
        let computers = admin::list_computers(&deployment.stores).unwrap();
        assert_eq!(computers[0].status, "auth failed");
    }

    #[test]
    fn test_missing_database_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(SqliteStoreProvider::new(tmp.path().join("absent.rdb"))),
            Arc::new(FsArchiveStorage::new(tmp.path())),
            Arc::new(TokenCredentialManager::with_defaults(16)),
        );
        let mut auth = Value::Nil;
        let response = call_api(&dispatcher, &mut auth, "init", init_params("pw", "c", "h"));
        assert_eq!(error_code(&response), Some(codes::DATABASE));
        assert!(!tmp.path().join("absent.rdb").exists());
    }
}
