//! Notification pipeline integration tests
//!
//! Drives changes through a fake tenant channel and checks what each
//! session receives.

#[cfg(feature = "ssr")]
mod common;

#[cfg(feature = "ssr")]
mod tests {
    use crate::common::{build_hub, build_hub_from, test_config, wait_until, CountingExecutor, Recorder};
    use featherlive::backend::fetch::FetchKey;
    use featherlive::backend::tenants::TenantSource;
    use featherlive::shared::{
        ChangeKind, ChangeMessage, ChangePayload, EventKey, MetadataStream, SubscribeOptions, SubscriptionTarget,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn record(id: &str) -> SubscriptionTarget {
        SubscriptionTarget::Record(id.to_string())
    }

    #[tokio::test]
    async fn test_one_fetch_serves_every_session() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut sessions = Vec::new();
        for key in ["a", "b", "c"] {
            let recorder = Recorder::connect(&t.hub, key, true);
            let id = t
                .hub
                .subscribe("acme", &EventKey::new(key), record("R1"), SubscribeOptions::default())
                .unwrap();
            sessions.push((recorder, id));
        }

        assert!(t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update)));

        for (recorder, id) in sessions.iter_mut() {
            let notification = recorder.next().await;
            assert_eq!(notification.subscription.subscription_id, *id);
            assert_eq!(notification.subscription.change, ChangeKind::Update);
            assert_eq!(notification.data["id"], "R1");
            assert_eq!(notification.data["version"], 1);
        }
        assert_eq!(t.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_query_subscription_and_signal_only_session() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut signals = Recorder::connect(&t.hub, "signals", false);
        let query = SubscriptionTarget::Query("Contact".to_string());
        t.hub
            .subscribe("acme", &EventKey::new("signals"), query, SubscribeOptions::default())
            .unwrap();

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R7", ChangeKind::Create));

        let notification = signals.next().await;
        assert_eq!(notification.subscription.change, ChangeKind::Create);
        assert!(notification.data.is_null());
        assert_eq!(t.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_signalled_without_fetch() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Delete));

        let notification = a.next().await;
        assert!(notification.is_deleted());
        assert!(notification.data.is_null());
        assert_eq!(t.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_merge_subscription_receives_delta() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        let options = SubscribeOptions { merge: true };
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), options).unwrap();

        let message = ChangeMessage::new(
            "acme",
            ChangePayload::Record {
                feather: "Contact".to_string(),
                id: "R1".to_string(),
                change: ChangeKind::Update,
                subscriptions: Vec::new(),
                data: Some(json!({"name": "Ada"})),
            },
        );
        t.source.emit(&message);

        let notification = a.next().await;
        assert_eq!(notification.data, json!({"name": "Ada"}));
        assert_eq!(t.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_explicit_addressees_only() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        let mut b = Recorder::connect(&t.hub, "b", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();
        let b_id = t
            .hub
            .subscribe("acme", &EventKey::new("b"), record("R1"), SubscribeOptions::default())
            .unwrap();

        let message = ChangeMessage::new(
            "acme",
            ChangePayload::Record {
                feather: "Contact".to_string(),
                id: "R1".to_string(),
                change: ChangeKind::Update,
                subscriptions: vec![b_id],
                data: None,
            },
        );
        t.source.emit(&message);

        assert_eq!(b.next().await.subscription.subscription_id, b_id);
        a.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_changes_stay_within_their_tenant() {
        let t = build_hub(&["acme", "globex"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;
        t.source.wait_for_connects("globex", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();

        t.source.emit(&ChangeMessage::record("globex", "Contact", "R1", ChangeKind::Update));
        a.assert_quiet().await;

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));
        assert_eq!(a.next().await.subscription.change, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_feather_definition_registers_route_and_skips_origin() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let feathers = SubscriptionTarget::Metadata(MetadataStream::Feather);
        let mut a = Recorder::connect(&t.hub, "a", true);
        let mut b = Recorder::connect(&t.hub, "b", true);
        t.hub.subscribe("acme", &EventKey::new("a"), feathers.clone(), SubscribeOptions::default()).unwrap();
        t.hub.subscribe("acme", &EventKey::new("b"), feathers, SubscribeOptions::default()).unwrap();

        let definition = json!({"plural": "Contacts", "module": "CRM"});
        let change = ChangeMessage::metadata(
            "acme",
            MetadataStream::Feather,
            "Contact",
            ChangeKind::Create,
            Some(definition.clone()),
        )
        .with_origin(EventKey::new("a"));
        t.source.emit(&change);

        let notification = b.next().await;
        assert_eq!(notification.subscription.change, ChangeKind::Create);
        assert_eq!(notification.data, definition);
        a.assert_quiet().await;

        let route = t.hub.routes().lookup("acme", "contacts").unwrap();
        assert_eq!(route.feather.as_deref(), Some("Contact"));
        assert_eq!(route.module.as_deref(), Some("CRM"));
        assert_eq!(t.hub.routes().registrations(), 1);

        // The same definition again changes nothing.
        t.source.emit(&change);
        b.next().await;
        assert_eq!(t.hub.routes().registrations(), 1);
    }

    #[tokio::test]
    async fn test_listener_reconnects_after_drop() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();

        t.source.drop_connection("acme");
        t.source.wait_for_connects("acme", 2).await;

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));
        assert_eq!(a.next().await.subscription.change, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_stop_listener() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();

        assert!(t.source.emit_raw("acme", "{not json"));
        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));

        assert_eq!(a.next().await.subscription.change, ChangeKind::Update);
        assert_eq!(t.source.connects("acme"), 1);
    }

    #[tokio::test]
    async fn test_torn_down_session_is_not_addressed() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let a = Recorder::connect(&t.hub, "a", true);
        let mut b = Recorder::connect(&t.hub, "b", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();
        t.hub.subscribe("acme", &EventKey::new("b"), record("R1"), SubscribeOptions::default()).unwrap();

        let report = t.hub.disconnect(&a.session).await;
        assert!(report.session_removed);
        assert_eq!(report.subscriptions_removed, 1);

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));
        b.next().await;

        assert_eq!(t.hub.subscriptions().count_for(&EventKey::new("a")), 0);
        // Only the signal-only session was left, so nothing was fetched.
        assert_eq!(t.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_changes_share_one_query() {
        let t = build_hub(&["acme"], CountingExecutor::gated());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R2"), SubscribeOptions::default()).unwrap();

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R2", ChangeKind::Update));
        t.source.emit(&ChangeMessage::record("acme", "Contact", "R2", ChangeKind::Update));

        let key = FetchKey {
            tenant: "acme".to_string(),
            feather: "Contact".to_string(),
            id: "R2".to_string(),
        };
        wait_until(|| t.hub.coalescer().waiters(&key) == 2 && t.executor.calls() == 1).await;

        t.executor.release(1);
        let first = a.next().await;
        let second = a.next().await;
        assert_eq!(first.data, second.data);
        assert_eq!(first.data["version"], 1);
        assert_eq!(t.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_row_sends_bare_signal() {
        let executor = CountingExecutor::new();
        executor.mark_missing("R9");
        let t = build_hub(&["acme"], executor);
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R9"), SubscribeOptions::default()).unwrap();

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R9", ChangeKind::Update));

        let notification = a.next().await;
        assert_eq!(notification.subscription.change, ChangeKind::Update);
        assert!(notification.data.is_null());
    }

    #[tokio::test]
    async fn test_route_stream_registers_and_removes_routes() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        let routes = SubscriptionTarget::Metadata(MetadataStream::Route);
        t.hub.subscribe("acme", &EventKey::new("a"), routes, SubscribeOptions::default()).unwrap();

        let definition = json!({"path": "sales-report", "feather": "SalesOrder", "module": "Sales", "isReadOnly": true});
        t.source.emit(&ChangeMessage::metadata(
            "acme",
            MetadataStream::Route,
            "SalesReport",
            ChangeKind::Create,
            Some(definition.clone()),
        ));

        let notification = a.next().await;
        assert_eq!(notification.subscription.change, ChangeKind::Create);
        assert_eq!(notification.data, definition);

        let route = t.hub.routes().lookup("acme", "sales-report").unwrap();
        assert_eq!(route.feather.as_deref(), Some("SalesOrder"));
        assert_eq!(route.module.as_deref(), Some("Sales"));
        assert!(route.read_only);

        t.source.emit(&ChangeMessage::metadata(
            "acme",
            MetadataStream::Route,
            "SalesReport",
            ChangeKind::Delete,
            Some(json!({"path": "sales-report"})),
        ));

        let notification = a.next().await;
        assert!(notification.is_deleted());
        assert!(t.hub.routes().lookup("acme", "sales-report").is_none());
    }

    #[tokio::test]
    async fn test_tenant_change_on_channel_starts_new_listener() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[tenant]]\nname = \"acme\"\ndatabase_url = \"postgres://localhost/acme\"").unwrap();

        let t = build_hub_from(
            TenantSource::File(file.path().to_path_buf()),
            CountingExecutor::new(),
            test_config(),
        );
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        let tenants = SubscriptionTarget::Metadata(MetadataStream::Tenant);
        t.hub.subscribe("acme", &EventKey::new("a"), tenants, SubscribeOptions::default()).unwrap();

        std::fs::write(
            file.path(),
            "[[tenant]]\nname = \"acme\"\ndatabase_url = \"postgres://localhost/acme\"\n\n\
             [[tenant]]\nname = \"globex\"\ndatabase_url = \"postgres://localhost/globex\"\n",
        )
        .unwrap();
        t.source.emit(&ChangeMessage::metadata(
            "acme",
            MetadataStream::Tenant,
            "globex",
            ChangeKind::Create,
            None,
        ));

        assert_eq!(a.next().await.subscription.change, ChangeKind::Create);
        t.source.wait_for_connects("globex", 1).await;
        assert!(t.hub.tenants().contains("globex"));
        // The unchanged tenant keeps its listener.
        assert_eq!(t.source.connects("acme"), 1);

        let mut g = Recorder::connect(&t.hub, "g", false);
        t.hub.subscribe("globex", &EventKey::new("g"), record("R1"), SubscribeOptions::default()).unwrap();
        t.source.emit(&ChangeMessage::record("globex", "Contact", "R1", ChangeKind::Update));
        assert_eq!(g.next().await.subscription.change, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_listener_drop_leaves_other_tenants_running() {
        let t = build_hub(&["acme", "globex"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;
        t.source.wait_for_connects("globex", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", false);
        let mut g = Recorder::connect(&t.hub, "g", false);
        t.hub.subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default()).unwrap();
        t.hub.subscribe("globex", &EventKey::new("g"), record("R1"), SubscribeOptions::default()).unwrap();

        t.source.drop_connection("acme");
        assert!(t.source.emit(&ChangeMessage::record("globex", "Contact", "R1", ChangeKind::Update)));
        assert_eq!(g.next().await.subscription.change, ChangeKind::Update);

        t.source.wait_for_connects("acme", 2).await;
        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));
        assert_eq!(a.next().await.subscription.change, ChangeKind::Update);

        t.source.emit(&ChangeMessage::record("globex", "Contact", "R1", ChangeKind::Update));
        assert_eq!(g.next().await.subscription.change, ChangeKind::Update);
        assert_eq!(t.source.connects("globex"), 1);
    }

    #[tokio::test]
    async fn test_subscription_dropped_during_fetch_is_not_delivered() {
        let t = build_hub(&["acme"], CountingExecutor::gated());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        let mut b = Recorder::connect(&t.hub, "b", true);
        let mut c = Recorder::connect(&t.hub, "c", true);
        let a_id = t
            .hub
            .subscribe("acme", &EventKey::new("a"), record("R1"), SubscribeOptions::default())
            .unwrap();
        t.hub.subscribe("acme", &EventKey::new("b"), record("R1"), SubscribeOptions::default()).unwrap();
        let c_id = t
            .hub
            .subscribe("acme", &EventKey::new("c"), record("R1"), SubscribeOptions::default())
            .unwrap();

        t.source.emit(&ChangeMessage::record("acme", "Contact", "R1", ChangeKind::Update));
        let key = FetchKey {
            tenant: "acme".to_string(),
            feather: "Contact".to_string(),
            id: "R1".to_string(),
        };
        wait_until(|| t.hub.coalescer().waiters(&key) == 1 && t.executor.calls() == 1).await;

        assert!(t.hub.unsubscribe(&EventKey::new("a"), a_id));
        t.hub.disconnect(&b.session).await;
        t.executor.release(1);

        let notification = c.next().await;
        assert_eq!(notification.subscription.subscription_id, c_id);
        assert_eq!(notification.data["id"], "R1");
        a.assert_quiet().await;
        b.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_table_name_maps_to_known_feather() {
        let t = build_hub(&["acme"], CountingExecutor::new());
        t.hub.start().unwrap();
        t.source.wait_for_connects("acme", 1).await;

        t.source.emit(&ChangeMessage::metadata(
            "acme",
            MetadataStream::Feather,
            "ContactAddress",
            ChangeKind::Create,
            Some(json!({"plural": "ContactAddresses"})),
        ));
        wait_until(|| t.hub.routes().lookup("acme", "contact-addresses").is_some()).await;

        let mut a = Recorder::connect(&t.hub, "a", true);
        let query = SubscriptionTarget::Query("ContactAddress".to_string());
        t.hub.subscribe("acme", &EventKey::new("a"), query, SubscribeOptions::default()).unwrap();

        // What the trigger publishes when attached without a feather argument.
        t.source.emit(&ChangeMessage::record("acme", "contact_address", "R3", ChangeKind::Update));

        let notification = a.next().await;
        assert_eq!(notification.data["feather"], "ContactAddress");
        assert_eq!(notification.data["id"], "R3");
    }
}
