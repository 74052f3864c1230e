//! Application use cases end to end against the in-process ports.

mod common;

use std::time::Duration;

use common::{vm_spec, Harness, PROVIDER};
use kiln_events::{MicroVmEvent, TOPIC_MICROVM_EVENTS};
use kiln_host_agent::application::{
    CreateMicroVmRequest, MicroVmCommandUseCases, MicroVmQueryUseCases,
    ReconcileMicroVmsUseCase, INSTANCE_ID_KEY,
};
use kiln_host_agent::models::{Capability, IfaceType, MicroVm, MicroVmState, RuntimeStatus};
use kiln_host_agent::ports::{
    EventService, GetOptions, MicroVmProviderState, MicroVmRepository, MicroVmService,
};
use kiln_host_agent::{App, AppConfig, AppError};
use kiln_id::{IdError, VmId};
use kiln_reconcile::CancelToken;
use tokio::sync::watch;
use tokio::time::timeout;

fn request(name: &str) -> CreateMicroVmRequest {
    CreateMicroVmRequest {
        name: Some(name.to_string()),
        namespace: Some("ns".to_string()),
        spec: vm_spec(),
    }
}

async fn stored(h: &Harness, vm: &MicroVm) -> MicroVm {
    h.repo
        .get(GetOptions::by_id(&vm.id))
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_create_stores_pending_spec() {
    let h = Harness::new();
    let app = h.app();
    let mut sub = h.events.subscribe_topic(TOPIC_MICROVM_EVENTS).await.unwrap();

    let vm = app.create_microvm(request("vm1")).await.unwrap();

    assert_eq!(vm.id.namespace(), "ns");
    assert_eq!(vm.id.name(), "vm1");
    let uid = vm.id.uid().unwrap().to_string();
    assert_eq!(uid.len(), 26);
    assert_eq!(vm.status.state, MicroVmState::Pending);
    assert_eq!(vm.spec.created_at, h.clock.now_secs());
    assert_eq!(vm.spec.metadata.get(INSTANCE_ID_KEY), Some(&uid));
    assert_eq!(vm.version, 1);

    let envelope = timeout(Duration::from_secs(1), sub.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event, MicroVmEvent::created(&vm.id));
}

#[tokio::test]
async fn test_create_generates_name_and_default_provider() {
    let h = Harness::new();
    let app = h.app();
    let mut req = CreateMicroVmRequest {
        spec: vm_spec(),
        ..Default::default()
    };
    req.spec.provider.clear();

    let vm = app.create_microvm(req).await.unwrap();
    assert_eq!(vm.id.namespace(), "default");
    assert_eq!(vm.id.name().len(), 26);
    assert_eq!(vm.spec.provider, PROVIDER);
}

#[tokio::test]
async fn test_create_adds_metadata_interface() {
    let h = Harness::with_capabilities([Capability::MetadataService].into_iter().collect());
    let app = h.app();

    let vm = app.create_microvm(request("vm1")).await.unwrap();
    let ifaces = &vm.spec.network_interfaces;
    assert_eq!(ifaces.len(), 2);
    assert_eq!(ifaces[0].guest_device_name, "eth0");
    assert_eq!(ifaces[0].interface_type, IfaceType::Tap);
    assert!(ifaces[0].allow_metadata_requests);
    assert_eq!(ifaces[0].guest_mac.as_deref(), Some("AA:FF:00:00:00:01"));
    assert_eq!(
        ifaces[0].static_address.as_ref().map(|a| a.address.as_str()),
        Some("169.254.0.1/16")
    );
    assert_eq!(ifaces[1].guest_device_name, "eth1");
}

#[tokio::test]
async fn test_create_rejects_duplicates_and_unknown_providers() {
    let h = Harness::new();
    let app = h.app();
    app.create_microvm(request("vm1")).await.unwrap();

    let err = app.create_microvm(request("vm1")).await.unwrap_err();
    assert!(matches!(err, AppError::SpecAlreadyExists { ref name, .. } if name == "vm1"));

    let mut req = request("vm2");
    req.spec.provider = "qemu".to_string();
    let err = app.create_microvm(req).await.unwrap_err();
    assert!(matches!(err, AppError::ProviderUnavailable(ref p) if p == "qemu"));
}

#[tokio::test]
async fn test_reconcile_brings_vm_up() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();

    app.reconcile_microvm(&vm.id).await.unwrap();

    let after = stored(&h, &vm).await;
    assert_eq!(after.status.state, MicroVmState::Created);
    assert_eq!(after.status.retry, 0);
    assert!(after.status.kernel_mount.is_some());
    assert_eq!(
        h.provider.state(&vm.id.to_string()).await.unwrap(),
        MicroVmProviderState::Running
    );

    // A second pass has nothing to do and does not rewrite the record.
    app.reconcile_microvm(&vm.id).await.unwrap();
    assert_eq!(stored(&h, &vm).await.version, after.version);
    assert_eq!(h.provider.calls().len(), 2);
}

#[tokio::test]
async fn test_reconcile_without_uid_finds_vm() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();

    app.reconcile_microvm(&VmId::parse("ns/vm1").unwrap())
        .await
        .unwrap();
    assert_eq!(stored(&h, &vm).await.status.state, MicroVmState::Created);
}

#[tokio::test]
async fn test_reconcile_missing_vm_is_ok() {
    let h = Harness::new();
    h.app()
        .reconcile_microvm(&VmId::parse("ns/ghost").unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_pass_backs_off_and_recovers() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();

    h.network.set_fail_create(true);
    let err = app.reconcile_microvm(&vm.id).await.unwrap_err();
    assert!(matches!(err, AppError::ExecutingPlan(ref e) if e.step() == Some("network_iface_create")));

    let after = stored(&h, &vm).await;
    assert_eq!(after.status.retry, 1);
    assert_eq!(after.status.not_before, h.clock.now_secs() + 20);
    // Progress made before the failure is persisted.
    assert!(after.status.kernel_mount.is_some());

    // Still backing off: the pass is skipped.
    h.network.set_fail_create(false);
    app.reconcile_microvm(&vm.id).await.unwrap();
    assert_eq!(stored(&h, &vm).await.status.retry, 1);
    assert!(h.provider.calls().is_empty());

    h.clock.advance(21);
    app.reconcile_microvm(&vm.id).await.unwrap();
    let after = stored(&h, &vm).await;
    assert_eq!(after.status.retry, 0);
    assert_eq!(after.status.not_before, 0);
    assert_eq!(after.status.state, MicroVmState::Created);
}

#[tokio::test]
async fn test_backoff_grows_with_retries() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();
    h.provider.set_fail_create(true);

    assert!(app.reconcile_microvm(&vm.id).await.is_err());
    h.clock.advance(20);
    assert!(app.reconcile_microvm(&vm.id).await.is_err());

    let after = stored(&h, &vm).await;
    assert_eq!(after.status.retry, 2);
    assert_eq!(after.status.not_before, h.clock.now_secs() + 40);
}

#[tokio::test]
async fn test_exceeding_maximum_retry_marks_failed() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();

    let mut failing = stored(&h, &vm).await;
    failing.status.retry = app.config().maximum_retry + 1;
    h.repo.save(&failing).await.unwrap();

    app.reconcile_microvm(&vm.id).await.unwrap();
    assert_eq!(stored(&h, &vm).await.status.state, MicroVmState::Failed);
    assert!(h.provider.calls().is_empty());
}

#[tokio::test]
async fn test_delete_flow_removes_everything() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();
    app.reconcile_microvm(&vm.id).await.unwrap();
    assert_eq!(h.network.devices().len(), 1);

    let uid = vm.id.uid().unwrap().to_string();
    app.delete_microvm(&uid).await.unwrap();
    let tombstoned = app.get_microvm(&uid).await.unwrap();
    assert!(tombstoned.spec.is_deleted());
    assert_eq!(tombstoned.status.state, MicroVmState::Deleting);

    let mut sub = h.events.subscribe_topic(TOPIC_MICROVM_EVENTS).await.unwrap();
    app.reconcile_microvm(&vm.id).await.unwrap();

    assert!(h.repo.is_empty().await);
    assert!(!h.repo.has_lease(&vm.id).await);
    assert!(h.network.devices().is_empty());
    assert_eq!(
        h.provider.state(&vm.id.to_string()).await.unwrap(),
        MicroVmProviderState::Pending
    );

    let envelope = timeout(Duration::from_secs(1), sub.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event, MicroVmEvent::deleted(&vm.id));

    let err = app.get_microvm(&uid).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_validation() {
    let h = Harness::new();
    let app = h.app();

    assert!(matches!(
        app.delete_microvm("").await.unwrap_err(),
        AppError::UidRequired
    ));
    assert!(matches!(
        app.delete_microvm("01HZZZZZZZZZZZZZZZZZZZZZZZ").await.unwrap_err(),
        AppError::SpecNotFound { .. }
    ));
}

#[tokio::test]
async fn test_resync_lists_vms_without_publishing() {
    let h = Harness::new();
    let app = h.app();
    let a = app.create_microvm(request("a")).await.unwrap();
    let mut other = request("b");
    other.namespace = Some("other".to_string());
    let b = app.create_microvm(other).await.unwrap();

    let mut sub = h.events.subscribe_topic(TOPIC_MICROVM_EVENTS).await.unwrap();
    let ids = app.resync_microvms(None).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.id));
    assert!(ids.contains(&b.id));

    assert_eq!(app.resync_microvms(Some("other")).await.unwrap(), vec![b.id.clone()]);
    assert!(timeout(Duration::from_millis(50), sub.events.recv()).await.is_err());

    assert_eq!(app.get_all_microvm(Some("ns")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_waits_for_pass_in_flight() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();
    h.provider.set_create_delay(Some(Duration::from_millis(200)));

    let pass = tokio::spawn({
        let app = app.clone();
        let id = vm.id.clone();
        async move { app.reconcile_microvm(&id).await }
    });
    timeout(Duration::from_secs(1), async {
        while h.provider.calls().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let uid = vm.id.uid().unwrap().to_string();
    app.delete_microvm(&uid).await.unwrap();
    pass.await.unwrap().unwrap();

    let after = stored(&h, &vm).await;
    assert!(after.spec.is_deleted());
    assert_eq!(after.status.state, MicroVmState::Deleting);

    h.provider.set_create_delay(None);
    app.reconcile_microvm(&vm.id).await.unwrap();
    assert!(h.repo.is_empty().await);
}

#[tokio::test]
async fn test_concurrent_creates_with_same_name() {
    let h = Harness::new();
    let app = h.app();

    let (a, b) = tokio::join!(
        app.create_microvm(request("vm1")),
        app.create_microvm(request("vm1"))
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, AppError::SpecAlreadyExists { .. }));
    assert_eq!(app.get_all_microvm(Some("ns")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_rejects_name_with_separator() {
    let h = Harness::new();
    let err = h.app().create_microvm(request("a/b")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidId(IdError::InvalidFormat { .. })));
    assert!(h.repo.is_empty().await);
}

fn fast_backoff_app(h: &Harness, cancel: CancelToken) -> App {
    let config = AppConfig {
        backoff_base: Duration::from_millis(20),
        ..h.app_config()
    };
    App::new(config, h.ports.clone()).with_cancel_token(cancel)
}

#[tokio::test]
async fn test_failed_pass_is_republished_after_backoff() {
    let h = Harness::new();
    let app = fast_backoff_app(&h, CancelToken::never());
    let vm = app.create_microvm(request("vm1")).await.unwrap();
    let mut sub = h.events.subscribe_topic(TOPIC_MICROVM_EVENTS).await.unwrap();

    h.network.set_fail_create(true);
    assert!(app.reconcile_microvm(&vm.id).await.is_err());

    let envelope = timeout(Duration::from_secs(1), sub.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.event, MicroVmEvent::updated(&vm.id));
}

#[tokio::test]
async fn test_shutdown_drops_pending_republish() {
    let h = Harness::new();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let app = fast_backoff_app(&h, CancelToken::new(shutdown_rx));
    let vm = app.create_microvm(request("vm1")).await.unwrap();
    let mut sub = h.events.subscribe_topic(TOPIC_MICROVM_EVENTS).await.unwrap();

    h.network.set_fail_create(true);
    assert!(app.reconcile_microvm(&vm.id).await.is_err());
    shutdown.send(true).unwrap();

    assert!(timeout(Duration::from_millis(200), sub.events.recv()).await.is_err());
}

#[tokio::test]
async fn test_status_follows_provider_and_tombstone() {
    let h = Harness::new();
    let app = h.app();
    let vm = app.create_microvm(request("vm1")).await.unwrap();

    assert_eq!(app.get_microvm_status(&vm.id).await.unwrap(), RuntimeStatus::Pending);

    app.reconcile_microvm(&vm.id).await.unwrap();
    assert_eq!(app.get_microvm_status(&vm.id).await.unwrap(), RuntimeStatus::Running);
    let by_name = VmId::parse("ns/vm1").unwrap();
    assert_eq!(app.get_microvm_status(&by_name).await.unwrap(), RuntimeStatus::Running);

    h.provider
        .set_state(&vm.id.to_string(), MicroVmProviderState::Stopped);
    assert_eq!(app.get_microvm_status(&vm.id).await.unwrap(), RuntimeStatus::Stopped);

    app.delete_microvm(vm.id.uid().unwrap()).await.unwrap();
    assert_eq!(app.get_microvm_status(&vm.id).await.unwrap(), RuntimeStatus::Deleting);
}

#[tokio::test]
async fn test_status_of_unknown_vm() {
    let h = Harness::new();
    let status = h
        .app()
        .get_microvm_status(&VmId::parse("ns/ghost").unwrap())
        .await
        .unwrap();
    assert_eq!(status, RuntimeStatus::Unknown);
}
