use dockyard::domain::{ApplicationConfiguration, GoalConfiguration, GoalState};
use dockyard::infra::DescriptorStore;
use dockyard::services::{ApplicationSettings, Registry, RegistryError};
use dockyard::test_support::{MockRuntime, STOPPED_EXIT_CODE};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    registry: Arc<Registry>,
    mock: Arc<MockRuntime>,
    store: DescriptorStore,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::new(dir.path().join("applications"));
    let mock = Arc::new(MockRuntime::new());
    let registry = Arc::new(Registry::new(
        mock.clone(),
        store.clone(),
        ApplicationSettings::default(),
    ));
    registry.start_event_pump().unwrap();

    Harness {
        registry,
        mock,
        store,
        _dir: dir,
    }
}

fn goal(image: &str) -> GoalConfiguration {
    GoalConfiguration {
        image: image.to_string(),
        ..Default::default()
    }
}

fn application(main: &str, goals: Vec<(&str, GoalConfiguration)>) -> ApplicationConfiguration {
    ApplicationConfiguration {
        goals: goals
            .into_iter()
            .map(|(name, gc)| (name.to_string(), gc))
            .collect(),
        main_goal: main.to_string(),
    }
}

fn history(registry: &Registry, app: &str, goal: &str) -> Vec<GoalState> {
    registry
        .goal_transition_log(app, goal)
        .unwrap()
        .into_iter()
        .map(|entry| entry.status)
        .collect()
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

async fn wait_for_status(registry: &Registry, app: &str, goal: &str, expected: GoalState) {
    let description = format!("{app}/{goal} to reach {expected}");
    wait_until(&description, || {
        registry
            .application_status(app)
            .ok()
            .and_then(|status| status.goal(goal).map(|g| g.status == expected))
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_goal_lifecycle() {
    let h = harness();
    h.mock.hold_pulls();
    let mut g1 = goal("alpine:3.4");
    g1.command = vec![
        "sh".into(),
        "-c".into(),
        "sleep 0.1; echo executed".into(),
    ];

    let initial = h
        .registry
        .new_application("app", application("g1", vec![("g1", g1)]))
        .unwrap();
    assert_eq!(initial.main_goal, "g1");
    assert!(h.store.path_for("app").exists());

    h.mock.release_pulls();
    wait_for_status(&h.registry, "app", "g1", GoalState::Running).await;
    assert_eq!(
        h.mock.spec("ap_app_g1").unwrap().command,
        vec!["sh", "-c", "sleep 0.1; echo executed"]
    );

    h.mock.finish_container("ap_app_g1", 0).unwrap();
    wait_for_status(&h.registry, "app", "g1", GoalState::Terminated).await;

    assert_eq!(
        history(&h.registry, "app", "g1"),
        vec![
            GoalState::FetchingImage,
            GoalState::WaitingForDependencies,
            GoalState::Starting,
            GoalState::Running,
            GoalState::Terminated,
        ]
    );
    let status = h.registry.application_status("app").unwrap();
    assert_eq!(status.goal("g1").unwrap().exit_code, Some(0));
    assert!(h.registry.container_id_for_goal("app", "g1").unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_after_dependency_completes_first() {
    let h = harness();
    h.mock.add_image("alpine:3.4");
    let mut b = goal("alpine:3.4");
    b.run_after = vec!["a".into()];

    h.registry
        .new_application("app", application("b", vec![("a", goal("alpine:3.4")), ("b", b)]))
        .unwrap();

    wait_for_status(&h.registry, "app", "a", GoalState::Running).await;
    wait_for_status(&h.registry, "app", "b", GoalState::WaitingForDependencies).await;
    assert!(h.mock.position_of("create:ap_app_b").is_none());

    h.mock.finish_container("ap_app_a", 0).unwrap();
    wait_for_status(&h.registry, "app", "b", GoalState::Running).await;

    let a_log = h.registry.goal_transition_log("app", "a").unwrap();
    let b_log = h.registry.goal_transition_log("app", "b").unwrap();
    let a_terminated = a_log
        .iter()
        .find(|e| e.status == GoalState::Terminated)
        .unwrap();
    let b_starting = b_log
        .iter()
        .find(|e| e.status == GoalState::Starting)
        .unwrap();
    assert!(a_terminated.time <= b_starting.time);
    assert!(
        h.mock.position_of("inspect:ap_app_a").unwrap()
            < h.mock.position_of("create:ap_app_b").unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependency_started_without_direct_request() {
    let h = harness();
    h.mock.hold_pulls();
    let mut main = goal("alpine:3.4");
    main.run_after = vec!["setup".into()];

    h.registry
        .new_application(
            "app",
            application("main", vec![("main", main), ("setup", goal("alpine:3.4"))]),
        )
        .unwrap();

    wait_for_status(&h.registry, "app", "setup", GoalState::FetchingImage).await;
    h.mock.release_pulls();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_link_loss_stops_dependent() {
    let h = harness();
    h.mock.add_image("alpine:3.4");
    h.mock.add_image("postgres:15");
    let mut web = goal("alpine:3.4");
    web.links = vec!["db:database".into()];

    h.registry
        .new_application(
            "app",
            application("web", vec![("web", web), ("db", goal("postgres:15"))]),
        )
        .unwrap();

    wait_for_status(&h.registry, "app", "web", GoalState::Running).await;
    assert_eq!(
        h.mock.spec("ap_app_web").unwrap().links,
        vec!["ap_app_db:database"]
    );

    h.mock.finish_container("ap_app_db", 0).unwrap();
    wait_for_status(&h.registry, "app", "web", GoalState::Failed).await;

    assert!(history(&h.registry, "app", "web").contains(&GoalState::StoppingContainer));
    assert!(h.mock.get_commands().contains(&"stop:ap_app_web".to_string()));
    let status = h.registry.application_status("app").unwrap();
    assert_eq!(
        status.goal("web").unwrap().exit_code,
        Some(STOPPED_EXIT_CODE)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_smart_restart_after_failure() {
    let h = harness();
    h.mock.add_image("alpine:3.4");
    let mut worker = goal("alpine:3.4");
    worker.smart_restart = true;

    h.registry
        .new_application("app", application("worker", vec![("worker", worker)]))
        .unwrap();
    wait_for_status(&h.registry, "app", "worker", GoalState::Running).await;
    let first = h.registry.container_id_for_goal("app", "worker").unwrap();

    h.mock.finish_container("ap_app_worker", 1).unwrap();

    let creates = |mock: &MockRuntime| {
        mock.get_commands()
            .iter()
            .filter(|c| *c == "create:ap_app_worker")
            .count()
    };
    wait_until("second container", || creates(&h.mock) == 2).await;
    wait_for_status(&h.registry, "app", "worker", GoalState::Running).await;

    let log = history(&h.registry, "app", "worker");
    let failed = log.iter().position(|s| *s == GoalState::Failed).unwrap();
    assert_eq!(log[failed + 1], GoalState::Starting);
    assert_ne!(
        h.registry.container_id_for_goal("app", "worker").unwrap(),
        first
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminate_removes_containers_and_descriptor() {
    let h = harness();
    h.mock.add_image("alpine:3.4");
    let mut web = goal("alpine:3.4");
    web.links = vec!["db".into()];

    h.registry
        .new_application(
            "app",
            application("web", vec![("web", web), ("db", goal("alpine:3.4"))]),
        )
        .unwrap();
    wait_for_status(&h.registry, "app", "web", GoalState::Running).await;
    let app = h.registry.application("app").unwrap();
    let mut updates = app.subscribe().unwrap();

    h.registry.terminate_application("app").await.unwrap();

    assert!(!h.mock.container_exists("ap_app_web"));
    assert!(!h.mock.container_exists("ap_app_db"));
    assert!(!h.store.path_for("app").exists());
    assert!(h.registry.application_names().is_empty());
    assert!(h.registry.application("app").is_none());

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while updates.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registry_names_and_lookups() {
    let h = harness();
    let mut names = h.registry.subscribe();

    h.registry
        .new_application("zeta", application("g1", vec![("g1", goal("alpine:3.4"))]))
        .unwrap();
    h.registry
        .new_application("alpha", application("g1", vec![("g1", goal("alpine:3.4"))]))
        .unwrap();

    assert_eq!(h.registry.application_names(), vec!["alpha", "zeta"]);
    assert_eq!(*names.borrow_and_update(), vec!["alpha", "zeta"]);

    let duplicate = h
        .registry
        .new_application("alpha", application("g1", vec![("g1", goal("alpine:3.4"))]));
    assert!(matches!(duplicate, Err(RegistryError::AlreadyExists(_))));

    assert!(matches!(
        h.registry.application_status("ghost"),
        Err(RegistryError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        h.registry.terminate_application("ghost").await,
        Err(RegistryError::ApplicationNotFound(_))
    ));
    assert!(matches!(
        h.registry.goal_transition_log("alpha", "ghost"),
        Err(RegistryError::GoalNotFound { .. })
    ));

    h.registry.terminate_application("zeta").await.unwrap();
    assert_eq!(*names.borrow_and_update(), vec!["alpha"]);

    h.registry.shutdown().await;
    assert!(names.borrow_and_update().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_goal_output_survives_restart() {
    let h = harness();
    h.mock.add_image("alpine:3.4");
    h.mock.set_output("ap_app_worker", &["working"]);
    let mut worker = goal("alpine:3.4");
    worker.smart_restart = true;

    h.registry
        .new_application("app", application("worker", vec![("worker", worker)]))
        .unwrap();
    let closed = |registry: &Registry| {
        registry
            .goal_tail("app", "worker")
            .unwrap()
            .iter()
            .filter(|line| *line == "output closed")
            .count()
    };
    wait_until("first output", || closed(&h.registry) == 1).await;

    h.mock.finish_container("ap_app_worker", 1).unwrap();
    wait_until("second output", || closed(&h.registry) == 2).await;

    let tail = h.registry.goal_tail("app", "worker").unwrap();
    let separators = tail.iter().filter(|line| *line == "----------").count();
    assert_eq!(separators, 2);
    assert_eq!(tail.iter().filter(|line| *line == "working").count(), 2);
    assert!(matches!(
        h.registry.goal_tail("app", "ghost"),
        Err(RegistryError::GoalNotFound { .. })
    ));
}
