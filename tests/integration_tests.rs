use dockyard::domain::{
    ApplicationConfiguration, ContainerSpec, ValidationError, validate,
};
use dockyard::infra::DescriptorStore;
use std::path::Path;

const SHOP: &str = r#"{
  "main_goal": "web",
  "goals": {
    "web": {
      "image": "nginx:1.25",
      "links": ["api:backend"],
      "ports": ["8080:80"],
      "volumes": ["./site:/usr/share/nginx/html:ro"]
    },
    "api": {
      "image": "registry.local:5000/shop/api:2.1",
      "run_after": ["migrate"],
      "links": ["db"],
      "environment": {"DATABASE_HOST": "db"},
      "smart_restart": true,
      "auth_config": {"username": "ci", "password": "token"}
    },
    "migrate": {
      "image": "registry.local:5000/shop/api:2.1",
      "command": ["./migrate", "up"],
      "links": ["db"]
    },
    "db": {
      "image": "postgres:15",
      "container_name": "shop-db",
      "mem_limit": 536870912
    }
  }
}"#;

fn shop() -> ApplicationConfiguration {
    serde_json::from_str(SHOP).unwrap()
}

#[test]
fn test_parses_and_validates_descriptor() {
    let config = shop();

    assert_eq!(config.main_goal, "web");
    assert_eq!(config.goals.len(), 4);
    assert!(config.goals["api"].smart_restart);
    assert_eq!(
        config.goals["api"].depends_on(),
        vec!["db".to_string(), "migrate".to_string()]
    );
    assert_eq!(validate(&config), Ok(()));
}

#[test]
fn test_rejects_descriptor_with_cycle() {
    let mut config = shop();
    config
        .goals
        .get_mut("db")
        .unwrap()
        .run_after
        .push("web".into());

    assert!(matches!(
        validate(&config),
        Err(ValidationError::CircularDependency { .. })
    ));
}

#[test]
fn test_resolves_container_specs() {
    let config = shop();

    let web = ContainerSpec::for_goal("shop", "web", &config, Path::new("/srv/shop")).unwrap();
    assert_eq!(web.name, "ap_shop_web");
    assert_eq!(web.links, vec!["ap_shop_api:backend"]);
    assert_eq!(web.volumes, vec!["/srv/shop/site:/usr/share/nginx/html:ro"]);

    let api = ContainerSpec::for_goal("shop", "api", &config, Path::new("/srv/shop")).unwrap();
    assert_eq!(api.links, vec!["shop-db:db"]);
    assert_eq!(api.env, vec!["DATABASE_HOST=db"]);

    let db = ContainerSpec::for_goal("shop", "db", &config, Path::new("/srv/shop")).unwrap();
    assert_eq!(db.name, "shop-db");
    assert_eq!(db.memory, Some(536_870_912));
}

#[test]
fn test_descriptor_store_keeps_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let store = DescriptorStore::new(dir.path());

    store.save("shop", &shop()).unwrap();

    assert_eq!(store.list().unwrap(), vec!["shop"]);
    assert_eq!(store.load("shop").unwrap(), shop());
}
