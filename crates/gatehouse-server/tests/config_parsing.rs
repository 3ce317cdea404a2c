use std::{env, fs, time::Duration};

use gatehouse_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("gatehouse.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[logging]
level = "debug"

[auth.session]
domain = "example.com"
portal_url = "https://auth.example.com"
lifespan = "2h"

[auth.oidc]
access_token_lifespan = "30m"
key_rotation_interval = "7d"

[[auth.oidc.clients]]
id = "app1"
secret = "$plaintext$app1-secret"
redirect_uris = ["https://app1.example.com/cb"]
authorization_policy = "one_factor"

[auth.access_control]
default_policy = "deny"

[[auth.access_control.rules]]
domain = ["*.example.com"]
policy = "one_factor"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.auth.session.lifespan, Duration::from_secs(2 * 3600));
    assert_eq!(cfg.auth.oidc.access_token_lifespan, Duration::from_secs(30 * 60));
    assert_eq!(
        cfg.auth.oidc.key_rotation_interval,
        Some(Duration::from_secs(7 * 24 * 3600))
    );
    assert_eq!(cfg.auth.oidc.clients.len(), 1);
    assert_eq!(cfg.auth.access_control.rules.len(), 1);

    let report = cfg.validate();
    assert!(report.is_ok(), "{:?}", report.errors);
    assert!(
        report.warnings.iter().any(|w| w.contains("plaintext")),
        "{:?}",
        report.warnings
    );

    // 2) Env override should win over file
    unsafe {
        env::set_var("GATEHOUSE__SERVER__PORT", "9095");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9095);
    unsafe {
        env::remove_var("GATEHOUSE__SERVER__PORT");
    }

    // 3) Semantic problems are reported, not raised by the loader
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[auth.session]
domain = "example.com"
portal_url = "https://login.other.org"

[[auth.oidc.clients]]
id = "app1"
redirect_uris = ["https://app1.example.com/cb"]

[[auth.oidc.clients]]
id = "app1"
public = true
redirect_uris = ["/relative"]
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let cfg = load_config(invalid_path.to_str()).expect("syntactically valid");
    let report = cfg.validate();
    let errors = report.errors.join("\n");
    assert!(errors.contains("inside the protected domain"), "{errors}");
    assert!(errors.contains("duplicate client id"), "{errors}");
    assert!(errors.contains("require a secret"), "{errors}");
    assert!(errors.contains("not an absolute URL"), "{errors}");

    // 4) A missing explicit file is an error
    let missing = dir.path().join("missing.toml");
    let err = load_config(missing.to_str()).expect_err("missing file");
    assert!(err.contains("does not exist"));

    // 5) Malformed durations fail to load
    let bad_path = dir.path().join("bad.toml");
    fs::write(&bad_path, "[auth.oidc]\naccess_token_lifespan = \"soon\"\n").expect("write");
    assert!(load_config(bad_path.to_str()).is_err());
}
