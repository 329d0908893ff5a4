use std::fs;

use frp_desktop::{
    ControlPlane, ErrorCode, Paths, Role,
    config::{ClientConfig, Configuration, ProxyEntry, ProxyKind},
    settings::Settings,
};

fn control_plane(directory: &tempfile::TempDir) -> ControlPlane {
    ControlPlane::with_settings(Paths::new(directory.path()), Settings::default()).unwrap()
}

fn client_config(control: &ControlPlane) -> ClientConfig {
    match control.read_config(Role::Client) {
        Configuration::Client(config) => config,
        Configuration::Server(_) => panic!("client read returned a server configuration"),
    }
}

#[test]
fn fresh_root_reads_default_client_configuration() {
    let directory = tempfile::tempdir().unwrap();
    let control = control_plane(&directory);

    let config = client_config(&control);
    assert_eq!(config.server_addr.as_deref(), Some("127.0.0.1"));
    assert_eq!(config.server_port, Some(7000));

    let raw = control.read_raw_config(Role::Client);
    assert!(raw.contains("serverAddr = \"127.0.0.1\""));
    assert!(raw.contains("serverPort = 7000"));
    assert!(raw.contains("[auth]\nmethod = \"token\""));
    assert!(!raw.contains("token = \"\""));
}

#[test]
fn proxies_survive_global_edits() {
    let directory = tempfile::tempdir().unwrap();
    let control = control_plane(&directory);

    let mut web2 = ProxyEntry::new("web2", ProxyKind::Http);
    web2.local_port = Some(8081);
    web2.custom_domains = Some(vec!["b.example.com".into()]);
    control.add_proxy(&web2).unwrap();

    let mut web1 = ProxyEntry::new("web1", ProxyKind::Http);
    web1.local_port = Some(8080);
    web1.custom_domains = Some(vec!["a.example.com".into()]);
    control.add_proxy(&web1).unwrap();

    let mut config = client_config(&control);
    config.server_addr = Some("frp.example.com".into());
    control.save_config(&Configuration::Client(config)).unwrap();

    assert_eq!(client_config(&control).server_addr.as_deref(), Some("frp.example.com"));
    assert_eq!(control.get_proxy("web2").unwrap(), Some(web2));
    assert_eq!(control.list_proxies().unwrap().len(), 2);

    control.delete_proxy("web1").unwrap();
    assert_eq!(control.get_proxy("web1").unwrap(), None);
    assert_eq!(
        control.update_proxy("web1", &web1).unwrap_err().code(),
        ErrorCode::NotFound
    );
}

#[test]
fn corrupt_server_file_is_replaced_with_defaults() {
    let directory = tempfile::tempdir().unwrap();
    let control = control_plane(&directory);
    let path = control.ensure_config(Role::Server).unwrap();
    fs::write(&path, "bindPort = = 7000\n").unwrap();

    match control.read_config(Role::Server) {
        Configuration::Server(config) => assert_eq!(config.bind_port, Some(7000)),
        Configuration::Client(_) => panic!("server read returned a client configuration"),
    }
    assert!(fs::read_to_string(&path).unwrap().contains("bindPort = 7000"));
    assert_eq!(
        fs::read_to_string(path.with_extension("toml.bak")).unwrap(),
        "bindPort = = 7000\n"
    );
}

#[test]
fn version_registry_round_trip() {
    let directory = tempfile::tempdir().unwrap();
    let control = control_plane(&directory);

    assert!(control.versions().all.is_empty());
    assert_eq!(control.check_current_version().version, None);

    control.set_current_version("v0.50.0").unwrap();
    let status = control.check_current_version();
    assert_eq!(status.version.as_deref(), Some("v0.50.0"));
    assert!(!status.has_client);
    assert_eq!(
        control.start(Role::Client).unwrap_err().code(),
        ErrorCode::MissingBinary
    );
}

#[cfg(unix)]
#[test]
fn installed_client_runs_with_the_stored_configuration() {
    use frp_desktop::{
        process_log::{LogLevel, LogLine, ProcessEvent, StatusChange},
        system::make_executable,
    };
    use futures::executor::block_on_stream;

    let directory = tempfile::tempdir().unwrap();
    let control = control_plane(&directory);
    let paths = control.paths().clone();

    let binary = paths.executable_path("v0.50.0", Role::Client);
    fs::create_dir_all(binary.parent().unwrap()).unwrap();
    fs::write(
        &binary,
        "#!/bin/sh\necho \"login to server success\"\necho \"config $2\"\nexit 0\n",
    )
    .unwrap();
    make_executable(&binary).unwrap();
    control.set_current_version("v0.50.0").unwrap();
    assert!(control.check_current_version().has_client);

    assert_eq!(
        control.start(Role::Client).unwrap_err().code(),
        ErrorCode::MissingConfig
    );
    control.ensure_config(Role::Client).unwrap();

    let events = control.subscribe(Role::Client);
    control.start(Role::Client).unwrap();

    let mut collected = Vec::new();
    for event in block_on_stream(events) {
        let done = matches!(event, ProcessEvent::Status(StatusChange { running: false, .. }));
        collected.push(event);
        if done {
            break;
        }
    }

    let configuration = std::path::absolute(control.config_path(Role::Client)).unwrap();
    assert_eq!(
        collected.first(),
        Some(&ProcessEvent::Status(StatusChange { running: true, code: None }))
    );
    assert_eq!(
        collected.last(),
        Some(&ProcessEvent::Status(StatusChange { running: false, code: Some(0) }))
    );
    assert!(collected.contains(&ProcessEvent::Log(LogLine {
        level: LogLevel::Info,
        message: format!("config {}", configuration.display()),
    })));
    assert_eq!(control.recent_logs(Role::Client).len(), 2);
    assert!(!control.status(Role::Client));
    control.shutdown();
}
