//! Behaviour every backend shares, run against each of them: the file and
//! database stores directly, and the RPC store talking JSON to a peer that
//! serves either one.

use std::sync::Arc;

use tempfile::TempDir;

use crate::configuration::config::scratch_path_for;
use crate::storage::connection::ConnectionProvider;
use crate::storage::database_storage::{initialize_schema, register_user, DatabaseStorage};
use crate::storage::file_storage::FileStorage;
use crate::storage::rpc_storage::{serve_request, InvokeRpc, RpcRequest, RpcResponse, RpcStorage};
use crate::storage::storage_trait::ActiveSessionStorage;
use crate::storage::types::{PropertyMap, SessionUser};

/// Opens a fresh, empty store for a session id.
type Opener = Box<dyn Fn(&str) -> Box<dyn ActiveSessionStorage>>;

struct Backend {
    name: &'static str,
    open: Opener,
    // keeps scratch directories alive for the duration of the test
    _dir: TempDir,
}

fn user() -> SessionUser {
    SessionUser::new("alice", 1001)
}

fn database_provider() -> ConnectionProvider {
    let provider = ConnectionProvider::open_single("sqlite::memory:").unwrap();
    initialize_schema(&provider).unwrap();
    register_user(&provider, &user()).unwrap();
    provider
}

/// Round-trips every request and response through JSON before serving it.
fn json_peer<F>(serve: F) -> InvokeRpc
where
    F: Fn(&RpcRequest) -> RpcResponse + Send + Sync + 'static,
{
    Arc::new(move |request: &RpcRequest| {
        let decoded: RpcRequest = serde_json::from_str(&serde_json::to_string(request)?)?;
        let response = serve(&decoded);
        Ok(serde_json::from_str(&serde_json::to_string(&response)?)?)
    })
}

fn file_backend() -> Backend {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    Backend {
        name: "file",
        open: Box::new(move |id: &str| -> Box<dyn ActiveSessionStorage> {
            Box::new(FileStorage::new(scratch_path_for(&root, id)))
        }),
        _dir: dir,
    }
}

fn database_backend() -> Backend {
    let provider = database_provider();
    Backend {
        name: "database",
        open: Box::new(move |id: &str| -> Box<dyn ActiveSessionStorage> {
            Box::new(DatabaseStorage::new(id, user(), provider.clone()))
        }),
        _dir: TempDir::new().unwrap(),
    }
}

fn rpc_backend(name: &'static str, invoke: InvokeRpc, dir: TempDir) -> Backend {
    let root = dir.path().to_path_buf();
    Backend {
        name,
        open: Box::new(move |id: &str| -> Box<dyn ActiveSessionStorage> {
            Box::new(RpcStorage::new(
                user(),
                id,
                scratch_path_for(&root, id),
                invoke.clone(),
            ))
        }),
        _dir: dir,
    }
}

fn rpc_file_backend() -> Backend {
    let invoke = json_peer(|request| serve_request(&FileStorage::new(&request.scratch_path), request));
    rpc_backend("rpc+file", invoke, TempDir::new().unwrap())
}

fn rpc_database_backend() -> Backend {
    let provider = database_provider();
    let invoke = json_peer(move |request| {
        let storage = DatabaseStorage::new(
            request.session_id.clone(),
            request.user.clone(),
            provider.clone(),
        );
        serve_request(&storage, request)
    });
    rpc_backend("rpc+database", invoke, TempDir::new().unwrap())
}

fn all_backends() -> Vec<Backend> {
    vec![
        file_backend(),
        database_backend(),
        rpc_file_backend(),
        rpc_database_backend(),
    ]
}

/// The smallest property set every backend accepts for a new session.
fn base_props(editor: &str) -> PropertyMap {
    [
        ("editor", editor),
        ("created", "2020-04-30T00:00:00.000Z"),
        ("last_used", "2020-04-30T00:00:00.000Z"),
        ("activity_state", "launching"),
        ("label", "initial"),
        ("launch_parameters", ""),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[test]
fn test_written_properties_read_back_exactly() {
    for backend in all_backends() {
        let store = (backend.open)("written");
        let mut props = base_props("RStudio");
        props.insert("working_directory".into(), "~/projects/analysis".into());
        props.insert("r_version".into(), "4.3.1".into());
        store.write_properties(&props).unwrap();

        let all = store.read_all_properties().unwrap();
        for (name, value) in &props {
            assert_eq!(all.get(name), Some(value), "{}: {}", backend.name, name);
        }

        let names: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(store.read_properties(&names).unwrap(), props, "{}", backend.name);
    }
}

#[test]
fn test_empty_until_first_write() {
    for backend in all_backends() {
        let store = (backend.open)("fresh");
        assert!(store.is_empty().unwrap(), "{}", backend.name);
        assert!(!store.is_valid().unwrap(), "{}", backend.name);
        store.write_properties(&base_props("RStudio")).unwrap();
        assert!(!store.is_empty().unwrap(), "{}", backend.name);
    }
}

#[test]
fn test_validity_by_editor_kind() {
    for backend in all_backends() {
        let primary = (backend.open)("primary");
        primary.write_properties(&base_props("RStudio")).unwrap();
        assert!(!primary.is_valid().unwrap(), "{}", backend.name);
        assert!(!primary.validate().unwrap(), "{}", backend.name);
        primary.write_property("project", "~/proj/proj.Rproj").unwrap();
        assert!(primary.is_valid().unwrap(), "{}", backend.name);
        assert!(primary.validate().unwrap(), "{}", backend.name);

        let other = (backend.open)("other");
        other.write_properties(&base_props("VS Code")).unwrap();
        assert!(other.is_valid().unwrap(), "{}", backend.name);
    }
}

#[test]
fn test_destroy_always_leaves_session_empty() {
    for backend in all_backends() {
        let never_written = (backend.open)("ghost");
        never_written.destroy().unwrap();
        assert!(never_written.is_empty().unwrap(), "{}", backend.name);

        let store = (backend.open)("doomed");
        store.write_properties(&base_props("RStudio")).unwrap();
        store.destroy().unwrap();
        assert!(store.is_empty().unwrap(), "{}", backend.name);
        assert!(
            store.read_property("editor").unwrap_err().is_session_not_found(),
            "{}",
            backend.name
        );
    }
}

#[test]
fn test_unset_property_reads_empty() {
    for backend in all_backends() {
        let store = (backend.open)("sparse");
        store.write_properties(&base_props("RStudio")).unwrap();
        assert_eq!(store.read_property("r_version").unwrap(), "", "{}", backend.name);
        let values = store.read_properties(&["editor", "r_version"]).unwrap();
        assert_eq!(values["editor"], "RStudio", "{}", backend.name);
        assert_eq!(values["r_version"], "", "{}", backend.name);
    }
}

#[test]
fn test_sessions_are_isolated() {
    for backend in all_backends() {
        let first = (backend.open)("first");
        let second = (backend.open)("second");
        first.write_properties(&base_props("RStudio")).unwrap();
        second.write_properties(&base_props("VS Code")).unwrap();
        first.write_property("label", "renamed").unwrap();

        assert_eq!(second.read_property("label").unwrap(), "initial", "{}", backend.name);
        first.destroy().unwrap();
        assert!(!second.is_empty().unwrap(), "{}", backend.name);
    }
}
