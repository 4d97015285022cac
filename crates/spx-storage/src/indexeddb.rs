use std::cell::RefCell;
use std::rc::Rc;

use futures_channel::oneshot;
use js_sys::Uint8Array;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbRequest, IdbTransactionMode};

use crate::{KvStore, Result, StorageError, FILE_DATA_STORE};

/// IndexedDB-backed [`KvStore`].
///
/// Each namespace is a database holding a single object store (`FILE_DATA` by default), the
/// same layout the engine's persistent filesystem uses. A connection is opened per operation
/// and closed on every exit path.
#[derive(Debug, Clone)]
pub struct IndexedDbStore {
    store_name: String,
}

impl Default for IndexedDbStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexedDbStore {
    pub fn new() -> Self {
        Self::with_store_name(FILE_DATA_STORE)
    }

    pub fn with_store_name(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
        }
    }

    /// Open (creating if needed) `database` and make sure the object store exists.
    pub async fn ensure(&self, database: &str) -> Result<()> {
        let _db = open_database(database, &self.store_name).await?;
        Ok(())
    }

    pub async fn delete_database(name: &str) -> Result<()> {
        let factory = idb_factory()?;
        let req = factory.delete_database(name)?;
        await_open_request(&req, None).await.map(|_| ())
    }
}

/// Open connection that is closed when dropped.
struct DbGuard {
    db: IdbDatabase,
}

impl Drop for DbGuard {
    fn drop(&mut self) {
        self.db.close();
    }
}

fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();
    if let Some(window) = global.dyn_ref::<web_sys::Window>() {
        return window.indexed_db()?.ok_or(StorageError::Unavailable);
    }
    if let Some(scope) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
        return scope.indexed_db()?.ok_or(StorageError::Unavailable);
    }
    Err(StorageError::Unavailable)
}

async fn open_database(name: &str, store_name: &str) -> Result<DbGuard> {
    let factory = idb_factory()?;
    let req = factory.open(name)?;

    let upgrade_req = req.clone();
    let upgrade_store = store_name.to_string();
    let on_upgrade = Closure::<dyn FnMut(web_sys::Event)>::new(move |_evt: web_sys::Event| {
        let Ok(result) = upgrade_req.result() else {
            return;
        };
        let db: IdbDatabase = result.unchecked_into();
        if !db.object_store_names().contains(&upgrade_store) {
            if let Err(err) = db.create_object_store(&upgrade_store) {
                tracing::error!("failed to create object store {upgrade_store:?}: {err:?}");
            }
        }
    });
    req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));

    let result = await_open_request(&req, Some(name)).await;
    req.set_onupgradeneeded(None);
    drop(on_upgrade);

    let guard = DbGuard {
        db: result?.unchecked_into(),
    };
    if !guard.db.object_store_names().contains(store_name) {
        return Err(StorageError::MissingObjectStore {
            database: name.to_string(),
            store: store_name.to_string(),
        });
    }
    Ok(guard)
}

/// Resolve an open/delete request, mapping `onblocked` to [`StorageError::Blocked`].
async fn await_open_request(req: &IdbOpenDbRequest, name: Option<&str>) -> Result<JsValue> {
    let (tx, rx) = oneshot::channel::<Result<JsValue>>();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let blocked_tx = tx.clone();
    let blocked_name = name.unwrap_or_default().to_string();
    let on_blocked = Closure::<dyn FnMut(web_sys::Event)>::new(move |_evt: web_sys::Event| {
        if let Some(tx) = blocked_tx.borrow_mut().take() {
            let _ = tx.send(Err(StorageError::Blocked(blocked_name.clone())));
        }
    });
    req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

    let out = await_request_with(req, tx, rx).await;
    req.set_onblocked(None);
    out
}

async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let (tx, rx) = oneshot::channel::<Result<JsValue>>();
    await_request_with(req, Rc::new(RefCell::new(Some(tx))), rx).await
}

type SharedSender = Rc<RefCell<Option<oneshot::Sender<Result<JsValue>>>>>;

async fn await_request_with(
    req: &IdbRequest,
    tx: SharedSender,
    rx: oneshot::Receiver<Result<JsValue>>,
) -> Result<JsValue> {
    let ok_tx = tx.clone();
    let ok_req = req.clone();
    let on_success = Closure::<dyn FnMut(web_sys::Event)>::new(move |_evt: web_sys::Event| {
        if let Some(tx) = ok_tx.borrow_mut().take() {
            let _ = tx.send(ok_req.result().map_err(StorageError::from));
        }
    });

    let err_tx = tx;
    let err_req = req.clone();
    let on_error = Closure::<dyn FnMut(web_sys::Event)>::new(move |evt: web_sys::Event| {
        // Keep the error from also surfacing as an uncaught transaction abort.
        evt.prevent_default();
        if let Some(tx) = err_tx.borrow_mut().take() {
            let err = match err_req.error() {
                Ok(Some(ex)) => StorageError::from_dom_exception(&ex),
                Ok(None) => StorageError::Js("request failed without an error".to_string()),
                Err(value) => StorageError::from(value),
            };
            let _ = tx.send(Err(err));
        }
    });

    req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    req.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    let out = rx
        .await
        .unwrap_or_else(|_| Err(StorageError::Js("request callback dropped".to_string())));

    req.set_onsuccess(None);
    req.set_onerror(None);
    out
}

fn value_to_bytes(key: &str, value: JsValue) -> Result<Option<Vec<u8>>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    // Hashes written by the page-side template are plain strings.
    if let Some(s) = value.as_string() {
        return Ok(Some(s.into_bytes()));
    }
    if value.is_instance_of::<Uint8Array>() || value.is_instance_of::<js_sys::ArrayBuffer>() {
        return Ok(Some(Uint8Array::new(&value).to_vec()));
    }
    Err(StorageError::Corrupt {
        key: key.to_string(),
        reason: "value is neither bytes nor a string",
    })
}

#[async_trait::async_trait(?Send)]
impl KvStore for IndexedDbStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = open_database(namespace, &self.store_name).await?;
        let tx = guard
            .db
            .transaction_with_str_and_mode(&self.store_name, IdbTransactionMode::Readonly)?;
        let store = tx.object_store(&self.store_name)?;
        let req = store.get(&JsValue::from_str(key))?;
        let value = await_request(&req).await?;
        value_to_bytes(key, value)
    }

    async fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
        let guard = open_database(namespace, &self.store_name).await?;
        let tx = guard
            .db
            .transaction_with_str_and_mode(&self.store_name, IdbTransactionMode::Readwrite)?;
        let store = tx.object_store(&self.store_name)?;
        let bytes = Uint8Array::from(value);
        let req = store.put_with_key(&bytes, &JsValue::from_str(key))?;
        await_request(&req).await?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        tracing::debug!(namespace, "deleting indexeddb database");
        Self::delete_database(namespace).await
    }
}
