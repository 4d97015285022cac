use crate::FetchError;

/// `fetch(url) -> bytes`.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait Fetcher: spx_storage::StoreBounds {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl<F: Fetcher + ?Sized> Fetcher for std::sync::Arc<F> {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        (**self).fetch(url).await
    }
}

/// Native HTTP fetcher.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |err: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        };

        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().await.map_err(transport)?;
        tracing::debug!(url, bytes = body.len(), "fetched");
        Ok(body.to_vec())
    }
}

/// `fetch()` from the window or worker global scope.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Default)]
pub struct BrowserFetcher;

#[cfg(target_arch = "wasm32")]
#[async_trait::async_trait(?Send)]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;

        let transport = |err: wasm_bindgen::JsValue| FetchError::Transport {
            url: url.to_string(),
            message: format!("{err:?}"),
        };

        let global = js_sys::global();
        let promise = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
            window.fetch_with_str(url)
        } else if let Some(scope) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
            scope.fetch_with_str(url)
        } else {
            return Err(FetchError::Unavailable);
        };

        let resp: web_sys::Response = JsFuture::from(promise)
            .await
            .map_err(transport)?
            .unchecked_into();
        if !resp.ok() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status(),
            });
        }
        let buf = JsFuture::from(resp.array_buffer().map_err(transport)?)
            .await
            .map_err(transport)?;
        Ok(js_sys::Uint8Array::new(&buf).to_vec())
    }
}
