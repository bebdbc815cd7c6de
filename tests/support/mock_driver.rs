//! Scripted in-memory automation driver for integration tests.
//!
//! Each article URL is bound to a [`PageScript`] describing how the site
//! behaves for that article: how many times the primary download popup
//! fails before opening, which credentials the popup exposes, and where
//! each download control leads. The mock tracks opened and closed sessions
//! so tests can assert the guard discipline holds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::GrayImage;

use linkharvest::barcode::BarcodeDecoder;
use linkharvest::driver::{DriverError, ElementId, PageDriver, SessionId};

/// How one download control on the popup behaves when clicked.
#[derive(Debug, Clone)]
pub enum ButtonScript {
    /// The control opens a popup that lands at this address.
    Target(String),
    /// The control's click fails outright.
    Fails,
}

/// Scripted behavior for one article page.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    /// Number of leading primary-control clicks that time out before one
    /// finally opens the popup.
    pub primary_popup_failures: u32,
    /// Value exposed by the download-password input, if present.
    pub download_pwd: Option<String>,
    /// Value exposed by the extraction-password input, if present.
    pub extract_pwd: Option<String>,
    /// The popup's download controls, in enumeration order.
    pub buttons: Vec<ButtonScript>,
}

impl PageScript {
    /// Script with a single control leading to `target` and no credentials.
    pub fn single_target(target: &str) -> Self {
        Self {
            buttons: vec![ButtonScript::Target(target.to_string())],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
enum Session {
    /// The article page itself; holds the article URL for script lookup.
    ArticlePage(String),
    /// The primary download popup for an article.
    Popup(String),
    /// A per-control popup that landed at this address.
    Target(String),
}

#[derive(Debug, Clone)]
enum Element {
    /// A credential input carrying its value.
    Input(String),
    /// Download control `index` on the popup of the given article.
    Button { article_url: String, index: usize },
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    sessions: HashMap<u64, Session>,
    elements: HashMap<u64, Element>,
    /// Per-article count of primary-control clicks seen so far.
    primary_clicks: HashMap<String, u32>,
    /// Most article pages ever open at the same time.
    peak_article_pages: usize,
    opened: Vec<SessionId>,
    closed: Vec<SessionId>,
}

/// In-memory [`PageDriver`] driven entirely by per-article scripts.
pub struct MockDriver {
    scripts: HashMap<String, PageScript>,
    /// Raw bytes served by [`PageDriver::fetch_bytes`], keyed by address.
    images: HashMap<String, Vec<u8>>,
    /// Artificial wait before a primary popup opens, so resolutions overlap.
    popup_delay: Duration,
    inner: Mutex<Inner>,
}

impl MockDriver {
    pub fn new(scripts: HashMap<String, PageScript>) -> Self {
        Self {
            scripts,
            images: HashMap::new(),
            popup_delay: Duration::ZERO,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), bytes);
        self
    }

    pub fn with_popup_delay(mut self, delay: Duration) -> Self {
        self.popup_delay = delay;
        self
    }

    /// Most article pages that were ever open simultaneously.
    pub fn peak_open_article_pages(&self) -> usize {
        self.inner.lock().unwrap().peak_article_pages
    }

    /// Sessions opened over the mock's lifetime.
    pub fn opened(&self) -> Vec<SessionId> {
        self.inner.lock().unwrap().opened.clone()
    }

    /// Sessions closed over the mock's lifetime.
    pub fn closed(&self) -> Vec<SessionId> {
        self.inner.lock().unwrap().closed.clone()
    }

    fn register(inner: &mut Inner, session: Session) -> SessionId {
        inner.next_id += 1;
        let id = SessionId(inner.next_id);
        inner.sessions.insert(id.0, session);
        inner.opened.push(id);
        id
    }

    fn script(&self, article_url: &str) -> Result<&PageScript, DriverError> {
        self.scripts
            .get(article_url)
            .ok_or_else(|| DriverError::Backend(format!("no page at '{article_url}'")))
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn open_page(&self, url: &str) -> Result<SessionId, DriverError> {
        self.script(url)?;
        let mut inner = self.inner.lock().unwrap();
        let id = Self::register(&mut inner, Session::ArticlePage(url.to_string()));
        let live = inner
            .sessions
            .values()
            .filter(|session| matches!(session, Session::ArticlePage(_)))
            .count();
        inner.peak_article_pages = inner.peak_article_pages.max(live);
        Ok(id)
    }

    async fn click_and_await_popup(
        &self,
        session: SessionId,
        _selector: &str,
        timeout: Duration,
    ) -> Result<SessionId, DriverError> {
        let article_url = {
            let inner = self.inner.lock().unwrap();
            match inner.sessions.get(&session.0) {
                Some(Session::ArticlePage(url)) => url.clone(),
                Some(_) => return Err(DriverError::Backend("not an article page".into())),
                None => return Err(DriverError::SessionClosed(session)),
            }
        };

        if self.popup_delay > Duration::ZERO {
            tokio::time::sleep(self.popup_delay).await;
        }

        let script = self.script(&article_url)?;
        let mut inner = self.inner.lock().unwrap();
        let clicks = inner.primary_clicks.entry(article_url.clone()).or_insert(0);
        *clicks += 1;
        if *clicks <= script.primary_popup_failures {
            return Err(DriverError::PopupTimeout { session, timeout });
        }
        Ok(Self::register(&mut inner, Session::Popup(article_url)))
    }

    async fn click_element_and_await_popup(
        &self,
        session: SessionId,
        element: ElementId,
        timeout: Duration,
    ) -> Result<SessionId, DriverError> {
        let (article_url, index) = {
            let inner = self.inner.lock().unwrap();
            match inner.elements.get(&element.0) {
                Some(Element::Button { article_url, index }) => (article_url.clone(), *index),
                Some(Element::Input(_)) => {
                    return Err(DriverError::Backend("input is not clickable".into()));
                }
                None => return Err(DriverError::StaleElement(element)),
            }
        };

        let script = self.script(&article_url)?;
        match script.buttons.get(index) {
            Some(ButtonScript::Target(target)) => {
                let mut inner = self.inner.lock().unwrap();
                Ok(Self::register(&mut inner, Session::Target(target.clone())))
            }
            Some(ButtonScript::Fails) => Err(DriverError::PopupTimeout { session, timeout }),
            None => Err(DriverError::StaleElement(element)),
        }
    }

    async fn wait_for_element(
        &self,
        session: SessionId,
        selector: &str,
        _timeout: Duration,
    ) -> Result<Option<ElementId>, DriverError> {
        let article_url = {
            let inner = self.inner.lock().unwrap();
            match inner.sessions.get(&session.0) {
                Some(Session::Popup(url)) => url.clone(),
                Some(_) => return Ok(None),
                None => return Err(DriverError::SessionClosed(session)),
            }
        };

        let script = self.script(&article_url)?;
        let value = if selector.contains("download-pwd") {
            script.download_pwd.clone()
        } else if selector.contains("extract-pwd") {
            script.extract_pwd.clone()
        } else {
            None
        };

        match value {
            Some(value) => {
                let mut inner = self.inner.lock().unwrap();
                inner.next_id += 1;
                let id = ElementId(inner.next_id);
                inner.elements.insert(id.0, Element::Input(value));
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn read_attribute(
        &self,
        element: ElementId,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let inner = self.inner.lock().unwrap();
        match inner.elements.get(&element.0) {
            Some(Element::Input(value)) if name == "value" => Ok(Some(value.clone())),
            Some(_) => Ok(None),
            None => Err(DriverError::StaleElement(element)),
        }
    }

    async fn locate_all(
        &self,
        session: SessionId,
        _selector: &str,
    ) -> Result<Vec<ElementId>, DriverError> {
        let article_url = {
            let inner = self.inner.lock().unwrap();
            match inner.sessions.get(&session.0) {
                Some(Session::Popup(url)) => url.clone(),
                Some(_) => return Ok(Vec::new()),
                None => return Err(DriverError::SessionClosed(session)),
            }
        };

        let script = self.script(&article_url)?;
        let mut inner = self.inner.lock().unwrap();
        let mut ids = Vec::with_capacity(script.buttons.len());
        for index in 0..script.buttons.len() {
            inner.next_id += 1;
            let id = ElementId(inner.next_id);
            inner.elements.insert(
                id.0,
                Element::Button {
                    article_url: article_url.clone(),
                    index,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn current_url(&self, session: SessionId) -> Result<String, DriverError> {
        let inner = self.inner.lock().unwrap();
        match inner.sessions.get(&session.0) {
            Some(Session::Target(url) | Session::ArticlePage(url) | Session::Popup(url)) => {
                Ok(url.clone())
            }
            None => Err(DriverError::SessionClosed(session)),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DriverError> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| DriverError::Fetch {
                url: url.to_string(),
                message: "no scripted bytes".to_string(),
            })
    }

    async fn close(&self, session: SessionId) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.remove(&session.0).is_some() {
            inner.closed.push(session);
        }
        Ok(())
    }
}

/// Decoder that always yields the same payload, regardless of image
/// content. `None` simulates decode exhaustion across every variant.
pub struct FixedDecoder(pub Option<String>);

impl BarcodeDecoder for FixedDecoder {
    fn decode(&self, _image: &GrayImage) -> Option<String> {
        self.0.clone()
    }
}

/// A tiny valid PNG so the fallback's image parse step succeeds.
pub fn tiny_png() -> Vec<u8> {
    let image = GrayImage::from_pixel(4, 4, image::Luma([128u8]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .expect("in-memory png encode");
    bytes
}
